use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ExplainRequest {
    pub text: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
    pub anthropic_configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// One record of the outbound stream: `{"type": ..., "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Text {
        #[serde(default)]
        content: String,
    },
    ToolResult {
        #[serde(default)]
        content: String,
    },
    Error {
        #[serde(default)]
        content: String,
    },
    Done,
}

impl StreamEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::ToolResult {
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::Error {
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Text { .. } => "text",
            StreamEvent::ToolResult { .. } => "tool_result",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stream_event_serializes_type_and_content() {
        let value = serde_json::to_value(StreamEvent::text("hello")).unwrap();
        assert_eq!(value, json!({"type": "text", "content": "hello"}));

        let value = serde_json::to_value(StreamEvent::Done).unwrap();
        assert_eq!(value, json!({"type": "done"}));
    }

    #[test]
    fn missing_content_defaults_to_empty() {
        let event: StreamEvent = serde_json::from_str(r#"{"type": "error"}"#).unwrap();
        assert_eq!(event, StreamEvent::error(""));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let parsed = serde_json::from_str::<StreamEvent>(r#"{"type": "tool_use"}"#);
        assert!(parsed.is_err());
    }
}
