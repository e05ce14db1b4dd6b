//! Vendor-neutral contract between the agent loop and a language model.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::tools::{ToolCallRequest, ToolDescriptor};

pub mod anthropic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    pub(crate) fn tool_result(tool_use_id: String, content: String, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id,
            content,
            is_error: if is_error { Some(true) } else { None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentBlock::Text { text: text.into() }])
    }
}

/// Role-tagged, append-only message history of one session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}

/// Everything the model needs for one turn.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDescriptor>,
}

/// Incremental output of one model turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Text(String),
    ToolCall(ToolCallRequest),
}

pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, ModelError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ModelError {
    /// Text shown to the end user when a session aborts on this error.
    pub fn user_message(&self) -> String {
        match self {
            ModelError::Authentication(_) => {
                "The language model rejected the configured API key.".to_string()
            }
            ModelError::RateLimited {
                retry_after: Some(after),
            } => format!(
                "The language model is rate limiting requests; retry in {} s.",
                after.as_secs().max(1)
            ),
            ModelError::RateLimited { retry_after: None } => {
                "The language model is rate limiting requests; try again later.".to_string()
            }
            ModelError::Api { status, message } => {
                format!("The language model returned an error ({status}): {message}")
            }
            ModelError::Request(e) => format!("Could not reach the language model: {e}"),
            ModelError::Malformed(detail) => {
                format!("The language model sent an unreadable response: {detail}")
            }
        }
    }
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start one turn. Text arrives as it is generated; tool calls arrive
    /// once their arguments are complete.
    async fn stream_turn(&self, request: ModelRequest) -> Result<ModelStream, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_block_omits_success_flag() {
        let block = ContentBlock::tool_result("toolu_1".into(), "ok".into(), false);
        assert_eq!(
            serde_json::to_value(block).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"})
        );

        let block = ContentBlock::tool_result("toolu_1".into(), "boom".into(), true);
        assert_eq!(
            serde_json::to_value(block).unwrap()["is_error"],
            json!(true)
        );
    }

    #[test]
    fn rate_limit_message_mentions_retry_delay() {
        let error = ModelError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert!(error.user_message().contains("30 s"));
    }

    #[test]
    fn conversation_is_append_only() {
        let mut conversation = Conversation::new();
        assert!(conversation.messages().is_empty());
        conversation.push(Message::text(Role::User, "explain attention"));
        conversation.push(Message::text(Role::Assistant, "sure"));

        let roles: Vec<Role> = conversation.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(conversation.messages().len(), 2);
    }
}
