use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ContentBlock, ModelClient, ModelError, ModelEvent, ModelRequest, ModelStream, Role};
use crate::codec::{LineBuffer, data_payload};
use crate::tools::{ToolCallRequest, ToolDescriptor};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub api_version: String,
}

/// Streaming client for the Anthropic Messages API.
pub struct AnthropicClient {
    http: Client,
    config: AnthropicConfig,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn stream_turn(&self, request: ModelRequest) -> Result<ModelStream, ModelError> {
        let body = MessageRequest::from_model_request(&request);
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));

        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let state = TurnState {
            bytes: response.bytes_stream().boxed(),
            decoder: TurnDecoder::default(),
            pending: VecDeque::new(),
            ended: false,
        };

        Ok(Box::pin(futures::stream::unfold(state, next_event)))
    }
}

async fn error_from_response(response: Response) -> ModelError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let message = response.text().await.unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ModelError::RateLimited { retry_after },
        _ => ModelError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct MessageRequest {
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) system: Option<String>,
    pub(crate) messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) tools: Vec<ToolDefinitionApi>,
    pub(crate) stream: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct MessageParam {
    pub(crate) role: &'static str,
    pub(crate) content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolDefinitionApi {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) input_schema: serde_json::Value,
}

impl From<&ToolDescriptor> for ToolDefinitionApi {
    fn from(tool: &ToolDescriptor) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }
}

impl MessageRequest {
    /// System messages move to the top-level `system` field; tool results
    /// travel as user messages. Adjacent messages with the same wire role are
    /// merged so the roles alternate.
    pub(crate) fn from_model_request(request: &ModelRequest) -> Self {
        let mut system = Vec::new();
        let mut messages: Vec<MessageParam> = Vec::new();

        for message in &request.messages {
            let role = match message.role {
                Role::System => {
                    system.extend(message.content.iter().filter_map(|block| match block {
                        ContentBlock::Text { text } => Some(text.clone()),
                        _ => None,
                    }));
                    continue;
                }
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };

            match messages.last_mut() {
                Some(last) if last.role == role => last.content.extend(message.content.clone()),
                _ => messages.push(MessageParam {
                    role,
                    content: message.content.clone(),
                }),
            }
        }

        Self {
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages,
            tools: request.tools.iter().map(ToolDefinitionApi::from).collect(),
            stream: true,
        }
    }
}

// ============================================================================
// Streaming
// ============================================================================

struct TurnState {
    bytes: BoxStream<'static, Result<Bytes, reqwest::Error>>,
    decoder: TurnDecoder,
    pending: VecDeque<Result<ModelEvent, ModelError>>,
    ended: bool,
}

async fn next_event(
    mut state: TurnState,
) -> Option<(Result<ModelEvent, ModelError>, TurnState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((event, state));
        }
        if state.ended {
            return None;
        }

        match state.bytes.next().await {
            Some(Ok(chunk)) => match state.decoder.push(&chunk) {
                Ok(events) => state.pending.extend(events.into_iter().map(Ok)),
                Err(e) => {
                    state.pending.push_back(Err(e));
                    state.ended = true;
                }
            },
            Some(Err(e)) => {
                state.pending.push_back(Err(ModelError::Request(e)));
                state.ended = true;
            }
            None => {
                match state.decoder.finish() {
                    Ok(events) => state.pending.extend(events.into_iter().map(Ok)),
                    Err(e) => state.pending.push_back(Err(e)),
                }
                state.ended = true;
            }
        }
    }
}

/// Turns Messages API stream lines into [`ModelEvent`]s. Tool calls are
/// held back until their content block stops so the arguments are complete.
#[derive(Default)]
struct TurnDecoder {
    lines: LineBuffer,
    tool_uses: BTreeMap<u32, ToolUseAccumulator>,
}

#[derive(Default)]
struct ToolUseAccumulator {
    id: String,
    name: String,
    input_json: String,
}

impl ToolUseAccumulator {
    fn finish(self) -> Result<ToolCallRequest, ModelError> {
        let arguments = if self.input_json.trim().is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.input_json).map_err(|e| {
                ModelError::Malformed(format!("arguments for tool {}: {e}", self.name))
            })?
        };

        Ok(ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

impl TurnDecoder {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<ModelEvent>, ModelError> {
        let mut events = Vec::new();

        for line in self.lines.push(chunk) {
            let Some(payload) = data_payload(&line) else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }

            let event = match serde_json::from_str::<StreamingEvent>(payload) {
                Ok(event) => event,
                Err(e) => {
                    debug!(data = %payload, error = %e, "failed to parse Anthropic stream event");
                    continue;
                }
            };

            match event {
                StreamingEvent::ContentBlockStart {
                    index,
                    content_block: StreamContentBlock::ToolUse { id, name },
                } => {
                    self.tool_uses.insert(
                        index,
                        ToolUseAccumulator {
                            id,
                            name,
                            input_json: String::new(),
                        },
                    );
                }
                StreamingEvent::ContentBlockDelta {
                    delta: Delta::TextDelta { text },
                    ..
                } => {
                    if !text.is_empty() {
                        events.push(ModelEvent::Text(text));
                    }
                }
                StreamingEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJsonDelta { partial_json },
                } => {
                    if let Some(tool_use) = self.tool_uses.get_mut(&index) {
                        tool_use.input_json.push_str(&partial_json);
                    }
                }
                StreamingEvent::ContentBlockStop { index } => {
                    if let Some(tool_use) = self.tool_uses.remove(&index) {
                        events.push(ModelEvent::ToolCall(tool_use.finish()?));
                    }
                }
                StreamingEvent::Error { error } => return Err(error.into_model_error()),
                _ => {}
            }
        }

        Ok(events)
    }

    /// Flush tool calls whose stop event never arrived.
    fn finish(&mut self) -> Result<Vec<ModelEvent>, ModelError> {
        std::mem::take(&mut self.tool_uses)
            .into_values()
            .map(|tool_use| tool_use.finish().map(ModelEvent::ToolCall))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamingEvent {
    ContentBlockStart {
        index: u32,
        content_block: StreamContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: Delta,
    },
    ContentBlockStop {
        index: u32,
    },
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamContentBlock {
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

impl StreamError {
    fn into_model_error(self) -> ModelError {
        match self.kind.as_str() {
            "authentication_error" | "permission_error" => ModelError::Authentication(self.message),
            "rate_limit_error" => ModelError::RateLimited { retry_after: None },
            "overloaded_error" => ModelError::Api {
                status: 529,
                message: self.message,
            },
            _ => ModelError::Api {
                status: 500,
                message: format!("{}: {}", self.kind, self.message),
            },
        }
    }
}
