//! The bounded model/tool loop behind one explanation request.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::ai_sdk::{
    ContentBlock, Conversation, Message, ModelClient, ModelError, ModelEvent, ModelRequest, Role,
};
use crate::mcp::{ToolConnector, ToolError};
use crate::prompt;
use crate::protocol::StreamEvent;
use crate::publisher::{DEFAULT_CLOSING_GRACE, Publisher};
use crate::tools::{DiscoveryCache, ToolCallRequest, ToolDescriptor, ToolRegistry, truncate};

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
pub const DEFAULT_MAX_TOKENS: u32 = 2048;
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub max_tokens: u32,
    /// Upper bound on model calls per session.
    pub max_iterations: u32,
    pub session_timeout: Duration,
    pub tool_result_preview_chars: usize,
    /// How long the final `error`/`done` may wait on a client that stopped reading.
    pub closing_grace: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            tool_result_preview_chars: DEFAULT_PREVIEW_CHARS,
            closing_grace: DEFAULT_CLOSING_GRACE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("tool discovery failed: {0}")]
    Discovery(#[source] ToolError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("iteration limit reached ({0} round trips)")]
    IterationLimit(u32),

    #[error("session timed out after {0} s")]
    Timeout(u64),
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Discovery(e) => {
                format!("Could not load the paper search tools: {e}")
            }
            SessionError::Model(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    AwaitingModel,
    ModelResponded,
    HasToolCalls,
    FinalText,
    Done,
}

/// How a session that did not fail came to an end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub iterations: u32,
    pub tool_calls: usize,
    pub cancelled: bool,
}

/// Per-request state. Owned by exactly one running `explain` call.
pub struct AgentSession {
    conversation: Conversation,
    registry: ToolRegistry,
    iterations: u32,
    tool_calls: usize,
    state: LoopState,
}

impl AgentSession {
    fn new(registry: ToolRegistry, term: &str) -> Self {
        let mut conversation = Conversation::new();
        conversation.push(Message::text(Role::System, prompt::SYSTEM_PROMPT));
        conversation.push(Message::text(Role::User, prompt::explanation_request(term)));
        Self {
            conversation,
            registry,
            iterations: 0,
            tool_calls: 0,
            state: LoopState::AwaitingModel,
        }
    }

    fn report(&self, cancelled: bool) -> SessionReport {
        SessionReport {
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            cancelled,
        }
    }
}

pub struct Agent {
    model: Arc<dyn ModelClient>,
    connector: Arc<dyn ToolConnector>,
    cache: Arc<DiscoveryCache>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(
        model: Arc<dyn ModelClient>,
        connector: Arc<dyn ToolConnector>,
        cache: Arc<DiscoveryCache>,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            connector,
            cache,
            config,
        }
    }

    /// Explain `term`, streaming progress through `publisher`. The stream
    /// always ends with exactly one `done`, whatever happens.
    pub async fn explain(
        &self,
        term: &str,
        publisher: &Publisher,
    ) -> Result<SessionReport, SessionError> {
        let session_id = Uuid::new_v4();
        let span = info_span!("session", %session_id);

        async {
            info!(term, "session started");
            let outcome =
                match tokio::time::timeout(self.config.session_timeout, self.run(term, publisher))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(SessionError::Timeout(self.config.session_timeout.as_secs())),
                };

            let error = match &outcome {
                Ok(report) => {
                    info!(
                        iterations = report.iterations,
                        tool_calls = report.tool_calls,
                        cancelled = report.cancelled,
                        "session finished"
                    );
                    None
                }
                Err(e) => {
                    warn!(error = %e, "session failed");
                    Some(StreamEvent::error(e.user_message()))
                }
            };
            publisher.conclude(error, self.config.closing_grace).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, term: &str, publisher: &Publisher) -> Result<SessionReport, SessionError> {
        let registry = ToolRegistry::open(self.connector.as_ref(), &self.cache)
            .await
            .map_err(SessionError::Discovery)?;

        let mut session = AgentSession::new(registry, term);
        let outcome = self.drive(&mut session, publisher).await;
        session.registry.close().await;
        outcome
    }

    async fn drive(
        &self,
        session: &mut AgentSession,
        publisher: &Publisher,
    ) -> Result<SessionReport, SessionError> {
        let cancel = publisher.cancellation();
        let tools = session.registry.descriptors();
        let mut pending = Vec::new();

        loop {
            session.state = match session.state {
                LoopState::AwaitingModel => {
                    if cancel.is_cancelled() {
                        info!("client went away, stopping");
                        return Ok(session.report(true));
                    }
                    if session.iterations >= self.config.max_iterations {
                        return Err(SessionError::IterationLimit(self.config.max_iterations));
                    }
                    session.iterations += 1;
                    debug!(iteration = session.iterations, "requesting model turn");
                    pending = self.model_turn(session, &tools, publisher).await?;
                    LoopState::ModelResponded
                }
                LoopState::ModelResponded if pending.is_empty() => LoopState::FinalText,
                LoopState::ModelResponded => LoopState::HasToolCalls,
                LoopState::HasToolCalls => {
                    let calls = std::mem::take(&mut pending);
                    self.run_tools(session, &calls, publisher).await;
                    LoopState::AwaitingModel
                }
                LoopState::FinalText => LoopState::Done,
                LoopState::Done => return Ok(session.report(false)),
            };
        }
    }

    /// Stream one model turn, forwarding text as it arrives. Returns the
    /// tool calls the model asked for.
    async fn model_turn(
        &self,
        session: &mut AgentSession,
        tools: &[ToolDescriptor],
        publisher: &Publisher,
    ) -> Result<Vec<ToolCallRequest>, SessionError> {
        let request = ModelRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: session.conversation.messages().to_vec(),
            tools: tools.to_vec(),
        };

        let mut stream = self.model.stream_turn(request).await?;
        let mut text = String::new();
        let mut calls = Vec::new();

        while let Some(event) = stream.next().await {
            match event? {
                ModelEvent::Text(delta) => {
                    text.push_str(&delta);
                    publisher.publish(StreamEvent::text(delta)).await;
                }
                ModelEvent::ToolCall(call) => {
                    debug!(tool = %call.name, call_id = %call.id, "model requested tool");
                    calls.push(call);
                }
            }
        }

        let mut content = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::Text { text });
        }
        content.extend(calls.iter().map(|call| ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        }));
        if !content.is_empty() {
            session
                .conversation
                .push(Message::new(Role::Assistant, content));
        }

        Ok(calls)
    }

    async fn run_tools(
        &self,
        session: &mut AgentSession,
        calls: &[ToolCallRequest],
        publisher: &Publisher,
    ) {
        let preview = self.config.tool_result_preview_chars;
        let results = session
            .registry
            .execute_all(calls, publisher.cancellation())
            .await;
        session.tool_calls += results.len();

        let mut blocks = Vec::with_capacity(results.len());
        for result in results {
            for summary in result.summaries(preview) {
                publisher.publish(StreamEvent::tool_result(summary)).await;
            }
            if !result.success {
                publisher
                    .publish(StreamEvent::error(format!(
                        "Tool {} failed: {}",
                        result.name,
                        truncate(&result.payload(), preview)
                    )))
                    .await;
            }
            blocks.push(ContentBlock::tool_result(
                result.call_id.clone(),
                result.payload(),
                !result.success,
            ));
        }

        session.conversation.push(Message::new(Role::Tool, blocks));
    }
}
