//! Client side of the capability-provider protocol.
//!
//! A [`ToolConnector`] opens one [`ToolConnection`] per agent session. The
//! stock implementation is an MCP client session built on `rmcp`, which
//! correlates responses by request id, so calls issued in the same model
//! turn can be in flight together.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::service::ServiceError;

use crate::tools::ToolDescriptor;

pub mod client;
pub mod stdio;

pub use client::McpConnection;
pub use stdio::StdioConnector;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start capability server `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capability server handshake failed: {0}")]
    Handshake(String),

    #[error("capability server connection closed")]
    Closed,

    #[error("capability server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("capability server session error: {0}")]
    Service(String),

    #[error("capability server did not respond within {0} s")]
    Timeout(u64),
}

impl From<ServiceError> for ToolError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::McpError(error) => ToolError::Rpc {
                code: i64::from(error.code.0),
                message: error.message.into_owned(),
            },
            ServiceError::TransportClosed => ToolError::Closed,
            other => ToolError::Service(other.to_string()),
        }
    }
}

/// Raw outcome of one tool invocation, before it is tied to a call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub parts: Vec<String>,
    pub is_error: bool,
}

#[async_trait]
pub trait ToolConnection: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError>;

    /// Release the underlying channel. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait ToolConnector: Send + Sync {
    /// Stable name of the server this connector reaches; keys the discovery cache.
    fn identity(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn ToolConnection>, ToolError>;
}
