use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tracing::info;

use super::client::client_info;
use super::{McpConnection, ToolConnection, ToolConnector, ToolError};

pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Launches the capability server as a child process and talks MCP to it
/// over its stdin/stdout. Each `connect` spawns a fresh process, which is
/// killed when the session is dropped.
pub struct StdioConnector {
    command: String,
    args: Vec<String>,
    startup_timeout: Duration,
}

impl StdioConnector {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[async_trait]
impl ToolConnector for StdioConnector {
    fn identity(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn connect(&self) -> Result<Arc<dyn ToolConnection>, ToolError> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);

        let transport = TokioChildProcess::new(command).map_err(|source| ToolError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let service =
            match tokio::time::timeout(self.startup_timeout, client_info().serve(transport)).await
            {
                Ok(Ok(service)) => service,
                Ok(Err(e)) => return Err(ToolError::Handshake(e.to_string())),
                Err(_) => return Err(ToolError::Timeout(self.startup_timeout.as_secs())),
            };

        let connection = McpConnection::new(service);
        info!(
            server = %self.identity(),
            name = connection.server_name().as_deref().unwrap_or("unknown"),
            "connected to capability server"
        );
        Ok(Arc::new(connection))
    }
}
