use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation, RawContent,
};
use rmcp::service::{Peer, RoleClient, RunningService};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ToolConnection, ToolError, ToolOutput};
use crate::tools::ToolDescriptor;

/// How this crate introduces itself during the MCP handshake.
pub fn client_info() -> ClientInfo {
    ClientInfo {
        meta: None,
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: None,
            website_url: None,
        },
    }
}

/// One initialized MCP session with a capability server.
///
/// Calls go through a cloned [`Peer`], so several can be in flight at once.
pub struct McpConnection {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
    closed: AtomicBool,
}

impl McpConnection {
    /// Wrap a session whose handshake has already completed.
    pub fn new(service: RunningService<RoleClient, ClientInfo>) -> Self {
        Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
        }
    }

    /// Name the server reported during the handshake.
    pub fn server_name(&self) -> Option<String> {
        self.peer
            .peer_info()
            .map(|info| info.server_info.name.clone())
    }

    fn ensure_open(&self) -> Result<(), ToolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ToolError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ToolConnection for McpConnection {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
        self.ensure_open()?;
        let tools = self.peer.list_all_tools().await?;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.unwrap_or_default().to_string(),
                input_schema: Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        self.ensure_open()?;
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                debug!(tool = name, arguments = %other, "dropping non-object tool arguments");
                None
            }
        };

        let result = self
            .peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
                meta: None,
                task: None,
            })
            .await?;

        let parts = result
            .content
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text) => Some(text.text),
                _ => None,
            })
            .collect();

        Ok(ToolOutput {
            parts,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let Some(service) = self.service.lock().await.take() else {
            return;
        };
        match service.cancel().await {
            Ok(reason) => debug!(?reason, "capability server session closed"),
            Err(e) => warn!(error = %e, "capability server session did not shut down cleanly"),
        }
    }
}
