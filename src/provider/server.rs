use std::io;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler, ServiceExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use super::{PaperSource, ToolDefinition, get_all_tools};

/// MCP server exposing the paper search tools over one [`PaperSource`].
#[derive(Clone)]
pub struct PaperSearchServer {
    tools: Arc<Vec<ToolDefinition>>,
    source: Arc<dyn PaperSource>,
}

impl PaperSearchServer {
    pub fn new(source: Arc<dyn PaperSource>) -> Self {
        Self {
            tools: Arc::new(get_all_tools()),
            source,
        }
    }

    fn descriptors(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|tool| {
                let schema = tool.input_schema.as_object().cloned().unwrap_or_default();
                Tool::new(tool.name, tool.description, Arc::new(schema))
            })
            .collect()
    }

    async fn run(&self, name: &str, arguments: Value) -> CallToolResult {
        let Some(tool) = self.tools.iter().find(|tool| tool.name == name) else {
            warn!(tool = name, "unknown tool requested");
            return CallToolResult::error(vec![Content::text(format!("Unknown tool: {name}"))]);
        };

        info!(tool = tool.name, "running tool");
        match (tool.handler)(self.source.as_ref(), arguments).await {
            Ok(parts) => CallToolResult::success(parts.into_iter().map(Content::text).collect()),
            Err(e) => {
                warn!(tool = tool.name, error = %e, "tool failed");
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        }
    }
}

impl ServerHandler for PaperSearchServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = Implementation {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: None,
            description: None,
            icons: None,
            website_url: None,
        };
        info.instructions = Some("Search arXiv for papers relevant to a research term.".into());
        info
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.descriptors()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let arguments = Value::Object(request.arguments.unwrap_or_default());
        Ok(self.run(&request.name, arguments).await)
    }
}

/// Answer MCP requests from `reader` until the client goes away.
///
/// `tools/call` requests are handled concurrently; each response is written
/// as soon as its search completes.
pub async fn serve<R, W>(reader: R, writer: W, source: Arc<dyn PaperSource>) -> io::Result<()>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let service = PaperSearchServer::new(source)
        .serve((reader, writer))
        .await
        .map_err(io::Error::other)?;
    let reason = service.waiting().await.map_err(io::Error::other)?;
    info!(?reason, "client disconnected, shutting down");
    Ok(())
}
