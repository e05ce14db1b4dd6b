//! Tool registry and executor.
//!
//! Tools are not known at compile time: the registry is filled from the
//! capability server's `tools/list` answer and calls are dispatched by name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mcp::{ToolConnection, ToolConnector, ToolError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub call_id: String,
    pub name: String,
    pub success: bool,
    /// Content parts as returned by the server; an error message on failure.
    pub parts: Vec<String>,
}

impl ToolCallResult {
    pub fn failure(request: &ToolCallRequest, message: impl Into<String>) -> Self {
        Self {
            call_id: request.id.clone(),
            name: request.name.clone(),
            success: false,
            parts: vec![message.into()],
        }
    }

    /// Full content handed back to the model.
    pub fn payload(&self) -> String {
        self.parts.join("\n")
    }

    /// One display line per part, each cut to `max_chars`.
    pub fn summaries(&self, max_chars: usize) -> Vec<String> {
        if self.parts.is_empty() {
            return vec![format!("{}: (no output)", self.name)];
        }
        self.parts
            .iter()
            .map(|part| truncate(part.trim(), max_chars))
            .collect()
    }
}

pub(crate) fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &value[..end]),
        None => value.to_string(),
    }
}

struct CachedTools {
    tools: Arc<Vec<ToolDescriptor>>,
    fetched_at: Instant,
}

/// Process-wide cache of discovered tools, keyed by capability-server identity.
pub struct DiscoveryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedTools>>,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return fresh cached tools for `identity`, or list them through
    /// `connection` and remember the answer.
    pub async fn get_or_discover(
        &self,
        identity: &str,
        connection: &dyn ToolConnection,
    ) -> Result<Arc<Vec<ToolDescriptor>>, ToolError> {
        if let Some(cached) = self.entries.read().await.get(identity)
            && cached.fetched_at.elapsed() < self.ttl
        {
            debug!(server = %identity, "using cached tool list");
            return Ok(Arc::clone(&cached.tools));
        }

        let tools = Arc::new(connection.list_tools().await?);
        info!(
            server = %identity,
            tools = ?tools.iter().map(|tool| tool.name.as_str()).collect::<Vec<_>>(),
            "discovered tools"
        );

        self.entries.write().await.insert(
            identity.to_string(),
            CachedTools {
                tools: Arc::clone(&tools),
                fetched_at: Instant::now(),
            },
        );
        Ok(tools)
    }
}

/// The tools available to one session plus that session's server connection.
pub struct ToolRegistry {
    connection: Arc<dyn ToolConnection>,
    tools: Arc<Vec<ToolDescriptor>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Connect to the capability server and discover its tools. On failure
    /// the connection, if any was made, is closed before returning.
    pub async fn open(
        connector: &dyn ToolConnector,
        cache: &DiscoveryCache,
    ) -> Result<Self, ToolError> {
        let connection = connector.connect().await?;
        let identity = connector.identity();

        match cache.get_or_discover(&identity, connection.as_ref()).await {
            Ok(tools) => Ok(Self::new(connection, tools)),
            Err(e) => {
                connection.close().await;
                Err(e)
            }
        }
    }

    pub fn new(connection: Arc<dyn ToolConnection>, tools: Arc<Vec<ToolDescriptor>>) -> Self {
        let mut index = HashMap::new();
        for (position, tool) in tools.iter().enumerate() {
            if index.contains_key(&tool.name) {
                warn!(tool = %tool.name, "duplicate tool name, keeping the first definition");
                continue;
            }
            index.insert(tool.name.clone(), position);
        }

        Self {
            connection,
            tools,
            index,
        }
    }

    /// Descriptors to advertise to the model, without duplicates.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .enumerate()
            .filter(|(position, tool)| self.index.get(&tool.name) == Some(position))
            .map(|(_, tool)| tool.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|position| &self.tools[*position])
    }

    pub async fn execute(&self, request: &ToolCallRequest) -> ToolCallResult {
        if self.get(&request.name).is_none() {
            warn!(tool = %request.name, "model requested an unknown tool");
            return ToolCallResult::failure(request, format!("unknown tool: {}", request.name));
        }

        if !request.arguments.is_object() {
            return ToolCallResult::failure(
                request,
                format!("arguments for {} must be a JSON object", request.name),
            );
        }

        debug!(tool = %request.name, call_id = %request.id, "executing tool");
        match self
            .connection
            .call_tool(&request.name, request.arguments.clone())
            .await
        {
            Ok(output) => ToolCallResult {
                call_id: request.id.clone(),
                name: request.name.clone(),
                success: !output.is_error,
                parts: output.parts,
            },
            Err(e) => {
                warn!(tool = %request.name, error = %e, "tool call failed");
                ToolCallResult::failure(request, format!("tool {} failed: {e}", request.name))
            }
        }
    }

    /// Run every call of one model turn concurrently. Results come back in
    /// request order. Calls not yet issued when `cancel` fires are skipped;
    /// calls already issued run to completion.
    pub async fn execute_all(
        &self,
        requests: &[ToolCallRequest],
        cancel: &CancellationToken,
    ) -> Vec<ToolCallResult> {
        join_all(requests.iter().map(|request| async move {
            if cancel.is_cancelled() {
                return ToolCallResult::failure(request, "skipped: session cancelled");
            }
            self.execute(request).await
        }))
        .await
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::mcp::ToolOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("{name} tool"),
            input_schema: json!({"type": "object"}),
        }
    }

    /// Answers `call_tool` after a per-tool delay with canned parts, or by
    /// echoing the tool name and arguments.
    pub(crate) struct FakeConnection {
        pub(crate) tools: Vec<ToolDescriptor>,
        pub(crate) delays: HashMap<String, Duration>,
        pub(crate) responses: HashMap<String, Vec<String>>,
        pub(crate) list_calls: AtomicUsize,
        pub(crate) calls: AtomicUsize,
        pub(crate) closed: AtomicBool,
    }

    impl FakeConnection {
        pub(crate) fn new(tools: Vec<ToolDescriptor>) -> Self {
            Self {
                tools,
                delays: HashMap::new(),
                responses: HashMap::new(),
                list_calls: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl ToolConnection for FakeConnection {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ToolError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: serde_json::Value,
        ) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delays.get(name) {
                tokio::time::sleep(*delay).await;
            }
            if name == "broken" {
                return Err(ToolError::Closed);
            }
            let parts = match self.responses.get(name) {
                Some(parts) => parts.clone(),
                None => vec![format!("{name} {arguments}")],
            };
            Ok(ToolOutput {
                parts,
                is_error: arguments.get("fail").is_some(),
            })
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn registry_with(connection: FakeConnection) -> (ToolRegistry, Arc<FakeConnection>) {
        let connection = Arc::new(connection);
        let tools = Arc::new(connection.tools.clone());
        let registry = ToolRegistry::new(connection.clone(), tools);
        (registry, connection)
    }

    fn call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_closed_without_reaching_server() {
        let (registry, connection) = registry_with(FakeConnection::new(vec![descriptor("search")]));

        let result = registry.execute(&call("c1", "delete_everything", json!({}))).await;

        assert!(!result.success);
        assert_eq!(result.call_id, "c1");
        assert_eq!(result.payload(), "unknown tool: delete_everything");
        assert_eq!(connection.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn server_side_errors_become_failed_results() {
        let (registry, _) = registry_with(FakeConnection::new(vec![
            descriptor("search"),
            descriptor("broken"),
        ]));

        let tool_error = registry
            .execute(&call("c1", "search", json!({"fail": true})))
            .await;
        assert!(!tool_error.success);

        let transport_error = registry.execute(&call("c2", "broken", json!({}))).await;
        assert!(!transport_error.success);
        assert!(transport_error.payload().contains("connection closed"));

        let bad_arguments = registry.execute(&call("c3", "search", json!("text"))).await;
        assert!(!bad_arguments.success);
    }

    #[tokio::test(start_paused = true)]
    async fn results_keep_request_order_when_completion_order_differs() {
        let mut connection = FakeConnection::new(vec![
            descriptor("slow"),
            descriptor("medium"),
            descriptor("fast"),
        ]);
        connection
            .delays
            .insert("slow".to_string(), Duration::from_millis(300));
        connection
            .delays
            .insert("medium".to_string(), Duration::from_millis(200));
        let (registry, _) = registry_with(connection);

        let requests = vec![
            call("a", "slow", json!({})),
            call("b", "medium", json!({})),
            call("c", "fast", json!({})),
            call("d", "missing", json!({})),
        ];
        let results = registry
            .execute_all(&requests, &CancellationToken::new())
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(results[0].payload().starts_with("slow"));
        assert!(!results[3].success);
    }

    #[tokio::test]
    async fn cancelled_session_skips_unissued_calls() {
        let (registry, connection) = registry_with(FakeConnection::new(vec![descriptor("search")]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = registry
            .execute_all(&[call("a", "search", json!({}))], &cancel)
            .await;

        assert!(!results[0].success);
        assert_eq!(connection.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn duplicate_names_keep_first_descriptor() {
        let mut second = descriptor("search");
        second.description = "shadowed".to_string();
        let (registry, _) = registry_with(FakeConnection::new(vec![
            descriptor("search"),
            second,
            descriptor("other"),
        ]));

        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["search", "other"]);
        assert_eq!(registry.get("search").unwrap().description, "search tool");
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_cache_refreshes_after_ttl() {
        let cache = DiscoveryCache::new(Duration::from_secs(60));
        let connection = FakeConnection::new(vec![descriptor("search")]);

        cache.get_or_discover("server", &connection).await.unwrap();
        cache.get_or_discover("server", &connection).await.unwrap();
        assert_eq!(connection.list_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_discover("server", &connection).await.unwrap();
        assert_eq!(connection.list_calls.load(Ordering::SeqCst), 2);

        cache.get_or_discover("other", &connection).await.unwrap();
        assert_eq!(connection.list_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn summaries_are_truncated_per_part() {
        let result = ToolCallResult {
            call_id: "c".to_string(),
            name: "search".to_string(),
            success: true,
            parts: vec!["ééééé".to_string(), "short".to_string()],
        };
        assert_eq!(result.summaries(3), vec!["ééé...", "sho..."]);
        assert_eq!(result.summaries(10), vec!["ééééé", "short"]);
    }
}
