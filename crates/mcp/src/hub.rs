//! The tool hub — JSON-RPC client side of the in-process MCP layer.
//!
//! Holds every registered server, resolves tool names (first registration
//! wins on duplicates), validates arguments against declared schemas
//! before dispatch, and consults the result cache for cacheable tools.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;
use sha2::{Digest, Sha256};

use parley_domain::error::Result;

use crate::protocol::{
    initialize_params, JsonRpcRequest, McpToolDef, ToolCallResult, ToolsListResult,
};
use crate::schema::validate_args;
use crate::server::{serve_request, ToolServer};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result cache hook
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Storage hook for cached tool results.
///
/// Implemented by the gateway over its KV facade; values are JSON-encoded
/// [`ToolCallResult`]s keyed by `(tool_name, fingerprint)`.
pub trait ToolResultCache: Send + Sync {
    fn get(&self, tool_name: &str, fingerprint: &str) -> Option<String>;
    fn put(&self, tool_name: &str, fingerprint: &str, value: String, ttl: Duration);
}

/// Outcome of one tool dispatch through the hub.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub result: ToolCallResult,
    pub cache_hit: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolHub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Registered {
    name: String,
    server: Arc<dyn ToolServer>,
    /// Capabilities returned by `initialize`, cached at registration.
    #[allow(dead_code)]
    capabilities: Value,
    tools: Vec<McpToolDef>,
}

/// Registry of tool servers. Read-mostly after startup: lookups take a
/// read lock, registration takes a write lock.
pub struct ToolHub {
    servers: RwLock<Vec<Registered>>,
    cache: Option<Arc<dyn ToolResultCache>>,
    cache_enabled: bool,
    default_cache_ttl: Duration,
    next_rpc_id: AtomicU64,
}

impl ToolHub {
    pub fn new(
        cache: Option<Arc<dyn ToolResultCache>>,
        cache_enabled: bool,
        default_cache_ttl: Duration,
    ) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            cache,
            cache_enabled,
            default_cache_ttl,
            next_rpc_id: AtomicU64::new(1),
        }
    }

    fn rpc_id(&self) -> u64 {
        self.next_rpc_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a server: perform the `initialize` handshake, cache its
    /// capabilities, and discover its tools via `tools/list`.
    pub async fn register_server(
        &self,
        name: impl Into<String>,
        server: Arc<dyn ToolServer>,
    ) -> Result<()> {
        let name = name.into();

        let init_params = serde_json::to_value(initialize_params())?;
        let init_resp = serve_request(
            server.as_ref(),
            JsonRpcRequest::new(self.rpc_id(), "initialize", Some(init_params)),
        )
        .await;
        let capabilities = init_resp
            .into_result()
            .map_err(|e| parley_domain::Error::ToolRuntime(format!("initialize failed: {e}")))?
            .get("capabilities")
            .cloned()
            .unwrap_or(Value::Null);

        let tools_resp = serve_request(
            server.as_ref(),
            JsonRpcRequest::new(self.rpc_id(), "tools/list", None),
        )
        .await;
        let tools: ToolsListResult = serde_json::from_value(
            tools_resp
                .into_result()
                .map_err(|e| parley_domain::Error::ToolRuntime(format!("tools/list failed: {e}")))?,
        )?;

        let mut servers = self.servers.write();

        // Duplicate names resolve to the earliest registration.
        for tool in &tools.tools {
            if let Some(owner) = servers
                .iter()
                .find(|s| s.tools.iter().any(|t| t.name == tool.name))
            {
                tracing::warn!(
                    tool = %tool.name,
                    first_server = %owner.name,
                    new_server = %name,
                    "duplicate tool name; first registration wins"
                );
            }
        }

        tracing::info!(server = %name, tools = tools.tools.len(), "tool server registered");
        servers.push(Registered {
            name,
            server,
            capabilities,
            tools: tools.tools,
        });
        Ok(())
    }

    /// Tools per server, in registration order.
    pub fn list_all_tools(&self) -> Vec<(String, Vec<McpToolDef>)> {
        self.servers
            .read()
            .iter()
            .map(|s| (s.name.clone(), s.tools.clone()))
            .collect()
    }

    /// Flattened tool definitions for the LLM, duplicates removed
    /// (first registration wins).
    pub fn tool_definitions(&self) -> Vec<parley_domain::message::ToolDefinition> {
        let servers = self.servers.read();
        let mut seen = std::collections::HashSet::new();
        let mut defs = Vec::new();
        for server in servers.iter() {
            for tool in &server.tools {
                if seen.insert(tool.name.clone()) {
                    defs.push(parley_domain::message::ToolDefinition {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.input_schema.clone(),
                    });
                }
            }
        }
        defs
    }

    fn resolve(
        &self,
        tool_name: &str,
        server_name: Option<&str>,
    ) -> Option<(Arc<dyn ToolServer>, McpToolDef)> {
        let servers = self.servers.read();
        servers
            .iter()
            .filter(|s| server_name.map_or(true, |n| s.name == n))
            .find_map(|s| {
                s.tools
                    .iter()
                    .find(|t| t.name == tool_name)
                    .map(|t| (s.server.clone(), t.clone()))
            })
    }

    /// Dispatch one tool call.
    ///
    /// Failures surface as `is_error=true` results, never as `Err` — the
    /// agent loop hands them back to the LLM so it can recover.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        args: &Value,
        server_name: Option<&str>,
    ) -> ToolCallOutcome {
        let (server, tool) = match self.resolve(tool_name, server_name) {
            Some(found) => found,
            None => {
                return ToolCallOutcome {
                    result: ToolCallResult::error(format!("unknown tool: {tool_name}")),
                    cache_hit: false,
                }
            }
        };

        // Arguments are validated even when the result could come from
        // the cache.
        if let Err(explanation) = validate_args(args, &tool.input_schema) {
            return ToolCallOutcome {
                result: ToolCallResult::error(format!(
                    "invalid arguments for {tool_name}: {explanation}"
                )),
                cache_hit: false,
            };
        }

        let fingerprint = fingerprint(args);

        if tool.cacheable && self.cache_enabled {
            if let Some(cache) = &self.cache {
                if let Some(raw) = cache.get(tool_name, &fingerprint) {
                    match serde_json::from_str::<ToolCallResult>(&raw) {
                        Ok(result) => {
                            tracing::debug!(tool = tool_name, "tool result cache hit");
                            return ToolCallOutcome {
                                result,
                                cache_hit: true,
                            };
                        }
                        Err(e) => {
                            tracing::warn!(tool = tool_name, error = %e, "bad cached tool result; ignoring");
                        }
                    }
                }
            }
        }

        let params = serde_json::json!({
            "name": tool_name,
            "arguments": args,
        });
        let resp = serve_request(
            server.as_ref(),
            JsonRpcRequest::new(self.rpc_id(), "tools/call", Some(params)),
        )
        .await;

        let result = match resp.into_result() {
            Ok(value) => match serde_json::from_value::<ToolCallResult>(value) {
                Ok(r) => r,
                Err(e) => ToolCallResult::error(format!("malformed tool result: {e}")),
            },
            Err(e) => ToolCallResult::error(e.message),
        };

        if tool.cacheable && self.cache_enabled && !result.is_error {
            if let Some(cache) = &self.cache {
                if let Ok(raw) = serde_json::to_string(&result) {
                    let ttl = tool
                        .cache_ttl_secs
                        .map(Duration::from_secs)
                        .unwrap_or(self.default_cache_ttl);
                    cache.put(tool_name, &fingerprint, raw, ttl);
                }
            }
        }

        ToolCallOutcome {
            result,
            cache_hit: false,
        }
    }
}

/// Digest of the canonical JSON encoding of the arguments.
///
/// `serde_json` maps are key-ordered here (the `preserve_order` feature is
/// off), so re-serializing normalizes property order.
pub fn fingerprint(args: &Value) -> String {
    let canonical = serde_json::to_string(args).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StubServer {
        name: String,
        tool: McpToolDef,
        calls: AtomicU64,
        reply: String,
    }

    impl StubServer {
        fn new(name: &str, tool_name: &str, cacheable: bool, reply: &str) -> Self {
            Self {
                name: name.into(),
                tool: McpToolDef {
                    name: tool_name.into(),
                    description: "stub".into(),
                    input_schema: serde_json::json!({
                        "type": "object",
                        "properties": { "x": { "type": "integer" } },
                        "required": ["x"]
                    }),
                    cacheable,
                    cache_ttl_secs: None,
                },
                calls: AtomicU64::new(0),
                reply: reply.into(),
            }
        }
    }

    #[async_trait::async_trait]
    impl ToolServer for StubServer {
        fn name(&self) -> &str {
            &self.name
        }

        fn get_tools(&self) -> Vec<McpToolDef> {
            vec![self.tool.clone()]
        }

        async fn call_tool(&self, _name: &str, _args: &Value) -> Result<ToolCallResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolCallResult::ok(self.reply.clone()))
        }
    }

    #[derive(Default)]
    struct MapCache {
        entries: Mutex<HashMap<String, String>>,
    }

    impl ToolResultCache for MapCache {
        fn get(&self, tool_name: &str, fp: &str) -> Option<String> {
            self.entries.lock().get(&format!("{tool_name}:{fp}")).cloned()
        }

        fn put(&self, tool_name: &str, fp: &str, value: String, _ttl: Duration) {
            self.entries.lock().insert(format!("{tool_name}:{fp}"), value);
        }
    }

    fn hub(cache: Option<Arc<dyn ToolResultCache>>) -> ToolHub {
        ToolHub::new(cache, true, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn register_and_list() {
        let hub = hub(None);
        hub.register_server("a", Arc::new(StubServer::new("a", "t1", false, "ok")))
            .await
            .unwrap();
        let all = hub.list_all_tools();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "a");
        assert_eq!(all[0].1[0].name, "t1");
    }

    #[tokio::test]
    async fn duplicate_tool_first_registration_wins() {
        let hub = hub(None);
        hub.register_server("first", Arc::new(StubServer::new("first", "dup", false, "one")))
            .await
            .unwrap();
        hub.register_server(
            "second",
            Arc::new(StubServer::new("second", "dup", false, "two")),
        )
        .await
        .unwrap();

        let outcome = hub
            .call_tool("dup", &serde_json::json!({"x": 1}), None)
            .await;
        assert_eq!(outcome.result.joined_text(), "one");

        // Explicit server selection still reaches the second.
        let outcome = hub
            .call_tool("dup", &serde_json::json!({"x": 1}), Some("second"))
            .await;
        assert_eq!(outcome.result.joined_text(), "two");

        // Flattened definitions dedupe.
        assert_eq!(hub.tool_definitions().len(), 1);
    }

    #[tokio::test]
    async fn schema_mismatch_returns_is_error() {
        let hub = hub(None);
        hub.register_server("a", Arc::new(StubServer::new("a", "t1", false, "ok")))
            .await
            .unwrap();

        let outcome = hub
            .call_tool("t1", &serde_json::json!({"x": "not an int"}), None)
            .await;
        assert!(outcome.result.is_error);
        assert!(!outcome.cache_hit);
        assert!(outcome.result.joined_text().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn unknown_tool_returns_is_error() {
        let hub = hub(None);
        let outcome = hub.call_tool("ghost", &serde_json::json!({}), None).await;
        assert!(outcome.result.is_error);
    }

    #[tokio::test]
    async fn cacheable_tool_hits_cache_on_second_call() {
        let cache: Arc<dyn ToolResultCache> = Arc::new(MapCache::default());
        let hub = hub(Some(cache));
        let server = Arc::new(StubServer::new("a", "pure", true, "42"));
        hub.register_server("a", server.clone()).await.unwrap();

        let args = serde_json::json!({"x": 7});
        let first = hub.call_tool("pure", &args, None).await;
        assert!(!first.cache_hit);
        let second = hub.call_tool("pure", &args, None).await;
        assert!(second.cache_hit);
        assert_eq!(second.result.joined_text(), "42");
        assert_eq!(server.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_args_miss_the_cache() {
        let cache: Arc<dyn ToolResultCache> = Arc::new(MapCache::default());
        let hub = hub(Some(cache));
        let server = Arc::new(StubServer::new("a", "pure", true, "42"));
        hub.register_server("a", server.clone()).await.unwrap();

        hub.call_tool("pure", &serde_json::json!({"x": 1}), None).await;
        hub.call_tool("pure", &serde_json::json!({"x": 2}), None).await;
        assert_eq!(server.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprint_normalizes_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
