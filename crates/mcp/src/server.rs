//! Tool server trait and the in-process JSON-RPC dispatcher.

use serde_json::Value;

use parley_domain::error::{Error, Result};

use crate::protocol::{
    ClientInfo, InitializeResult, JsonRpcRequest, JsonRpcResponse, McpToolDef, ResourceDef,
    ResourceReadResult, ResourcesListResult, ToolCallResult, ToolsListResult, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolServer trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A named collection of tools served over the in-process JSON-RPC layer.
///
/// Implementors supply `get_tools` and `call_tool`; the resource methods
/// are optional. Tool bodies report failures by returning
/// [`Error::ToolRuntime`] — the hub converts those into `is_error=true`
/// results handed back to the LLM rather than aborting the turn.
#[async_trait::async_trait]
pub trait ToolServer: Send + Sync {
    /// Server name; also the namespace shown in `list_all_tools`.
    fn name(&self) -> &str;

    /// Tool definitions, including each tool's JSON Schema.
    fn get_tools(&self) -> Vec<McpToolDef>;

    /// Execute a tool. `args` have already been schema-validated.
    async fn call_tool(&self, name: &str, args: &Value) -> Result<ToolCallResult>;

    fn list_resources(&self) -> Vec<ResourceDef> {
        Vec::new()
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceReadResult> {
        Err(Error::NotFound(format!("resource {uri}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON-RPC dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serve one JSON-RPC request against a tool server.
///
/// This is the full in-process protocol surface: `initialize`,
/// `tools/list`, `tools/call`, `resources/list`, `resources/read`.
pub async fn serve_request(server: &dyn ToolServer, req: JsonRpcRequest) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => {
            let result = InitializeResult {
                protocol_version: "2024-11-05".into(),
                capabilities: serde_json::json!({
                    "tools": {},
                    "resources": {},
                }),
                server_info: ClientInfo {
                    name: server.name().to_string(),
                    version: env!("CARGO_PKG_VERSION").into(),
                },
            };
            match serde_json::to_value(result) {
                Ok(v) => JsonRpcResponse::ok(req.id, v),
                Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
            }
        }

        "tools/list" => {
            let result = ToolsListResult {
                tools: server.get_tools(),
            };
            match serde_json::to_value(result) {
                Ok(v) => JsonRpcResponse::ok(req.id, v),
                Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
            }
        }

        "tools/call" => {
            let params = match req.params {
                Some(p) => p,
                None => {
                    return JsonRpcResponse::err(req.id, INVALID_PARAMS, "missing params");
                }
            };
            let name = match params.get("name").and_then(|n| n.as_str()) {
                Some(n) => n.to_string(),
                None => {
                    return JsonRpcResponse::err(req.id, INVALID_PARAMS, "missing tool name");
                }
            };
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            match server.call_tool(&name, &arguments).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(v) => JsonRpcResponse::ok(req.id, v),
                    Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
                },
                Err(Error::NotFound(msg)) => {
                    JsonRpcResponse::err(req.id, METHOD_NOT_FOUND, msg)
                }
                Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
            }
        }

        "resources/list" => {
            let result = ResourcesListResult {
                resources: server.list_resources(),
            };
            match serde_json::to_value(result) {
                Ok(v) => JsonRpcResponse::ok(req.id, v),
                Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
            }
        }

        "resources/read" => {
            let uri = req
                .params
                .as_ref()
                .and_then(|p| p.get("uri"))
                .and_then(|u| u.as_str());
            let uri = match uri {
                Some(u) => u.to_string(),
                None => {
                    return JsonRpcResponse::err(req.id, INVALID_PARAMS, "missing uri");
                }
            };
            match server.read_resource(&uri).await {
                Ok(result) => match serde_json::to_value(result) {
                    Ok(v) => JsonRpcResponse::ok(req.id, v),
                    Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
                },
                Err(Error::NotFound(msg)) => {
                    JsonRpcResponse::err(req.id, METHOD_NOT_FOUND, msg)
                }
                Err(e) => JsonRpcResponse::err(req.id, INTERNAL_ERROR, e.to_string()),
            }
        }

        other => JsonRpcResponse::err(
            req.id,
            METHOD_NOT_FOUND,
            format!("method not found: {other}"),
        ),
    }
}
