//! Transport-independent MCP dispatcher.

use serde_json::{json, Value};

use super::types::*;
use crate::tools::ToolRegistry;

pub const SERVER_NAME: &str = "actual-budget-mcp";

/// Routes JSON-RPC messages to the tool registry.
pub struct McpServer {
    tools: ToolRegistry,
}

impl McpServer {
    pub fn new(tools: ToolRegistry) -> Self {
        Self { tools }
    }

    /// Parse one raw message and dispatch it.
    ///
    /// Unparseable input gets a parse error with a `null` id.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(raw) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )),
        }
    }

    /// Dispatch a request. Returns `None` when no response is due.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let notification = request.is_notification();
        if notification && request.method.starts_with("notifications/") {
            tracing::debug!("Notification received: {}", request.method);
            return None;
        }

        let id = request.id.clone().unwrap_or(Value::Null);
        let response = match request.method.as_str() {
            "initialize" => Some(JsonRpcResponse::success(id, initialize(&request.params))),
            "notifications/initialized" | "initialized" => None,
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            "tools/list" => Some(JsonRpcResponse::success(
                id,
                json!({ "tools": self.tool_definitions() }),
            )),
            "tools/call" => Some(self.call_tool(id, &request.params).await),
            other => Some(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        if notification {
            None
        } else {
            response
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .list_tools()
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                title: t.title,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect()
    }

    async fn call_tool(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let Some(name) = params.get("name").and_then(|v| v.as_str()) else {
            return JsonRpcResponse::error(id, INVALID_PARAMS, "Missing tool name");
        };
        let args = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args) => args.clone(),
        };

        let result = if !self.tools.has_tool(name) {
            ToolResult::error(format!("Unknown tool: {}", name))
        } else {
            tracing::info!("Calling tool {}", name);
            match self.tools.execute(name, args).await {
                Ok(text) => ToolResult::text(text),
                Err(e) => {
                    tracing::warn!("Tool {} failed: {}", name, e);
                    ToolResult::error(format!("Tool error: {}", e))
                }
            }
        };

        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, SERVER_ERROR, e.to_string()),
        }
    }
}

fn initialize(params: &Value) -> Value {
    let requested = params.get("protocolVersion").and_then(|v| v.as_str());
    let protocol_version = match requested {
        Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v) => v,
        _ => LATEST_PROTOCOL_VERSION,
    };
    tracing::info!(
        "Client initialized with protocol version {}",
        protocol_version
    );

    let result = InitializeResult {
        protocol_version: protocol_version.to_string(),
        server_info: ServerInfo {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        capabilities: ServerCapabilities {
            tools: ToolsCapability {
                list_changed: false,
            },
        },
    };
    json!(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::memory::sample_budget;
    use crate::budget::BudgetAccessor;
    use std::sync::Arc;

    fn server() -> (tempfile::TempDir, McpServer) {
        let temp = tempfile::tempdir().expect("tempdir");
        let accessor = Arc::new(BudgetAccessor::new(
            temp.path().join("cache"),
            Arc::new(sample_budget(2)),
        ));
        (temp, McpServer::new(ToolRegistry::new(accessor)))
    }

    async fn call(server: &McpServer, message: Value) -> Option<JsonRpcResponse> {
        server.handle_message(&message.to_string()).await
    }

    #[tokio::test]
    async fn initialize_echoes_supported_version() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize",
                   "params": {"protocolVersion": "2025-03-26"}}),
        )
        .await
        .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "actual-budget-mcp");
        assert_eq!(result["serverInfo"]["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(resp.id, json!(1));
    }

    #[tokio::test]
    async fn initialize_falls_back_to_latest_version() {
        let (_temp, server) = server();
        for params in [json!({"protocolVersion": "1999-01-01"}), json!({})] {
            let resp = call(
                &server,
                json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": params}),
            )
            .await
            .unwrap();
            assert_eq!(resp.result.unwrap()["protocolVersion"], LATEST_PROTOCOL_VERSION);
        }
    }

    #[tokio::test]
    async fn notifications_get_no_response() {
        let (_temp, server) = server();
        for message in [
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "method": "notifications/cancelled", "params": {"requestId": 3}}),
            json!({"jsonrpc": "2.0", "method": "initialized"}),
            json!({"jsonrpc": "2.0", "method": "ping"}),
        ] {
            assert!(call(&server, message).await.is_none());
        }
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let (_temp, server) = server();
        let resp = call(&server, json!({"jsonrpc": "2.0", "id": "p", "method": "ping"}))
            .await
            .unwrap();
        assert_eq!(resp.result, Some(json!({})));
        assert_eq!(resp.id, json!("p"));
    }

    #[tokio::test]
    async fn tools_list_is_sorted_with_titles() {
        let (_temp, server) = server();
        let resp = call(&server, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "categorize_transactions",
                "get_categories",
                "get_uncategorized_transactions"
            ]
        );
        assert_eq!(tools[1]["title"], "Get Budget Categories");
        assert_eq!(tools[1]["inputSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn tools_call_returns_text_content() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call",
                   "params": {"name": "get_uncategorized_transactions", "arguments": {"limit": 1}}}),
        )
        .await
        .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["type"], "text");
        let page: Value =
            serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
        assert_eq!(page["pagination"]["total"], 2);
        assert_eq!(page["pagination"]["hasMore"], true);
    }

    #[tokio::test]
    async fn tools_call_without_arguments_uses_defaults() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 4, "method": "tools/call",
                   "params": {"name": "get_categories"}}),
        )
        .await
        .unwrap();
        assert_eq!(resp.result.unwrap()["isError"], false);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 5, "method": "tools/call",
                   "params": {"name": "delete_budget", "arguments": {}}}),
        )
        .await
        .unwrap();
        assert!(resp.error.is_none());
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Unknown tool: delete_budget");
    }

    #[tokio::test]
    async fn invalid_arguments_are_a_tool_error() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call",
                   "params": {"name": "get_uncategorized_transactions", "arguments": {"limit": 0}}}),
        )
        .await
        .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("'limit' must be between 1 and 1000"));
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {}}),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn unknown_method_is_not_found() {
        let (_temp, server) = server();
        let resp = call(
            &server,
            json!({"jsonrpc": "2.0", "id": 8, "method": "resources/list"}),
        )
        .await
        .unwrap();
        let error = resp.error.unwrap();
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method not found: resources/list");
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error() {
        let (_temp, server) = server();
        let resp = server.handle_message("{not json").await.unwrap();
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
    }
}
