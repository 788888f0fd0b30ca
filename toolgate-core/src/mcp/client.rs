//! MCP client
//!
//! Connects to an MCP server over a [`ClientTransport`], performs the
//! initialize handshake, discovers tools and forwards tool calls. Requests are
//! serialized over the transport; one request is in flight at a time.

use super::McpError;
use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, MCP_PROTOCOL_VERSION, McpTool, RequestId, ServerInfo, ToolCallParams,
    ToolCallResult, ToolsListResult,
};
use super::transport::{ChildProcessTransport, ClientTransport};
use crate::executor::{ExecutorError, ToolExecutor, ToolOutput};
use crate::request::Arguments;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

/// Client name sent during initialization
pub const CLIENT_NAME: &str = "toolgate";

/// MCP client bound to one server
pub struct McpClient {
    transport: Mutex<Box<dyn ClientTransport>>,
    next_id: AtomicI64,
    server_info: Option<ServerInfo>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("server_info", &self.server_info)
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Connect over an existing transport and run the handshake
    pub async fn connect(transport: impl ClientTransport + 'static) -> Result<Self, McpError> {
        let transport: Box<dyn ClientTransport> = Box::new(transport);
        let mut client = Self {
            transport: Mutex::new(transport),
            next_id: AtomicI64::new(1),
            server_info: None,
        };
        client.initialize().await?;
        Ok(client)
    }

    /// Spawn a server process and connect to it over stdio
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self, McpError> {
        let transport = ChildProcessTransport::spawn(program, args)?;
        Self::connect(transport).await
    }

    /// Server identity reported during initialization
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
        };

        let result = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)?;

        if init.protocol_version != MCP_PROTOCOL_VERSION {
            tracing::warn!(
                server_version = %init.protocol_version,
                client_version = MCP_PROTOCOL_VERSION,
                "MCP protocol version mismatch"
            );
        }

        self.notify("notifications/initialized").await?;

        tracing::info!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            "MCP client initialized"
        );
        self.server_info = Some(init.server_info);
        Ok(())
    }

    /// Send a request and wait for the response with the same id
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = JsonRpcRequest::new(id, method);
        request.params = params;
        let message = serde_json::to_string(&request)?;

        tracing::debug!(method = %method, id = id, "Sending MCP request");

        let mut transport = self.transport.lock().await;
        transport.send(&message).await?;

        loop {
            let line = transport.receive().await?.ok_or_else(|| {
                McpError::ServerUnavailable("Server closed the connection".to_string())
            })?;

            let value: Value = serde_json::from_str(&line)?;
            if value.get("id").is_none() {
                tracing::debug!(line = %line, "Ignoring server notification");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(value)?;
            if response.id != RequestId::Number(id) {
                tracing::warn!(expected = id, got = ?response.id, "Ignoring response for another request");
                continue;
            }

            if let Some(error) = response.error {
                return Err(McpError::Rpc {
                    code: error.code,
                    message: error.message,
                });
            }
            return response
                .result
                .ok_or_else(|| McpError::Protocol(format!("Response to {} has no result", method)));
        }
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method))?;
        self.transport.lock().await.send(&message).await
    }

    /// Tools advertised by the server
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let result = self.request("tools/list", None).await?;
        let list: ToolsListResult = serde_json::from_value(result)?;
        tracing::debug!(count = list.tools.len(), "Tool discovery complete");
        Ok(list.tools)
    }

    /// Call a tool and return the raw result object
    pub async fn call_tool_raw(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let raw = self.call_tool_raw(name, arguments).await?;
        Ok(serde_json::from_value(raw)?)
    }
}

impl From<McpError> for ExecutorError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Rpc { .. } => ExecutorError::Execution(err.to_string()),
            McpError::ServerUnavailable(_) => ExecutorError::Unavailable(err.to_string()),
            McpError::Transport(_) | McpError::JsonParse(_) | McpError::Protocol(_) => {
                ExecutorError::Transport(err.to_string())
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for McpClient {
    async fn execute(&self, tool_name: &str, arguments: Arguments) -> Result<ToolOutput, ExecutorError> {
        let raw = self
            .call_tool_raw(tool_name, Value::Object(arguments))
            .await?;
        let result: ToolCallResult =
            serde_json::from_value(raw.clone()).map_err(McpError::from)?;

        Ok(ToolOutput {
            content: result.content,
            is_error: result.is_error.unwrap_or(false),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{ContentBlock, JsonRpcError};
    use crate::mcp::transport::ChannelTransport;
    use serde_json::json;
    use std::sync::Arc;

    /// Minimal MCP server: one refund tool with a server-side amount limit.
    /// Returns the methods it saw.
    fn spawn_fake_server(mut transport: ChannelTransport) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Ok(Some(line)) = transport.receive().await {
                let message: Value = serde_json::from_str(&line).unwrap();
                let method = message["method"].as_str().unwrap_or_default().to_string();
                seen.push(method.clone());

                let Some(id) = message.get("id") else {
                    continue;
                };
                let id: RequestId = serde_json::from_value(id.clone()).unwrap();

                let response = match method.as_str() {
                    "initialize" => JsonRpcResponse::success(
                        id,
                        json!({
                            "protocolVersion": MCP_PROTOCOL_VERSION,
                            "capabilities": {"tools": {}},
                            "serverInfo": {"name": "fake-finance", "version": "0.0.1"}
                        }),
                    ),
                    "tools/list" => JsonRpcResponse::success(
                        id,
                        json!({"tools": [{
                            "name": "process_refund",
                            "description": "Refund a payment",
                            "inputSchema": {"type": "object"}
                        }]}),
                    ),
                    "tools/call" => {
                        let name = message["params"]["name"].as_str().unwrap_or_default();
                        if name != "process_refund" {
                            JsonRpcResponse::error(id, JsonRpcError::new(-32602, "Unknown tool"))
                        } else {
                            let amount = message["params"]["arguments"]["amount"]
                                .as_f64()
                                .unwrap_or(0.0);
                            let agent = message["params"]["arguments"]["agent_id"]
                                .as_str()
                                .unwrap_or("unknown")
                                .to_string();
                            if amount > 500_000.0 {
                                JsonRpcResponse::success(
                                    id,
                                    json!({
                                        "content": [{"type": "text", "text": "Policy denied: amount over limit"}],
                                        "isError": true
                                    }),
                                )
                            } else if message["params"]["arguments"]["receipt"] == json!(true) {
                                JsonRpcResponse::success(
                                    id,
                                    json!({"content": [
                                        {"type": "text", "text": format!("Refund processed for {}", agent)},
                                        {"type": "audio", "data": "UklGRg==", "mimeType": "audio/wav"},
                                        {"type": "resource_link", "uri": "receipts://r-1", "name": "receipt"}
                                    ]}),
                                )
                            } else {
                                JsonRpcResponse::success(
                                    id,
                                    json!({"content": [{"type": "text", "text": format!("Refund processed for {}", agent)}]}),
                                )
                            }
                        }
                    }
                    _ => JsonRpcResponse::error(id, JsonRpcError::new(-32601, "Method not found")),
                };

                let out = serde_json::to_string(&response).unwrap();
                if transport.send(&out).await.is_err() {
                    break;
                }
            }
            seen
        })
    }

    async fn connected() -> (Arc<McpClient>, tokio::task::JoinHandle<Vec<String>>) {
        let (client_side, server_side) = ChannelTransport::pair();
        let server = spawn_fake_server(server_side);
        let client = McpClient::connect(client_side).await.unwrap();
        (Arc::new(client), server)
    }

    #[tokio::test]
    async fn test_handshake_and_list_tools() {
        let (client, server) = connected().await;
        assert_eq!(client.server_info().unwrap().name, "fake-finance");

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "process_refund");

        drop(client);
        let seen = server.await.unwrap();
        assert_eq!(seen, vec!["initialize", "notifications/initialized", "tools/list"]);
    }

    #[tokio::test]
    async fn test_execute_success() {
        let (client, _server) = connected().await;
        let mut arguments = Arguments::new();
        arguments.insert("amount".to_string(), json!(100));
        arguments.insert("agent_id".to_string(), json!("ap_7"));

        let output = client.execute("process_refund", arguments).await.unwrap();
        assert!(!output.is_error);
        assert_eq!(output.first_text(), Some("Refund processed for ap_7"));
        assert_eq!(output.raw["content"][0]["type"], "text");
    }

    #[tokio::test]
    async fn test_execute_keeps_unrecognized_content_blocks() {
        let (client, server) = connected().await;
        let mut arguments = Arguments::new();
        arguments.insert("amount".to_string(), json!(100));
        arguments.insert("agent_id".to_string(), json!("ap_7"));
        arguments.insert("receipt".to_string(), json!(true));

        let output = client.execute("process_refund", arguments).await.unwrap();
        assert!(!output.is_error);
        assert_eq!(output.first_text(), Some("Refund processed for ap_7"));
        assert_eq!(output.content.len(), 3);
        assert_eq!(output.content[1].block_type(), Some("audio"));
        assert_eq!(output.content[2].block_type(), Some("resource_link"));
        assert!(matches!(output.content[2], ContentBlock::Other(ref v) if v["uri"] == "receipts://r-1"));

        drop(client);
        let seen = server.await.unwrap();
        assert_eq!(seen.iter().filter(|m| *m == "tools/call").count(), 1);
    }

    #[tokio::test]
    async fn test_execute_server_denial_is_output_not_error() {
        let (client, _server) = connected().await;
        let mut arguments = Arguments::new();
        arguments.insert("amount".to_string(), json!(1_000_000));

        let output = client.execute("process_refund", arguments).await.unwrap();
        assert!(output.is_error);
        assert!(output.marker_text("Policy denied").is_some());
    }

    #[tokio::test]
    async fn test_rpc_error_maps_to_execution_error() {
        let (client, _server) = connected().await;
        let err = client.execute("wire_funds", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Execution(ref m) if m.contains("Unknown tool")));
    }

    #[tokio::test]
    async fn test_closed_server_is_unavailable() {
        let (client_side, server_side) = ChannelTransport::pair();
        drop(server_side);
        let err = McpClient::connect(client_side).await.unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable(_)));
    }
}
