//! MCP Protocol Types
//!
//! JSON-RPC 2.0 message types for the client side of the Model Context Protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP Protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC Notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: None,
        }
    }
}

/// Request ID (can be string, number, or null)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    Null,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Initialize request parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Client info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Initialize response result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    pub server_info: ServerInfo,
}

/// Tool definition advertised by a server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// Tools list result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<McpTool>,
}

/// Tool call parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

/// Content block in tool results.
///
/// Servers may send block types this client does not model; those are kept
/// verbatim as [`ContentBlock::Other`] so a successful call never fails to
/// parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    /// Unrecognized or malformed block, as received
    Other(Value),
}

/// Wire shape of the block types modelled above
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum KnownBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

impl From<Value> for ContentBlock {
    fn from(value: Value) -> Self {
        match KnownBlock::deserialize(&value) {
            Ok(KnownBlock::Text { text }) => ContentBlock::Text { text },
            Ok(KnownBlock::Image { data, mime_type }) => ContentBlock::Image { data, mime_type },
            Ok(KnownBlock::Resource { resource }) => ContentBlock::Resource { resource },
            Err(_) => ContentBlock::Other(value),
        }
    }
}

impl From<ContentBlock> for Value {
    fn from(block: ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => serde_json::json!({"type": "text", "text": text}),
            ContentBlock::Image { data, mime_type } => {
                serde_json::json!({"type": "image", "data": data, "mimeType": mime_type})
            }
            ContentBlock::Resource { resource } => {
                serde_json::json!({"type": "resource", "resource": resource})
            }
            ContentBlock::Other(value) => value,
        }
    }
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Text of a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Block type as sent on the wire
    pub fn block_type(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { .. } => Some("text"),
            ContentBlock::Image { .. } => Some("image"),
            ContentBlock::Resource { .. } => Some("resource"),
            ContentBlock::Other(value) => value.get("type").and_then(Value::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(7i64, "tools/call")
            .with_params(json!({"name": "process_refund", "arguments": {}}));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/call");
    }

    #[test]
    fn test_notification_has_no_id() {
        let value = serde_json::to_value(JsonRpcNotification::new("notifications/initialized")).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_tool_call_result_parsing() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Refund processed"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"}
            ],
            "isError": false
        }))
        .unwrap();

        assert_eq!(result.content.len(), 2);
        assert_eq!(result.content[0].as_text(), Some("Refund processed"));
        assert_eq!(result.content[1].as_text(), None);
        assert_eq!(result.is_error, Some(false));
    }

    #[test]
    fn test_unknown_block_types_are_kept() {
        let audio = json!({"type": "audio", "data": "UklGRg==", "mimeType": "audio/wav"});
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "Refund processed"},
                audio.clone(),
                {"type": "text"}
            ]
        }))
        .unwrap();

        assert_eq!(result.content[0].as_text(), Some("Refund processed"));
        assert_eq!(result.content[1], ContentBlock::Other(audio.clone()));
        assert_eq!(result.content[1].block_type(), Some("audio"));
        assert_eq!(result.content[2], ContentBlock::Other(json!({"type": "text"})));

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][1], audio);
        assert_eq!(value["content"][0], json!({"type": "text", "text": "Refund processed"}));
    }

    #[test]
    fn test_error_response_parsing() {
        let response: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32602, "message": "Unknown tool"}
        }))
        .unwrap();
        assert_eq!(response.id, RequestId::Number(3));
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32602);
    }
}
