//! JSON-RPC 2.0 and MCP wire types.
//!
//! One JSON object per WebSocket text frame; protocol version `2024-11-05`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// The MCP protocol version the proxy speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// The proxy's advertised server name.
pub const PROXY_SERVER_NAME: &str = "dcsandbox-proxy";

/// The proxy's advertised server version.
pub const PROXY_SERVER_VERSION: &str = "1.0.0";

/// JSON-RPC parse error code.
pub const PARSE_ERROR: i64 = -32700;

/// JSON-RPC method-not-found error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC invalid-params error code.
pub const INVALID_PARAMS: i64 = -32602;

/// JSON-RPC internal error code.
pub const INTERNAL_ERROR: i64 = -32603;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// The request id; absent for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    /// The method name.
    pub method: String,

    /// The method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,

    /// Echoes the request id; `null` only on pre-parse errors.
    pub id: Value,

    /// The success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// The failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// The error code.
    pub code: i64,

    /// A short description.
    pub message: String,

    /// Optional structured detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The result shape of every built-in tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Whether the tool failed.
    pub is_error: bool,

    /// The content blocks.
    pub content: Vec<ToolContent>,
}

/// One content block of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// A text block.
    Text {
        /// The text payload.
        text: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JsonRpcRequest {
    /// Creates a request with an id.
    pub fn new(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params,
        }
    }

    /// Creates a notification (no id, no reply expected).
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }

    /// Returns whether this message is a notification.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

impl JsonRpcResponse {
    /// Creates a success response echoing the request id.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a failure response echoing the request id.
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

impl ToolResult {
    /// Creates a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            is_error: false,
            content: vec![ToolContent::Text { text: text.into() }],
        }
    }

    /// Creates a failed text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: vec![ToolContent::Text { text: text.into() }],
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The payload of the unsolicited `initialized` notification, also mirrored
/// as the `initialize` result.
pub fn initialize_payload() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {},
        },
        "serverInfo": {
            "name": PROXY_SERVER_NAME,
            "version": PROXY_SERVER_VERSION,
        },
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id_on_the_wire() {
        let n = JsonRpcRequest::notification("initialized", Some(initialize_payload()));
        let wire = serde_json::to_value(&n).unwrap();
        assert!(wire.get("id").is_none());
        assert_eq!(wire["jsonrpc"], "2.0");
    }

    #[test]
    fn test_response_echoes_id() {
        let r = JsonRpcResponse::success(json!(7), json!({"ok": true}));
        let wire = serde_json::to_value(&r).unwrap();
        assert_eq!(wire["id"], json!(7));
        assert!(wire.get("error").is_none());
    }

    #[test]
    fn test_tool_result_shape() {
        let wire = serde_json::to_value(ToolResult::error("boom")).unwrap();
        assert_eq!(wire["isError"], json!(true));
        assert_eq!(wire["content"][0]["type"], json!("text"));
        assert_eq!(wire["content"][0]["text"], json!("boom"));
    }

    #[test]
    fn test_initialize_payload_pins_protocol_version() {
        let payload = initialize_payload();
        assert_eq!(payload["protocolVersion"], json!("2024-11-05"));
        assert_eq!(payload["serverInfo"]["name"], json!("dcsandbox-proxy"));
    }
}
