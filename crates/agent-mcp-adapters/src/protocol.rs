//! JSON-RPC 2.0 envelopes and the MCP payload types carried inside them
//!
//! Only the subset a client needs is modelled: building requests and
//! notifications, classifying whatever comes back, and the typed payloads
//! of the list/read/call primitives.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol revision announced during the handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC method names used by the client and the in-process server
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const PING: &str = "ping";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCES_READ: &str = "resources/read";
}

/// Standard JSON-RPC error codes
pub mod codes {
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Build a request envelope
pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build a notification envelope (no id, no response expected)
pub fn notification(method: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method
    })
}

/// Build a successful response envelope
pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

/// Build an error response envelope
pub fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Parameters of the `initialize` request
pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
            "resources": {},
            "prompts": {}
        },
        "clientInfo": {
            "name": "agent-rs",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Error object of a JSON-RPC error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound message after classification
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Reply to one of our requests
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// The peer is asking us something
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Fire-and-forget message from the peer
    Notification { method: String },
}

impl Incoming {
    /// Classify a raw JSON-RPC message; returns `None` for anything unrecognisable
    pub fn classify(message: Value) -> Option<Self> {
        let Value::Object(mut map) = message else {
            return None;
        };

        if let Some(method) = map.get("method").and_then(Value::as_str).map(str::to_string) {
            return Some(match map.remove("id") {
                Some(id) if !id.is_null() => Self::Request {
                    id,
                    method,
                    params: map.remove("params").unwrap_or(Value::Null),
                },
                _ => Self::Notification { method },
            });
        }

        let id = match map.get("id")? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.parse().ok()?,
            _ => return None,
        };

        if let Some(error) = map.remove("error") {
            let error = serde_json::from_value(error).unwrap_or_else(|e| RpcError {
                code: codes::INTERNAL_ERROR,
                message: format!("malformed error object: {e}"),
                data: None,
            });
            return Some(Self::Response {
                id,
                outcome: Err(error),
            });
        }

        Some(Self::Response {
            id,
            outcome: Ok(map.remove("result").unwrap_or(Value::Null)),
        })
    }
}

/// MCP tool definition (from tools/list)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Remote-supplied JSON Schema; servers may omit it or send null
    #[serde(default, rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// MCP tool result (from tools/call)
///
/// `content` is kept as raw JSON: well-behaved servers send a list of typed
/// items, but anything else is handed back to the caller unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPToolResult {
    #[serde(default)]
    pub content: Value,
    #[serde(default, rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl MCPToolResult {
    /// Successful result carrying a single text item
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: json!([{ "type": "text", "text": text.into() }]),
            is_error: None,
        }
    }

    /// Failed result carrying a single text item
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: json!([{ "type": "text", "text": text.into() }]),
            is_error: Some(true),
        }
    }
}

/// MCP resource definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
}

/// MCP resource content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPResourceContent {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mimeType")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>, // base64
}

/// MCP prompt definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPPromptDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<MCPPromptArgument>>,
}

/// MCP prompt argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPPromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// MCP prompt result
///
/// Message content is left as raw JSON; turning it into chat messages is the
/// agent framework's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<MCPPromptMessage>,
}

/// MCP prompt message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPPromptMessage {
    pub role: String,
    pub content: Value,
}

/// MCP server info (from initialize)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPServerInfo {
    pub name: String,
    pub version: String,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: MCPServerCapabilities,
}

impl MCPServerInfo {
    /// Extract server info from an `initialize` result, tolerating missing fields
    pub fn from_initialize_result(result: &Value) -> Self {
        let capabilities: MCPServerCapabilities =
            serde_json::from_value(result["capabilities"].clone()).unwrap_or_default();

        Self {
            name: result["serverInfo"]["name"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            version: result["serverInfo"]["version"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            protocol_version: result["protocolVersion"]
                .as_str()
                .unwrap_or(PROTOCOL_VERSION)
                .to_string(),
            capabilities,
        }
    }

    /// The `initialize` result a server sends for this info
    pub fn to_initialize_result(&self) -> Value {
        json!({
            "protocolVersion": self.protocol_version,
            "capabilities": self.capabilities,
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }
}

/// MCP server capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MCPServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
}

/// Capability flag block shared by tools, resources and prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ListChangedCapability {
    #[serde(default, rename = "listChanged")]
    pub list_changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_response() {
        let msg = json!({"jsonrpc": "2.0", "id": 7, "result": {"tools": []}});
        assert_eq!(
            Incoming::classify(msg),
            Some(Incoming::Response {
                id: 7,
                outcome: Ok(json!({"tools": []}))
            })
        );
    }

    #[test]
    fn test_classify_string_id_and_error() {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": "3",
            "error": {"code": -32601, "message": "Method not found"}
        });
        match Incoming::classify(msg) {
            Some(Incoming::Response { id, outcome: Err(e) }) => {
                assert_eq!(id, 3);
                assert_eq!(e.code, codes::METHOD_NOT_FOUND);
                assert_eq!(e.message, "Method not found");
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn test_classify_request_and_notification() {
        let req = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"});
        assert!(matches!(
            Incoming::classify(req),
            Some(Incoming::Request { ref method, .. }) if method == "ping"
        ));

        let note = notification(methods::INITIALIZED);
        assert_eq!(
            Incoming::classify(note),
            Some(Incoming::Notification {
                method: methods::INITIALIZED.to_string()
            })
        );
    }

    #[test]
    fn test_classify_garbage() {
        assert!(Incoming::classify(json!("hello")).is_none());
        assert!(Incoming::classify(json!({"jsonrpc": "2.0"})).is_none());
    }

    #[test]
    fn test_tool_definition_null_schema() {
        let def: MCPToolDefinition =
            serde_json::from_value(json!({"name": "t", "inputSchema": null})).unwrap();
        assert!(def.input_schema.is_none());

        let def: MCPToolDefinition = serde_json::from_value(json!({"name": "t"})).unwrap();
        assert!(def.description.is_none());
        assert!(def.input_schema.is_none());
    }

    #[test]
    fn test_server_info_round_trips_through_initialize() {
        let info = MCPServerInfo {
            name: "calc".to_string(),
            version: "1.2.0".to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: MCPServerCapabilities {
                tools: Some(ListChangedCapability::default()),
                ..Default::default()
            },
        };
        let parsed = MCPServerInfo::from_initialize_result(&info.to_initialize_result());
        assert_eq!(parsed, info);
    }

    #[test]
    fn test_server_info_defaults() {
        let parsed = MCPServerInfo::from_initialize_result(&json!({}));
        assert_eq!(parsed.name, "unknown");
        assert_eq!(parsed.protocol_version, PROTOCOL_VERSION);
    }
}
