//! Shared types for the MCP client.
//!
//! The JSON-RPC 2.0 wire message, the MCP handshake payloads, and the launch
//! parameters for a server process.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::McpError;

/// Protocol version this client speaks during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version tag written on every outgoing message.
pub const JSONRPC_VERSION: &str = "2.0";

fn default_jsonrpc() -> String {
    JSONRPC_VERSION.to_string()
}

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// Correlation token linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => f.write_str(s),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC message as it travels over the wire.
///
/// One struct covers requests, notifications and both response shapes; use
/// [`JsonRpcMessage::kind`] to find out which one a decoded message is.
/// Fields this client does not know about are kept in `extra` and written
/// back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The four legal shapes of a [`JsonRpcMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Notification,
    Response,
    ErrorResponse,
}

impl Default for JsonRpcMessage {
    fn default() -> Self {
        Self {
            jsonrpc: default_jsonrpc(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
            extra: Map::new(),
        }
    }
}

impl JsonRpcMessage {
    /// Create a request expecting a reply.
    pub fn request(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self {
            id: Some(id.into()),
            method: Some(method.to_string()),
            params,
            ..Self::default()
        }
    }

    /// Create a one-way notification (no `id`).
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            method: Some(method.to_string()),
            params,
            ..Self::default()
        }
    }

    /// Create a success response.
    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            result: Some(result),
            ..Self::default()
        }
    }

    /// Create an error response.
    pub fn error_response(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            id: Some(id.into()),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Classify the message, rejecting field combinations JSON-RPC forbids.
    pub fn kind(&self) -> Result<MessageKind, String> {
        if self.result.is_some() && self.error.is_some() {
            return Err("message carries both `result` and `error`".into());
        }

        match (&self.id, &self.method) {
            (_, Some(_)) if self.result.is_some() || self.error.is_some() => {
                Err("message carries a `method` alongside a response payload".into())
            }
            (Some(_), Some(_)) => Ok(MessageKind::Request),
            (None, Some(_)) => Ok(MessageKind::Notification),
            (Some(_), None) if self.result.is_some() => Ok(MessageKind::Response),
            (Some(_), None) if self.error.is_some() => Ok(MessageKind::ErrorResponse),
            (Some(_), None) => Err("response carries neither `result` nor `error`".into()),
            (None, None) => Err("message has neither `id` nor `method`".into()),
        }
    }

    /// The `id` rendered as text, or `"-"` for notifications (for logging).
    pub fn id_label(&self) -> String {
        self.id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

// ─── MCP Handshake ───────────────────────────────────────────────────────────

/// Name/version pair identifying a client or server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    /// Identity this crate announces to servers.
    pub fn this_client() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Roots capability declared by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Capabilities the client declares in `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            roots: Some(RootsCapability { list_changed: true }),
            sampling: Some(Value::Object(Map::new())),
        }
    }
}

/// Params of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::this_client(),
        }
    }
}

/// Validated `initialize` result: only produced when the server's reply has
/// a protocol version, a capabilities object and a server identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Map<String, Value>,
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// ─── Server Launch Parameters ────────────────────────────────────────────────

/// How to launch one server process.
///
/// `env: None` means "use the allow-listed default environment"; an explicit
/// map replaces the environment entirely.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerParameters {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
}

impl ServerParameters {
    pub fn new(command: &str, args: &[&str]) -> Self {
        Self {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: None,
        }
    }

    /// Reject parameters that cannot name a process.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.command.trim().is_empty() {
            return Err(McpError::InvalidParameters {
                reason: "server command must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ─── Standard JSON-RPC Error Codes ───────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_omits_unset_fields() {
        let req = JsonRpcMessage::request("ping-1", "ping", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":\"ping-1\""));
        assert!(json.contains("\"method\":\"ping\""));
        assert!(!json.contains("params"));
        assert!(!json.contains("null"));
    }

    #[test]
    fn test_decode_defaults_jsonrpc_version() {
        let msg: JsonRpcMessage = serde_json::from_str(r#"{"id": 7, "result": {}}"#).unwrap();
        assert_eq!(msg.jsonrpc, "2.0");
        assert_eq!(msg.id, Some(RequestId::Number(7)));
    }

    #[test]
    fn test_custom_jsonrpc_version_is_kept() {
        let msg: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc": "1.0", "method": "x"}"#).unwrap();
        assert_eq!(msg.jsonrpc, "1.0");
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let original = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "123",
            "method": "test_method",
            "params": {"key": "value"},
            "extra_field": "extra_value",
            "another_field": 123,
            "nested": {"a": [1, 2, 3]}
        });

        let msg: JsonRpcMessage = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(msg.extra.get("extra_field"), Some(&serde_json::json!("extra_value")));
        assert_eq!(msg.extra.get("another_field"), Some(&serde_json::json!(123)));

        let reencoded = serde_json::to_value(&msg).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn test_error_response_round_trip() {
        let original = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 9,
            "error": {"code": -32600, "message": "Invalid Request", "data": {"details": "x"}},
            "_meta": {"trace": "abc"}
        });
        let msg: JsonRpcMessage = serde_json::from_value(original.clone()).unwrap();
        assert_eq!(msg.kind(), Ok(MessageKind::ErrorResponse));
        assert_eq!(serde_json::to_value(&msg).unwrap(), original);
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            JsonRpcMessage::request("a", "ping", None).kind(),
            Ok(MessageKind::Request)
        );
        assert_eq!(
            JsonRpcMessage::notification("notifications/initialized", None).kind(),
            Ok(MessageKind::Notification)
        );
        assert_eq!(
            JsonRpcMessage::response("a", serde_json::json!({})).kind(),
            Ok(MessageKind::Response)
        );
        let err = JsonRpcError {
            code: error_codes::METHOD_NOT_FOUND,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(
            JsonRpcMessage::error_response("a", err).kind(),
            Ok(MessageKind::ErrorResponse)
        );
    }

    #[test]
    fn test_kind_rejects_result_and_error_together() {
        let mut msg = JsonRpcMessage::response("a", serde_json::json!({}));
        msg.error = Some(JsonRpcError {
            code: error_codes::INTERNAL_ERROR,
            message: "boom".into(),
            data: None,
        });
        assert!(msg.kind().is_err());
    }

    #[test]
    fn test_kind_rejects_empty_message() {
        assert!(JsonRpcMessage::default().kind().is_err());
        let bare_id = JsonRpcMessage {
            id: Some("x".into()),
            ..JsonRpcMessage::default()
        };
        assert!(bare_id.kind().is_err());
    }

    #[test]
    fn test_initialize_params_wire_shape() {
        let value = serde_json::to_value(InitializeParams::default()).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["capabilities"]["roots"]["listChanged"], true);
        assert_eq!(value["clientInfo"]["name"], env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn test_initialize_result_requires_server_info() {
        let missing = serde_json::json!({"protocolVersion": "2024-11-05", "capabilities": {}});
        assert!(serde_json::from_value::<InitializeResult>(missing).is_err());

        let complete = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"logging": {}, "prompts": null},
            "serverInfo": {"name": "TestServer", "version": "1.0.0"}
        });
        let result: InitializeResult = serde_json::from_value(complete).unwrap();
        assert_eq!(result.server_info.name, "TestServer");
        assert!(result.capabilities.contains_key("logging"));
    }

    #[test]
    fn test_server_parameters_validate() {
        assert!(ServerParameters::new("python3", &["-m", "server"]).validate().is_ok());
        let err = ServerParameters::new("  ", &[]).validate().unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }
}
