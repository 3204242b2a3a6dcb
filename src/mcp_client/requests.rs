//! Typed MCP requests and the operations that send them.
//!
//! Each request kind draws ids from its own counter (`ping-1`, `tools-call-3`).
//! `ping` and `call_tool` never fail: they report liveness as a bool and tool
//! failures as an `{"isError": true, "error": ...}` object respectively.

use std::time::Duration;

use serde_json::Value;

use super::errors::McpError;
use super::ids::IdAllocator;
use super::router;
use super::transport::MessageChannels;
use super::types::JsonRpcMessage;

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long `ping` waits for any sign of life.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for list and tool-call requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Request kinds ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Initialize,
    Ping,
    ToolsList,
    ToolsCall,
    ResourcesList,
    PromptsList,
}

impl RequestKind {
    /// JSON-RPC method name.
    pub fn method(self) -> &'static str {
        match self {
            RequestKind::Initialize => "initialize",
            RequestKind::Ping => "ping",
            RequestKind::ToolsList => "tools/list",
            RequestKind::ToolsCall => "tools/call",
            RequestKind::ResourcesList => "resources/list",
            RequestKind::PromptsList => "prompts/list",
        }
    }

    /// Prefix of the ids allocated for this kind.
    pub fn id_prefix(self) -> &'static str {
        match self {
            RequestKind::Initialize => "init",
            RequestKind::Ping => "ping",
            RequestKind::ToolsList => "tools-list",
            RequestKind::ToolsCall => "tools-call",
            RequestKind::ResourcesList => "resources-list",
            RequestKind::PromptsList => "prompts-list",
        }
    }
}

// ─── RequestBuilder ──────────────────────────────────────────────────────────

/// Builds requests with fresh ids and sends them over a connection.
#[derive(Debug)]
pub struct RequestBuilder {
    ids: IdAllocator,
    timeout: Duration,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            ids: IdAllocator::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the timeout for list and tool-call requests.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    /// Build a request of `kind` with the next id for that kind.
    pub fn build(&self, kind: RequestKind, params: Option<Value>) -> JsonRpcMessage {
        let id = self.ids.next_id(kind.id_prefix());
        JsonRpcMessage::request(id, kind.method(), params)
    }

    /// Build a `tools/call` request.
    pub fn call_tool_request(&self, name: &str, arguments: Value) -> JsonRpcMessage {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        self.build(RequestKind::ToolsCall, Some(params))
    }

    /// Liveness probe: `true` if any message arrives within [`PING_TIMEOUT`].
    ///
    /// The reply is not checked against the ping id; any traffic from the
    /// server counts as proof it is alive.
    pub async fn ping(&self, channels: &MessageChannels) -> bool {
        let request = self.build(RequestKind::Ping, None);
        let id = request.id_label();
        tracing::debug!(id = %id, "sending ping");

        match router::send_and_receive_any(channels, request, PING_TIMEOUT).await {
            Ok(reply) => {
                tracing::debug!(id = %id, reply_id = %reply.id_label(), "ping answered");
                true
            }
            Err(McpError::Timeout { .. }) => {
                tracing::error!(id = %id, "timeout waiting for ping response");
                false
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "ping failed");
                false
            }
        }
    }

    /// `tools/list`; see [`extract_list`] for reading the `tools` array.
    pub async fn list_tools(&self, channels: &MessageChannels) -> Result<Value, McpError> {
        self.list(channels, RequestKind::ToolsList).await
    }

    /// `resources/list`.
    pub async fn list_resources(&self, channels: &MessageChannels) -> Result<Value, McpError> {
        self.list(channels, RequestKind::ResourcesList).await
    }

    /// `prompts/list`.
    pub async fn list_prompts(&self, channels: &MessageChannels) -> Result<Value, McpError> {
        self.list(channels, RequestKind::PromptsList).await
    }

    async fn list(&self, channels: &MessageChannels, kind: RequestKind) -> Result<Value, McpError> {
        let request = self.build(kind, None);
        let response = router::send_request(channels, request, self.timeout).await?;
        Ok(router::extract_result(response)?.unwrap_or_else(|| Value::Array(Vec::new())))
    }

    /// `tools/call`. Returns the server's result, or a failure object
    /// `{"isError": true, "error": "<description>"}` when the call timed out,
    /// the transport failed, or the server answered with an error.
    pub async fn call_tool(&self, channels: &MessageChannels, name: &str, arguments: Value) -> Value {
        let request = self.call_tool_request(name, arguments);
        let id = request.id_label();

        let outcome = router::send_request(channels, request, self.timeout)
            .await
            .and_then(router::extract_result);

        match outcome {
            Ok(result) => {
                tracing::debug!(id = %id, tool = name, "tool call completed");
                result.unwrap_or_else(|| Value::Object(serde_json::Map::new()))
            }
            Err(e) => {
                tracing::warn!(id = %id, tool = name, error = %e, "tool call failed");
                tool_error(&e.to_string())
            }
        }
    }
}

// ─── Result helpers ──────────────────────────────────────────────────────────

/// The normalized failure object returned by [`RequestBuilder::call_tool`].
pub fn tool_error(description: &str) -> Value {
    serde_json::json!({
        "isError": true,
        "error": description,
    })
}

/// Whether a `call_tool` outcome is a failure.
pub fn is_tool_error(outcome: &Value) -> bool {
    outcome.get("isError").and_then(Value::as_bool).unwrap_or(false)
}

/// Pull the item list out of a list result.
///
/// Accepts `{"<key>": [...]}` or a bare array; anything else is empty.
pub fn extract_list(result: &Value, key: &str) -> Vec<Value> {
    match result {
        Value::Array(items) => items.clone(),
        Value::Object(map) => map
            .get(key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Join the `text` items of a tool result's `content` array.
pub fn format_tool_content(result: &Value) -> String {
    match result.get("content") {
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .map(|item| item.get("text").and_then(Value::as_str).unwrap_or("No content"))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
