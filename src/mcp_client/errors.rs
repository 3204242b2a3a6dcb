//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur during MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Launch parameters cannot describe a process (empty command, bad args).
    #[error("invalid server parameters: {reason}")]
    InvalidParameters { reason: String },

    /// A server process failed to start.
    #[error("failed to spawn server '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// I/O failure on one of the transport pipes or channels.
    #[error("transport error: {reason}")]
    TransportError { reason: String },

    /// The inbound stream ended before a reply arrived.
    #[error("server output stream closed (process may have exited)")]
    StreamClosed,

    /// Server returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No matching reply arrived within the deadline.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The server answered `initialize` with something unusable, or a
    /// connection never completed the handshake.
    #[error("initialization failed: {reason}")]
    InitFailed { reason: String },

    /// Configuration error (missing file, unknown server, bad entry).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

/// Problems with a single line read from the server's stdout.
///
/// These never escape the inbound loop: the line is logged and dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("JSON decode error: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("not a valid JSON-RPC message: {0}")]
    InvalidMessage(String),
}
