//! MCP Client — JSON-RPC over stdio transport for MCP servers.
//!
//! This module handles:
//! - Spawning MCP server child processes with a restricted environment
//! - Newline-delimited JSON-RPC 2.0 framing over process stdio
//! - Request/response correlation with timeouts
//! - The initialize/initialized handshake
//! - Typed requests (ping, tools, resources, prompts)
//! - Graceful shutdown with SIGTERM/SIGKILL escalation

pub mod client;
pub mod config;
pub mod errors;
pub mod handshake;
pub mod ids;
pub mod lifecycle;
pub mod requests;
pub mod router;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::StdioClient;
pub use errors::{FrameError, McpError};
pub use handshake::HandshakeState;
pub use lifecycle::ShutdownOutcome;
pub use types::{InitializeResult, JsonRpcMessage, ServerParameters};
