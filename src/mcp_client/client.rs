//! MCP Client — one connection to one stdio server.
//!
//! Owns the child process, the two transport loops, the request builders and
//! the handshake state. `close()` is the only orderly way down: it closes the
//! channels, runs the shutdown escalation and makes sure both loops have
//! stopped. Dropping a client without closing it still kills the child.

use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::handshake::{Handshake, HandshakeState};
use super::lifecycle::{self, ServerProcess, ShutdownOutcome, SHUTDOWN_TIMEOUT};
use super::requests::RequestBuilder;
use super::transport::{self, MessageChannels, TransportTasks};
use super::types::{InitializeResult, ServerParameters};

// ─── StdioClient ─────────────────────────────────────────────────────────────

/// A live connection to an MCP server over its stdio.
pub struct StdioClient {
    name: String,
    process: ServerProcess,
    channels: MessageChannels,
    tasks: TransportTasks,
    requests: RequestBuilder,
    handshake: Handshake,
    shutdown_timeout: Duration,
}

impl StdioClient {
    /// Spawn the server and start the transport loops.
    ///
    /// The handshake is not performed; call [`StdioClient::initialize`].
    pub async fn connect(name: &str, params: &ServerParameters) -> Result<Self, McpError> {
        let mut process = lifecycle::spawn_server(name, params)?;

        let Some((stdin, stdout)) = process.take_stdio() else {
            process.terminate().await;
            return Err(McpError::SpawnFailed {
                name: name.to_string(),
                reason: "server stdio already taken".into(),
            });
        };

        let (channels, tasks) = transport::start(name, stdout, stdin);
        tracing::info!(server = %name, pid = ?process.id(), "transport started");

        Ok(Self {
            name: name.to_string(),
            process,
            channels,
            tasks,
            requests: RequestBuilder::new(),
            handshake: Handshake::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the timeout for list and tool-call requests.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.requests.set_timeout(timeout);
    }

    /// Set how long each shutdown step waits before escalating.
    pub fn set_shutdown_timeout(&mut self, timeout: Duration) {
        self.shutdown_timeout = timeout;
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Check if the server process is still running.
    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    // ─── Protocol ────────────────────────────────────────────────────────

    /// Perform the initialize handshake. `None` means it failed.
    pub async fn initialize(&mut self) -> Option<InitializeResult> {
        self.handshake.initialize(&self.channels, &self.requests).await
    }

    pub async fn ping(&self) -> bool {
        self.requests.ping(&self.channels).await
    }

    pub async fn list_tools(&self) -> Result<Value, McpError> {
        self.requests.list_tools(&self.channels).await
    }

    pub async fn list_resources(&self) -> Result<Value, McpError> {
        self.requests.list_resources(&self.channels).await
    }

    pub async fn list_prompts(&self) -> Result<Value, McpError> {
        self.requests.list_prompts(&self.channels).await
    }

    /// Invoke a tool. Failures come back as `{"isError": true, "error": ...}`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        self.requests.call_tool(&self.channels, name, arguments).await
    }

    // ─── Teardown ────────────────────────────────────────────────────────

    /// Close the connection and stop the server.
    ///
    /// Closing the outbound channel lets the writer loop finish and drop the
    /// child's stdin; the shutdown escalation then takes over. Both loops
    /// are stopped (or aborted) before this returns.
    pub async fn close(self) -> ShutdownOutcome {
        let Self {
            name,
            mut process,
            channels,
            tasks,
            shutdown_timeout,
            ..
        } = self;

        tracing::info!(server = %name, "closing connection");
        drop(channels);

        join_or_abort(&name, "outbound", tasks.outbound, shutdown_timeout).await;
        let outcome = process.shutdown(shutdown_timeout).await;
        join_or_abort(&name, "inbound", tasks.inbound, shutdown_timeout).await;

        outcome
    }
}

/// Wait for a transport loop to finish, aborting it after `timeout`.
async fn join_or_abort(server: &str, which: &str, handle: JoinHandle<()>, timeout: Duration) {
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => tracing::debug!(server, loop_name = which, "transport loop stopped"),
        Ok(Err(e)) => tracing::error!(server, loop_name = which, error = %e, "transport loop failed"),
        Err(_) => {
            tracing::warn!(server, loop_name = which, "transport loop did not stop, aborting");
            abort.abort();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::mcp_client::requests::{extract_list, is_tool_error};

    /// A tiny line-oriented MCP server written in shell: answers initialize,
    /// tools/list and tools/call by id, ignores notifications, and prints a
    /// garbage line first to exercise fault isolation.
    const FAKE_SERVER: &str = r#"
echo 'not json at all'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([^"]*\)".*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"0.0.1"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
      printf '{"jsonrpc":"2.0","id":"%s","result":{"tools":[{"name":"echo","inputSchema":{}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":"%s","error":{"code":-32602,"message":"bad arguments"}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":"%s","result":{}}\n' "$id" ;;
  esac
done
"#;

    fn fake_server() -> ServerParameters {
        ServerParameters::new("/bin/sh", &["-c", FAKE_SERVER])
    }

    #[tokio::test]
    async fn test_full_session_against_fake_server() {
        let mut client = StdioClient::connect("fake", &fake_server()).await.unwrap();
        client.set_shutdown_timeout(Duration::from_secs(2));

        let init = client.initialize().await.unwrap();
        assert_eq!(init.server_info.name, "fake");
        assert_eq!(client.handshake_state(), HandshakeState::Initialized);

        assert!(client.ping().await);

        let tools = client.list_tools().await.unwrap();
        let tools = extract_list(&tools, "tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "echo");

        let outcome = client.call_tool("echo", serde_json::json!({"x": 1})).await;
        assert!(is_tool_error(&outcome));
        assert!(outcome["error"].as_str().unwrap().contains("bad arguments"));

        assert_eq!(client.close().await, ShutdownOutcome::ExitedAfterStdinClose);
    }

    #[tokio::test]
    async fn test_silent_server_fails_ping_and_gets_terminated() {
        let params = ServerParameters::new("/bin/sh", &["-c", "exec sleep 30"]);
        let mut client = StdioClient::connect("silent", &params).await.unwrap();
        client.set_shutdown_timeout(Duration::from_millis(300));

        assert!(!client.ping().await);
        assert_eq!(client.close().await, ShutdownOutcome::ExitedAfterTerm);
    }

    #[tokio::test]
    async fn test_exited_server_surfaces_as_failures() {
        let params = ServerParameters::new("/bin/sh", &["-c", "exit 0"]);
        let mut client = StdioClient::connect("gone", &params).await.unwrap();
        client.set_request_timeout(Duration::from_millis(500));

        assert!(client.initialize().await.is_none());
        assert_eq!(client.handshake_state(), HandshakeState::Failed);

        let outcome = client.call_tool("anything", serde_json::json!({})).await;
        assert!(is_tool_error(&outcome));

        // stdout can hit EOF a moment before the exit status is reapable.
        let outcome = client.close().await;
        assert!(matches!(
            outcome,
            ShutdownOutcome::AlreadyExited | ShutdownOutcome::ExitedAfterStdinClose
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_command() {
        let err = StdioClient::connect("bad", &ServerParameters::new("", &[]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }
}
