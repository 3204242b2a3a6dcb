//! MCP initialization handshake.
//!
//! `NotInitialized → InitializeSent → Initialized | Failed`. The client sends
//! `initialize`, validates the server's reply, and only then announces
//! `notifications/initialized`. Every failure ends in `Failed` with no result.

use std::time::Duration;

use super::errors::McpError;
use super::requests::{RequestBuilder, RequestKind};
use super::router;
use super::transport::MessageChannels;
use super::types::{InitializeParams, InitializeResult, JsonRpcMessage};

// ─── Constants ───────────────────────────────────────────────────────────────

/// How long to wait for the `initialize` reply.
pub const INIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Notification sent once the server's `initialize` result has been accepted.
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

// ─── Handshake ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotInitialized,
    InitializeSent,
    Initialized,
    Failed,
}

/// Drives the initialize exchange for one connection.
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    timeout: Duration,
    params: InitializeParams,
    result: Option<InitializeResult>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::NotInitialized,
            timeout: INIT_TIMEOUT,
            params: InitializeParams::default(),
            result: None,
        }
    }

    /// Override the reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The validated server reply, once initialized.
    pub fn result(&self) -> Option<&InitializeResult> {
        self.result.as_ref()
    }

    /// Run the handshake. Returns the server's validated reply, or `None` if
    /// the server errored, sent an unusable result, or never answered.
    ///
    /// Calling again after success returns the stored result without
    /// touching the wire; calling after a failure returns `None`.
    pub async fn initialize(
        &mut self,
        channels: &MessageChannels,
        builder: &RequestBuilder,
    ) -> Option<InitializeResult> {
        match self.state {
            HandshakeState::NotInitialized => {}
            HandshakeState::Initialized => return self.result.clone(),
            state => {
                tracing::warn!(?state, "initialize called again after an unfinished or failed handshake");
                return None;
            }
        }

        let params = match serde_json::to_value(&self.params) {
            Ok(params) => params,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize initialize params");
                self.state = HandshakeState::Failed;
                return None;
            }
        };
        let request = builder.build(RequestKind::Initialize, Some(params));

        tracing::info!(
            id = %request.id_label(),
            protocol_version = %self.params.protocol_version,
            timeout_s = self.timeout.as_secs(),
            "sending initialize request"
        );
        self.state = HandshakeState::InitializeSent;

        match self.exchange(channels, request).await {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    server_version = %result.server_info.version,
                    protocol_version = %result.protocol_version,
                    "server initialized"
                );
                self.state = HandshakeState::Initialized;
                self.result = Some(result.clone());
                Some(result)
            }
            Err(e) => {
                tracing::error!(error = %e, "server initialization failed");
                self.state = HandshakeState::Failed;
                None
            }
        }
    }

    async fn exchange(
        &self,
        channels: &MessageChannels,
        request: JsonRpcMessage,
    ) -> Result<InitializeResult, McpError> {
        let response = router::send_request(channels, request, self.timeout).await?;

        let Some(result) = router::extract_result(response)? else {
            return Err(McpError::InitFailed {
                reason: "initialize reply carried neither result nor error".into(),
            });
        };

        let result: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                reason: format!("failed to parse initialize result: {e}"),
            })?;

        if result.protocol_version != self.params.protocol_version {
            tracing::warn!(
                requested = %self.params.protocol_version,
                offered = %result.protocol_version,
                "server answered with a different protocol version"
            );
        }

        // The server has already accepted the session; a lost notification
        // is only logged.
        let notification = JsonRpcMessage::notification(INITIALIZED_NOTIFICATION, None);
        if let Err(e) = router::send_notification(channels, notification).await {
            tracing::warn!(error = %e, "failed to send initialized notification");
        }

        Ok(result)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
