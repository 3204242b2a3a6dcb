//! Request/response correlation over the transport channels.
//!
//! A caller sends one request and waits for the reply carrying the same
//! `id`. Anything else that arrives meanwhile (notifications, stray replies,
//! stream errors) is logged and skipped. There is no pipelining: one awaited
//! request per caller at a time.

use std::time::Duration;

use super::errors::McpError;
use super::transport::MessageChannels;
use super::types::JsonRpcMessage;

/// Send `message` and wait up to `timeout` for the reply with the same id.
///
/// The deadline covers the hand-off to the outbound loop as well as the
/// wait, so a wedged writer still surfaces as a timeout.
pub async fn send_request(
    channels: &MessageChannels,
    message: JsonRpcMessage,
    timeout: Duration,
) -> Result<JsonRpcMessage, McpError> {
    let method = message.method.clone().unwrap_or_default();
    let Some(id) = message.id.clone() else {
        return Err(McpError::InvalidParameters {
            reason: format!("request '{method}' has no id"),
        });
    };

    let exchange = async {
        send_message(channels, message).await?;
        wait_for(channels, |reply| reply.id.as_ref() == Some(&id)).await
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| {
            tracing::warn!(id = %id, method = %method, ?timeout, "request timed out");
            timeout_error(method, timeout)
        })?
}

/// Send a notification without waiting for anything back.
pub async fn send_notification(
    channels: &MessageChannels,
    message: JsonRpcMessage,
) -> Result<(), McpError> {
    send_message(channels, message).await
}

/// Send `message` and accept the first well-formed message that comes back,
/// whatever its id. Used for liveness probes.
pub async fn send_and_receive_any(
    channels: &MessageChannels,
    message: JsonRpcMessage,
    timeout: Duration,
) -> Result<JsonRpcMessage, McpError> {
    let method = message.method.clone().unwrap_or_default();
    let exchange = async {
        send_message(channels, message).await?;
        wait_for(channels, |_| true).await
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| timeout_error(method, timeout))?
}

fn timeout_error(method: String, timeout: Duration) -> McpError {
    McpError::Timeout {
        method,
        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

async fn send_message(channels: &MessageChannels, message: JsonRpcMessage) -> Result<(), McpError> {
    channels
        .sender()
        .send(message)
        .await
        .map_err(|_| McpError::TransportError {
            reason: "outbound channel closed".into(),
        })
}

/// Read inbound items until one satisfies `matches`.
///
/// Returns `StreamClosed` if the inbound loop has gone away, so callers never
/// wait on a channel that can no longer produce anything.
async fn wait_for<F>(channels: &MessageChannels, matches: F) -> Result<JsonRpcMessage, McpError>
where
    F: Fn(&JsonRpcMessage) -> bool,
{
    let mut inbound = channels.receiver().lock().await;

    loop {
        match inbound.recv().await {
            Some(Ok(message)) if matches(&message) => return Ok(message),
            Some(Ok(message)) => {
                tracing::debug!(
                    id = %message.id_label(),
                    method = message.method.as_deref().unwrap_or("-"),
                    "skipping unrelated message"
                );
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, "error from server stream while waiting for reply");
            }
            None => return Err(McpError::StreamClosed),
        }
    }
}

/// Convert an error reply into `McpError::ServerError`, passing results through.
pub fn extract_result(response: JsonRpcMessage) -> Result<Option<serde_json::Value>, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }
    Ok(response.result)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::{error_codes, JsonRpcError};

    #[tokio::test]
    async fn test_send_request_skips_unrelated_messages() {
        let (channels, mut sent, replies) = MessageChannels::in_memory();

        replies
            .send(Ok(JsonRpcMessage::notification("notifications/progress", None)))
            .await
            .unwrap();
        replies
            .send(Err(McpError::TransportError { reason: "noise".into() }))
            .await
            .unwrap();
        replies
            .send(Ok(JsonRpcMessage::response("other-1", serde_json::json!({}))))
            .await
            .unwrap();
        replies
            .send(Ok(JsonRpcMessage::response("tools-list-1", serde_json::json!({"tools": []}))))
            .await
            .unwrap();

        let request = JsonRpcMessage::request("tools-list-1", "tools/list", None);
        let reply = send_request(&channels, request, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(reply.result, Some(serde_json::json!({"tools": []})));
        let outgoing = sent.recv().await.unwrap();
        assert_eq!(outgoing.method.as_deref(), Some("tools/list"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_request_times_out() {
        let (channels, _sent, _replies) = MessageChannels::in_memory();
        let request = JsonRpcMessage::request("ping-1", "ping", None);

        let err = send_request(&channels, request, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            McpError::Timeout { method, timeout_ms } => {
                assert_eq!(method, "ping");
                assert_eq!(timeout_ms, 5000);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_error_saturates_huge_durations() {
        match timeout_error("tools/call".into(), Duration::MAX) {
            McpError::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, u64::MAX),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_request_times_out_when_only_noise_arrives() {
        let (channels, _sent, replies) = MessageChannels::in_memory();
        tokio::spawn(async move {
            loop {
                let noise = JsonRpcMessage::notification("notifications/message", None);
                if replies.send(Ok(noise)).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });

        let request = JsonRpcMessage::request("ping-1", "ping", None);
        let err = send_request(&channels, request, Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_send_request_reports_closed_stream() {
        let (channels, _sent, replies) = MessageChannels::in_memory();
        drop(replies);
        let request = JsonRpcMessage::request("ping-1", "ping", None);
        let err = send_request(&channels, request, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::StreamClosed));
    }

    #[tokio::test]
    async fn test_send_request_reports_closed_outbound() {
        let (channels, sent, _replies) = MessageChannels::in_memory();
        drop(sent);
        let request = JsonRpcMessage::request("ping-1", "ping", None);
        let err = send_request(&channels, request, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_send_request_without_id_is_rejected() {
        let (channels, _sent, _replies) = MessageChannels::in_memory();
        let err = send_request(
            &channels,
            JsonRpcMessage::notification("ping", None),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn test_send_notification_does_not_wait() {
        let (channels, mut sent, _replies) = MessageChannels::in_memory();
        send_notification(&channels, JsonRpcMessage::notification("notifications/initialized", None))
            .await
            .unwrap();
        let outgoing = sent.recv().await.unwrap();
        assert!(outgoing.id.is_none());
    }

    #[tokio::test]
    async fn test_send_and_receive_any_skips_stream_errors() {
        let (channels, mut sent, replies) = MessageChannels::in_memory();
        replies
            .send(Err(McpError::TransportError { reason: "bad".into() }))
            .await
            .unwrap();
        replies
            .send(Ok(JsonRpcMessage::notification("notifications/message", None)))
            .await
            .unwrap();

        let probe = JsonRpcMessage::request("ping-1", "ping", None);
        let msg = send_and_receive_any(&channels, probe, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(msg.method.as_deref(), Some("notifications/message"));
        assert_eq!(sent.recv().await.unwrap().method.as_deref(), Some("ping"));
    }

    #[test]
    fn test_extract_result_success_and_error() {
        let ok = JsonRpcMessage::response("a", serde_json::json!({"text": "hello"}));
        assert_eq!(extract_result(ok).unwrap().unwrap()["text"], "hello");

        let err = JsonRpcMessage::error_response(
            "a",
            JsonRpcError {
                code: error_codes::METHOD_NOT_FOUND,
                message: "Method not found".into(),
                data: None,
            },
        );
        match extract_result(err).unwrap_err() {
            McpError::ServerError { code, message, .. } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Method not found");
            }
            other => panic!("expected ServerError, got {other:?}"),
        }
    }
}
