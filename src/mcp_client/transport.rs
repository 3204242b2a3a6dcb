//! JSON-RPC over stdio transport.
//!
//! Two loops bridge a child process's pipes to typed message channels:
//! - the inbound loop reads stdout in arbitrary chunks, frames it on `\n`,
//!   parses each line and forwards valid messages
//! - the outbound loop serializes messages to one JSON object per line and
//!   writes them to stdin
//!
//! A line that fails to parse is logged and dropped; it never stops the loop.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::errors::{FrameError, McpError};
use super::types::JsonRpcMessage;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Bytes requested from the child's stdout per read.
const READ_CHUNK_SIZE: usize = 4096;

/// Channel capacity between the loops and their callers.
///
/// tokio channels cannot be zero-sized; one slot keeps producers in lockstep
/// with the loop that drains them.
pub const CHANNEL_CAPACITY: usize = 1;

/// Longest slice of an offending line echoed into the logs.
const LOG_PREVIEW_CHARS: usize = 200;

/// What the inbound loop hands to readers: a decoded message, or a stream-level
/// failure the reader should know about before the channel closes.
pub type InboundItem = Result<JsonRpcMessage, McpError>;

// ─── Framing ─────────────────────────────────────────────────────────────────

/// Splits a byte stream into newline-terminated lines.
///
/// The trailing fragment after the last `\n` stays buffered until a later
/// chunk completes it, or until [`LineFramer::finish`] at end of stream.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed (without the `\n`).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        // The carried-over fragment holds no newline, so only the new bytes
        // need scanning.
        let scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let Some(last) = self.buffer[scan_from..].iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(scan_from + last + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete[..complete.len() - 1]
            .split(|b| *b == b'\n')
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Take the unterminated remainder, if it holds anything but whitespace.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(rest)
        }
    }
}

/// Decode one line into a validated message.
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_frame(line: &[u8]) -> Result<Option<JsonRpcMessage>, FrameError> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let message: JsonRpcMessage = serde_json::from_str(text)?;
    message.kind().map_err(FrameError::InvalidMessage)?;
    Ok(Some(message))
}

/// Encode one message as a newline-terminated JSON line.
pub fn encode_frame(message: &JsonRpcMessage) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    match text.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...(truncated)", &text[..cut]),
        None => text.to_string(),
    }
}

// ─── Loops ───────────────────────────────────────────────────────────────────

/// Parse one line and forward it. Returns `false` once nobody is listening.
async fn deliver(server: &str, line: &[u8], tx: &mpsc::Sender<InboundItem>) -> bool {
    match parse_frame(line) {
        Ok(Some(message)) => {
            tracing::trace!(server, id = %message.id_label(), "received message");
            if tx.send(Ok(message)).await.is_err() {
                tracing::debug!(server, "inbound channel closed");
                return false;
            }
            true
        }
        Ok(None) => true,
        Err(e) => {
            tracing::error!(server, error = %e, line = %preview(line), "discarding malformed frame");
            true
        }
    }
}

/// Read the child's stdout until EOF, forwarding each valid message.
pub async fn run_inbound<R>(server: String, mut reader: R, tx: mpsc::Sender<InboundItem>)
where
    R: AsyncRead + Unpin,
{
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                for line in framer.push(&chunk[..n]) {
                    if !deliver(&server, &line, &tx).await {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(server = %server, error = %e, "failed to read from server stdout");
                let _ = tx
                    .send(Err(McpError::TransportError {
                        reason: format!("failed to read from stdout: {e}"),
                    }))
                    .await;
                return;
            }
        }
    }

    if let Some(rest) = framer.finish() {
        tracing::debug!(server = %server, bytes = rest.len(), "parsing leftover buffer at end of stream");
        deliver(&server, &rest, &tx).await;
    }
    tracing::debug!(server = %server, "server stdout closed");
}

/// Write queued messages to the child's stdin until the channel closes or a
/// write fails. Dropping the writer on return closes the child's stdin.
pub async fn run_outbound<W>(server: String, mut writer: W, mut rx: mpsc::Receiver<JsonRpcMessage>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let bytes = match encode_frame(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(server = %server, id = %message.id_label(), error = %e, "failed to serialize message");
                continue;
            }
        };

        tracing::trace!(server = %server, id = %message.id_label(), "sending message");
        let written = async {
            writer.write_all(&bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            tracing::error!(server = %server, error = %e, "failed to write to server stdin");
            return;
        }
    }

    let _ = writer.shutdown().await;
    tracing::debug!(server = %server, "outbound channel closed");
}

// ─── Channels ────────────────────────────────────────────────────────────────

/// The caller's side of a running transport.
///
/// The receiver sits behind an async mutex so the request helpers can share
/// the connection through `&self`; callers still wait on one reply at a time.
pub struct MessageChannels {
    outbound: mpsc::Sender<JsonRpcMessage>,
    inbound: Mutex<mpsc::Receiver<InboundItem>>,
}

impl MessageChannels {
    pub fn new(outbound: mpsc::Sender<JsonRpcMessage>, inbound: mpsc::Receiver<InboundItem>) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
        }
    }

    pub fn sender(&self) -> &mpsc::Sender<JsonRpcMessage> {
        &self.outbound
    }

    pub fn receiver(&self) -> &Mutex<mpsc::Receiver<InboundItem>> {
        &self.inbound
    }

    /// Channels with no loops behind them, plus the "server" ends for tests.
    #[cfg(test)]
    pub(crate) fn in_memory() -> (Self, mpsc::Receiver<JsonRpcMessage>, mpsc::Sender<InboundItem>) {
        let (out_tx, out_rx) = mpsc::channel(16);
        let (in_tx, in_rx) = mpsc::channel(16);
        (Self::new(out_tx, in_rx), out_rx, in_tx)
    }
}

/// Join handles of the two transport loops.
pub struct TransportTasks {
    pub inbound: JoinHandle<()>,
    pub outbound: JoinHandle<()>,
}

/// Start both loops over the given pipes.
pub fn start<R, W>(server: &str, reader: R, writer: W) -> (MessageChannels, TransportTasks)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let inbound = tokio::spawn(run_inbound(server.to_string(), reader, in_tx));
    let outbound = tokio::spawn(run_outbound(server.to_string(), writer, out_rx));

    (
        MessageChannels::new(out_tx, in_rx),
        TransportTasks { inbound, outbound },
    )
}

// ─── Tests ───────────────────────────────────────────────────────────────────
