//! STDIO transport — line-delimited JSON-RPC framing over stdin/stdout.
//!
//! Follows the same mutex discipline as a well-behaved single-connection
//! transport: plain state (never held across an `.await`) behind a
//! `std::sync::Mutex`, I/O handles (which do cross `.await` points) behind a
//! `tokio::sync::Mutex`. stdout carries protocol frames only — nothing else
//! may ever be written to it; diagnostics go to stderr via `tracing`.

use std::sync::Mutex as StdMutex;

use bridgemcp_core::{Error, ErrorKind, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

/// Lifecycle state of a STDIO connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Failed { reason: String },
}

/// Rejects messages containing a literal (unescaped) newline or carriage
/// return, since those would corrupt line-delimited framing. A `\n` that
/// appears *escaped* inside a JSON string value (`"\\n"` in the serialized
/// bytes) is fine — only a raw `0x0A`/`0x0D` byte in the frame is rejected.
fn validate_frame(line: &str) -> Result<()> {
    if line.contains('\n') || line.contains('\r') {
        return Err(Error::new(
            ErrorKind::InvalidRequest,
            "message contains a literal newline or carriage return; framing would break",
        ));
    }
    Ok(())
}

/// A line-delimited JSON-RPC transport over an arbitrary `AsyncRead` +
/// `AsyncWrite` pair — in production stdin/stdout, in tests an in-memory
/// duplex pipe.
pub struct StdioTransport<R, W> {
    state: StdMutex<TransportState>,
    reader: AsyncMutex<FramedRead<R, LinesCodec>>,
    writer: AsyncMutex<FramedWrite<W, LinesCodec>>,
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            state: StdMutex::new(TransportState::Disconnected),
            reader: AsyncMutex::new(FramedRead::new(reader, LinesCodec::new())),
            writer: AsyncMutex::new(FramedWrite::new(writer, LinesCodec::new())),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state mutex poisoned") = state;
    }

    #[tracing::instrument(skip(self))]
    pub fn connect(&self) {
        self.set_state(TransportState::Connected);
    }

    #[tracing::instrument(skip(self))]
    pub fn disconnect(&self) {
        self.set_state(TransportState::Disconnecting);
        self.set_state(TransportState::Disconnected);
    }

    /// Reads the next line and parses it as a JSON-RPC message. Returns
    /// `Ok(None)` on clean stream close.
    #[tracing::instrument(skip(self))]
    pub async fn receive(&self) -> Result<Option<serde_json::Value>> {
        let mut reader = self.reader.lock().await;
        match reader.next().await {
            Some(Ok(line)) => {
                validate_frame(&line)?;
                let value = serde_json::from_str(&line)
                    .map_err(|e| Error::with_source(ErrorKind::InvalidRequest, "malformed JSON-RPC frame", e))?;
                Ok(Some(value))
            }
            Some(Err(e)) => {
                self.set_state(TransportState::Failed { reason: e.to_string() });
                Err(Error::with_source(ErrorKind::Internal, "stdio read failed", e))
            }
            None => Ok(None),
        }
    }

    /// Serializes `message` and writes it as one line. Rejects messages
    /// that would embed a literal newline, since that would corrupt the
    /// next frame.
    #[tracing::instrument(skip(self, message))]
    pub async fn send(&self, message: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(message)
            .map_err(|e| Error::with_source(ErrorKind::Internal, "failed to serialize message", e))?;
        validate_frame(&line)?;
        let mut writer = self.writer.lock().await;
        writer
            .send(line)
            .await
            .map_err(|e| Error::with_source(ErrorKind::Internal, "stdio write failed", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::DuplexStream;

    fn pipe() -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(4096)
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_a_message() {
        let (client_read, server_write) = pipe();
        let (server_read, client_write) = pipe();
        let _ = (client_read, client_write);

        let server = StdioTransport::new(server_read, server_write);
        server.connect();
        assert_eq!(server.state(), TransportState::Connected);

        server.send(&json!({"jsonrpc": "2.0", "method": "ping"})).await.unwrap();
    }

    #[tokio::test]
    async fn receive_rejects_frame_with_malformed_json() {
        let (tx, rx) = tokio::io::duplex(4096);
        let transport = StdioTransport::new(rx, tokio::io::sink());
        let mut writer = tx;
        tokio::io::AsyncWriteExt::write_all(&mut writer, b"not json\n").await.unwrap();
        drop(writer);

        let err = transport.receive().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn receive_returns_none_on_clean_close() {
        let (tx, rx) = tokio::io::duplex(4096);
        drop(tx);
        let transport = StdioTransport::new(rx, tokio::io::sink());
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[test]
    fn validate_frame_rejects_literal_newline_but_allows_escaped_one() {
        assert!(validate_frame("line with a literal\nbreak").is_err());
        assert!(validate_frame(r#"{"message":"escaped \n newline"}"#).is_ok());
    }

    #[tokio::test]
    async fn disconnect_transitions_through_disconnecting_to_disconnected() {
        let (_tx, rx) = tokio::io::duplex(4096);
        let transport = StdioTransport::new(rx, tokio::io::sink());
        transport.connect();
        transport.disconnect();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }
}
