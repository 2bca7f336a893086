//! stdio transport.
//!
//! - Messages are UTF-8 encoded JSON-RPC
//! - Messages are delimited by newlines
//! - Messages must not contain embedded newlines
//! - stdin: receives messages from client
//! - stdout: sends messages to client
//! - stderr: may be used for logging (not MCP messages)
//!
//! Every line is handled on its own task, so a slow tool never holds up the
//! lines behind it. Responses can therefore leave in a different order than
//! their requests arrived; clients correlate by id.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::mcp::connection::{Connection, MessageSink, TransportKind};
use crate::mcp::engine::ProtocolEngine;
use crate::mcp::protocol::JsonRpcError;

/// Writes newline-terminated frames to a byte stream.
pub struct LineSink<W> {
    writer: W,
}

impl<W> LineSink<W> {
    /// Wraps a writer.
    pub const fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for LineSink<W> {
    async fn send(&mut self, message: String) -> io::Result<()> {
        // Frames must not contain embedded newlines
        debug_assert!(
            !message.contains('\n'),
            "JSON message must not contain embedded newlines"
        );

        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        Ok(())
    }
}

/// A newline-delimited transport over a reader/writer pair.
///
/// [`StdioTransport::new`] binds it to the process's stdin and stdout; any
/// other pair (for example a `tokio::io::duplex`) works the same way.
pub struct StdioTransport<R, W> {
    reader: R,
    writer: W,
}

impl StdioTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Creates a transport on stdin/stdout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl Default for StdioTransport<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, W> StdioTransport<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates a transport on an arbitrary stream pair.
    pub const fn with_io(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads lines and hands them to the engine until EOF or shutdown.
    ///
    /// Returns once reading has stopped; responses to lines already read may
    /// still be in flight.
    ///
    /// # Errors
    ///
    /// Returns an error if reading from the input fails.
    pub async fn serve(self, engine: Arc<ProtocolEngine>) -> io::Result<()> {
        let Self { mut reader, writer } = self;
        let conn = Connection::new(TransportKind::Stdio, Box::new(LineSink::new(writer)));
        let stopping = engine.stopping();
        info!(connection = conn.id(), "stdio transport ready");

        loop {
            let frame = tokio::select! {
                biased;
                () = stopping.fired() => {
                    debug!("shutdown requested; no longer reading stdin");
                    break;
                }
                frame = read_frame(&mut reader) => frame?,
            };

            let Some(bytes) = frame else {
                info!("stdin closed");
                break;
            };

            match String::from_utf8(bytes) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => engine.spawn_message(Arc::clone(&conn), line),
                Err(_) => {
                    warn!(connection = conn.id(), "rejected non UTF-8 line");
                    if let Ok(json) = serde_json::to_string(&JsonRpcError::parse_error()) {
                        if let Err(e) = conn.send(json).await {
                            engine.report_fault(format!("failed to write to stdout: {e}"));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Reads the next line without its terminator.
///
/// Returns `None` at EOF.
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let bytes_read = reader.read_until(b'\n', &mut line).await?;

    if bytes_read == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }

    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcResponse, RequestId};

    #[tokio::test]
    async fn read_frame_strips_terminators() {
        let mut input: &[u8] = b"first\r\nsecond\nlast";
        assert_eq!(read_frame(&mut input).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut input).await.unwrap().unwrap(), b"second");
        assert_eq!(read_frame(&mut input).await.unwrap().unwrap(), b"last");
        assert!(read_frame(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn line_sink_terminates_frames() {
        let mut sink = LineSink::new(Vec::new());
        sink.send("{\"a\":1}".to_string()).await.unwrap();
        sink.send("{\"b\":2}".to_string()).await.unwrap();
        assert_eq!(sink.writer, b"{\"a\":1}\n{\"b\":2}\n");
    }

    #[test]
    fn serialise_response_no_newlines() {
        let response = JsonRpcResponse::success(
            RequestId::from(1),
            serde_json::json!({
                "message": "hello\nworld",
                "nested": {"key": "value"}
            }),
        );

        let json = serde_json::to_string(&response).unwrap();
        assert!(
            !json.contains('\n'),
            "Serialised JSON should not contain newlines"
        );
    }
}
