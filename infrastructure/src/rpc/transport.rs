//! Frame transports.
//!
//! A frame is one UTF-8 JSON-encoded JSON-RPC object. The stdio transport
//! is newline-delimited; the WebSocket transport carries one object per
//! text frame. Both are split into a source half (owned by the connection
//! reader task) and a sink half (shared behind the connection's writer
//! lock). The stream variants are generic over `AsyncBufRead`/`AsyncWrite`
//! so tests can drive them with in-memory duplex pipes.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{trace, warn};

/// Read side of a transport. Owned exclusively by the connection's
/// inbound loop.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or `None` on orderly peer closure.
    async fn next_frame(&mut self) -> io::Result<Option<String>>;
}

/// Write side of a transport. One frame on the wire at a time; the
/// connection serializes access.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &str) -> io::Result<()>;
}

// ── Newline-delimited streams (stdio, duplex pipes) ────────────────────

/// Newline-delimited frame source over any buffered reader.
pub struct StreamSource<R> {
    reader: R,
    line: String,
}

impl<R: AsyncBufRead + Unpin + Send> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> FrameSource for StreamSource<R> {
    async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            self.line.clear();
            let bytes_read = self.reader.read_line(&mut self.line).await?;
            if bytes_read == 0 {
                // EOF signals peer closure.
                return Ok(None);
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            trace!(frame = %trimmed, "frame received");
            return Ok(Some(trimmed.to_string()));
        }
    }
}

/// Newline-delimited frame sink over any writer.
pub struct StreamSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for StreamSink<W> {
    async fn send_frame(&mut self, frame: &str) -> io::Result<()> {
        trace!(frame = %frame, "frame sent");
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// The process's stdio transport. Stdout carries protocol frames only;
/// diagnostics must go to stderr.
pub fn stdio_pair() -> (
    StreamSource<BufReader<tokio::io::Stdin>>,
    StreamSink<tokio::io::Stdout>,
) {
    (
        StreamSource::new(BufReader::new(tokio::io::stdin())),
        StreamSink::new(tokio::io::stdout()),
    )
}

// ── WebSocket ──────────────────────────────────────────────────────────

/// WebSocket frame source: one JSON object per text frame.
pub struct WsSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

/// WebSocket frame sink.
pub struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

/// Split an accepted WebSocket into transport halves.
pub fn ws_pair<S>(ws: WebSocketStream<S>) -> (WsSource<S>, WsSink<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let (sink, stream) = ws.split();
    (WsSource { stream }, WsSink { sink })
}

#[async_trait]
impl<S> FrameSource for WsSource<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(_))) => {
                    // Binary frames are rejected; the connection stays up.
                    warn!("rejecting binary WebSocket frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Control frames handled by the protocol layer.
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => {
                    warn!("unexpected raw frame, skipping");
                }
                Some(Err(e)) => {
                    return Err(io::Error::other(e));
                }
            }
        }
    }
}

#[async_trait]
impl<S> FrameSink for WsSink<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send_frame(&mut self, frame: &str) -> io::Result<()> {
        self.sink
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_source_reads_lines() {
        let input = b"{\"a\":1}\n\n{\"b\":2}\n".to_vec();
        let mut source = StreamSource::new(BufReader::new(std::io::Cursor::new(input)));

        assert_eq!(source.next_frame().await.unwrap().unwrap(), "{\"a\":1}");
        // Blank line skipped.
        assert_eq!(source.next_frame().await.unwrap().unwrap(), "{\"b\":2}");
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stream_sink_terminates_frames_with_newline() {
        let mut buffer = Vec::new();
        {
            let mut sink = StreamSink::new(&mut buffer);
            sink.send_frame("{\"x\":1}").await.unwrap();
            sink.send_frame("{\"y\":2}").await.unwrap();
        }
        assert_eq!(String::from_utf8(buffer).unwrap(), "{\"x\":1}\n{\"y\":2}\n");
    }

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(1024);
        let (client_read, _client_write) = tokio::io::split(client);
        let (_server_read, server_write) = tokio::io::split(server);

        let mut sink = StreamSink::new(server_write);
        let mut source = StreamSource::new(BufReader::new(client_read));

        sink.send_frame("{\"hello\":true}").await.unwrap();
        drop(sink);

        assert_eq!(
            source.next_frame().await.unwrap().unwrap(),
            "{\"hello\":true}"
        );
        assert!(source.next_frame().await.unwrap().is_none());
    }
}
