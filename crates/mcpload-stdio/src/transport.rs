//! Line-framed JSON transport over an arbitrary byte stream pair.
//!
//! [`StdioTransport`] speaks newline-delimited JSON-RPC over any
//! `AsyncRead`/`AsyncWrite` pair. [`crate::ProcessTransport`] feeds it the
//! pipes of a spawned server; tests feed it `tokio::io::duplex` halves.
//!
//! # Interior Mutability Pattern
//!
//! - **parking_lot::Mutex** for state and task handles (never held across .await)
//! - **AtomicMetrics** for lock-free counter updates
//! - **tokio::sync::Mutex** for the writer and the receive channel (held across .await)

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use mcpload_transport_traits::{
    AtomicMetrics, LimitsConfig, Transport, TransportError, TransportMessage, TransportMetrics,
    TransportResult, TransportState, TransportType, validate_request_size,
};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, error, trace, warn};

type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;
type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send + 'static>>;
type LineReader = FramedRead<BufReader<BoxedAsyncRead>, LinesCodec>;
type LineWriter = FramedWrite<BoxedAsyncWrite, LinesCodec>;

/// Inbound messages buffered between the reader task and `receive`.
const RECEIVE_CHANNEL_CAPACITY: usize = 1000;

/// Streams handed to the constructor, consumed on `connect`.
struct RawStreams {
    reader: BoxedAsyncRead,
    writer: BoxedAsyncWrite,
}

/// Newline-delimited JSON transport.
///
/// A background task reads lines, bounded by the response size limit, and
/// forwards them to a bounded channel drained by [`Transport::receive`]. End
/// of stream on the reader surfaces as `Ok(None)`; a read failure or an
/// oversized line is returned once as an error and ends the stream.
pub struct StdioTransport {
    state: Mutex<TransportState>,
    limits: LimitsConfig,
    metrics: Arc<AtomicMetrics>,
    endpoint: String,
    streams: Mutex<Option<RawStreams>>,
    writer: TokioMutex<Option<LineWriter>>,
    receive_channel: TokioMutex<Option<mpsc::Receiver<TransportResult<TransportMessage>>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("state", &*self.state.lock())
            .field("endpoint", &self.endpoint)
            .field("limits", &self.limits)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Create a transport from raw async read/write streams.
    ///
    /// * `reader` - what we read messages from (e.g. a child's **stdout**)
    /// * `writer` - what we write messages to (e.g. a child's **stdin**)
    ///
    /// Nothing is spawned until [`Transport::connect`].
    pub fn from_raw<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        Self {
            state: Mutex::new(TransportState::Disconnected),
            limits: LimitsConfig::default(),
            metrics: Arc::new(AtomicMetrics::new()),
            endpoint: "stdio://raw".to_string(),
            streams: Mutex::new(Some(RawStreams {
                reader: Box::pin(reader),
                writer: Box::pin(writer),
            })),
            writer: TokioMutex::new(None),
            receive_channel: TokioMutex::new(None),
            reader_task: Mutex::new(None),
        }
    }

    /// Label reported by [`Transport::endpoint`].
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Override the message size limits.
    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock();
        if *state != new_state {
            trace!("Stdio transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    fn current_state(&self) -> TransportState {
        self.state.lock().clone()
    }

    fn spawn_reader(
        &self,
        mut lines: LineReader,
        sender: mpsc::Sender<TransportResult<TransportMessage>>,
    ) -> JoinHandle<()> {
        let metrics = Arc::clone(&self.metrics);
        let max_line = self.limits.max_response_size;
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            while let Some(result) = lines.next().await {
                let line = match result {
                    Ok(line) => line,
                    Err(e) => {
                        let err = match (e, max_line) {
                            (LinesCodecError::MaxLineLengthExceeded, Some(max)) => {
                                TransportError::ProtocolError(format!(
                                    "Message exceeds the {max} byte response limit"
                                ))
                            }
                            (e, _) => TransportError::ReceiveFailed(e.to_string()),
                        };
                        error!(endpoint = %endpoint, "Stopping reader: {}", err);
                        let _ = sender.send(Err(err)).await;
                        break;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                let message = match parse_message(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(endpoint = %endpoint, "Ignoring unparseable line: {}", e);
                        continue;
                    }
                };

                metrics.record_received(message.size());
                trace!("Received message: {} bytes", message.size());

                if sender.send(Ok(message)).await.is_err() {
                    debug!("Receive channel closed, stopping reader task");
                    break;
                }
            }

            debug!(endpoint = %endpoint, "Stdio reader reached end of stream");
        })
    }
}

/// Wrap one received line, rejecting blank lines.
fn parse_message(line: &str) -> TransportResult<TransportMessage> {
    let line = line.trim();
    if line.is_empty() {
        return Err(TransportError::ProtocolError("Empty message".to_string()));
    }

    Ok(TransportMessage::from_payload(Bytes::copy_from_slice(line.as_bytes()))?
        .with_content_type("application/json"))
}

/// Render a payload as exactly one line.
fn serialize_message(message: &TransportMessage) -> TransportResult<String> {
    let json_str = std::str::from_utf8(&message.payload)
        .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;

    // Newlines are the frame delimiter; escaped "\n" inside strings is fine.
    if json_str.contains('\n') || json_str.contains('\r') {
        return Err(TransportError::ProtocolError(
            "Message contains embedded newlines".to_string(),
        ));
    }

    let _: serde_json::Value = serde_json::from_str(json_str)?;
    Ok(json_str.to_string())
}

#[async_trait]
impl Transport for StdioTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    async fn state(&self) -> TransportState {
        self.current_state()
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.current_state(), TransportState::Connected) {
            return Ok(());
        }

        self.set_state(TransportState::Connecting);
        self.metrics
            .connections
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let Some(RawStreams { reader, writer }) = self.streams.lock().take() else {
            self.metrics
                .failed_connections
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let err = TransportError::ConnectionFailed(
                "Stdio streams already consumed; transports cannot be reconnected".to_string(),
            );
            self.set_state(TransportState::Failed {
                reason: err.to_string(),
            });
            return Err(err);
        };

        let codec = self
            .limits
            .max_response_size
            .map_or_else(LinesCodec::new, LinesCodec::new_with_max_length);
        let lines = FramedRead::new(BufReader::new(reader), codec);
        *self.writer.lock().await = Some(FramedWrite::new(writer, LinesCodec::new()));

        let (tx, rx) = mpsc::channel(RECEIVE_CHANNEL_CAPACITY);
        *self.receive_channel.lock().await = Some(rx);
        *self.reader_task.lock() = Some(self.spawn_reader(lines, tx));

        self.set_state(TransportState::Connected);
        debug!(endpoint = %self.endpoint, "Stdio transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.current_state(), TransportState::Disconnected) {
            self.streams.lock().take();
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);

        // Stopping the reader drops the channel sender, which wakes any
        // pending `receive` with `Ok(None)` and releases its lock.
        if let Some(handle) = self.reader_task.lock().take() {
            handle.abort();
        }

        if let Some(mut writer) = self.writer.lock().await.take()
            && let Err(e) = SinkExt::<String>::close(&mut writer).await
        {
            trace!("Closing stdio writer failed: {}", e);
        }
        *self.receive_channel.lock().await = None;
        self.streams.lock().take();

        self.set_state(TransportState::Disconnected);
        debug!(endpoint = %self.endpoint, "Stdio transport disconnected");
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.current_state();
        if !matches!(state, TransportState::Connected) {
            return Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {state}"
            )));
        }

        let json_line = serialize_message(&message)?;
        let size = json_line.len();
        validate_request_size(size, &self.limits)?;

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::SendFailed("Writer not available".to_string()))?;

        if let Err(e) = writer.send(json_line).await {
            error!("Failed to send message: {}", e);
            self.set_state(TransportState::Failed {
                reason: e.to_string(),
            });
            return Err(TransportError::ConnectionLost(e.to_string()));
        }

        self.metrics.record_sent(size);
        trace!("Sent message: {} bytes", size);
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut receive_channel = self.receive_channel.lock().await;
        let Some(receiver) = receive_channel.as_mut() else {
            return match self.current_state() {
                TransportState::Disconnected | TransportState::Disconnecting => Ok(None),
                state => Err(TransportError::ReceiveFailed(format!(
                    "Transport not connected: {state}"
                ))),
            };
        };

        match receiver.recv().await {
            Some(message) => message.map(Some),
            None => {
                debug!(endpoint = %self.endpoint, "Peer closed the stream");
                Ok(None)
            }
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.endpoint.clone())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpload_protocol::MessageId;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

    #[test]
    fn test_message_parsing() {
        let json_line = r#"{"jsonrpc":"2.0","id":"test-123","method":"test","params":{}}"#;
        let message = parse_message(json_line).unwrap();

        assert_eq!(message.id, Some(MessageId::from("test-123")));
        assert_eq!(message.content_type(), Some("application/json"));
    }

    #[test]
    fn test_message_parsing_without_id() {
        let json_line = r#"{"jsonrpc":"2.0","method":"notification","params":{}}"#;
        let message = parse_message(json_line).unwrap();
        assert_eq!(message.id, None);
    }

    #[test]
    fn test_message_parsing_invalid() {
        assert!(matches!(
            parse_message("not json at all"),
            Err(TransportError::SerializationFailed(_))
        ));
        assert!(matches!(
            parse_message("   "),
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_message_serialization_rejects_embedded_newlines() {
        let message = TransportMessage::new(
            None,
            Bytes::from("{\r\n\"jsonrpc\":\"2.0\",\"method\":\"x\"}"),
        );
        assert!(matches!(
            serialize_message(&message),
            Err(TransportError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_message_serialization_escaped_newlines_allowed() {
        let json = r#"{"jsonrpc":"2.0","id":1,"method":"log","params":{"message":"a\nb"}}"#;
        let message = TransportMessage::new(Some(MessageId::Number(1)), Bytes::from(json));
        assert_eq!(serialize_message(&message).unwrap(), json);
    }

    #[tokio::test]
    async fn test_round_trip_over_duplex() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, mut server_write) = tokio::io::split(server_io);

        let transport = StdioTransport::from_raw(client_read, client_write);
        assert_eq!(transport.state().await, TransportState::Disconnected);
        transport.connect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Connected);

        let outbound = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        transport
            .send(TransportMessage::new(
                Some(MessageId::Number(1)),
                Bytes::from(outbound),
            ))
            .await
            .unwrap();

        let mut server_lines = tokio::io::BufReader::new(server_read).lines();
        assert_eq!(server_lines.next_line().await.unwrap().unwrap(), outbound);

        server_write
            .write_all(b"\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n")
            .await
            .unwrap();
        let inbound = transport.receive().await.unwrap().unwrap();
        assert_eq!(inbound.id, Some(MessageId::Number(1)));

        let metrics = transport.metrics();
        assert_eq!(metrics.messages_sent, 1);
        assert_eq!(metrics.messages_received, 1);

        drop(server_write);
        drop(server_lines);
        assert!(transport.receive().await.unwrap().is_none());

        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_oversized_line_ends_the_stream_with_an_error() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (_server_read, mut server_write) = tokio::io::split(server_io);

        let transport = StdioTransport::from_raw(client_read, client_write).with_limits(
            LimitsConfig {
                max_response_size: Some(64),
                ..LimitsConfig::default()
            },
        );
        transport.connect().await.unwrap();

        let big = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{{\"text\":\"{}\"}}}}\n",
            "x".repeat(200)
        );
        server_write.write_all(big.as_bytes()).await.unwrap();
        server_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{}}\n")
            .await
            .unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::ProtocolError(ref msg) if msg.contains("64 byte")), "{err:?}");
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        let transport = StdioTransport::from_raw(r, w);

        let result = transport
            .send(TransportMessage::new(None, Bytes::from("{}")))
            .await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_disconnect_wakes_pending_receive() {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        let transport = Arc::new(StdioTransport::from_raw(r, w));
        transport.connect().await.unwrap();

        let receiver = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.receive().await })
        };
        tokio::task::yield_now().await;

        transport.disconnect().await.unwrap();
        let received = receiver.await.unwrap().unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_is_rejected() {
        let (a, _b) = tokio::io::duplex(64);
        let (r, w) = tokio::io::split(a);
        let transport = StdioTransport::from_raw(r, w);
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }
}
