//! Delivery of server messages into a transport's receive queue.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use mcpload_transport_traits::{
    AtomicMetrics, LimitsConfig, TransportError, TransportMessage, TransportResult,
    validate_response_size,
};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::sse::{SseDecoder, SseEvent};

/// Messages buffered between HTTP readers and `receive`.
pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 1000;

/// The sending half of a transport's receive queue.
#[derive(Debug, Clone)]
pub(crate) struct InboundSink {
    pub(crate) tx: mpsc::Sender<TransportMessage>,
    pub(crate) metrics: Arc<AtomicMetrics>,
    pub(crate) limits: LimitsConfig,
}

impl InboundSink {
    /// Queue one message. Returns `false` once the receiver is gone.
    pub(crate) async fn deliver(&self, message: TransportMessage) -> bool {
        self.metrics.record_received(message.size());
        trace!("Received message: {} bytes", message.size());
        self.tx.send(message).await.is_ok()
    }

    /// Queue a JSON-RPC event, dropping oversized or malformed ones.
    pub(crate) async fn deliver_event(&self, event: SseEvent) -> bool {
        if let Err(e) = validate_response_size(event.data.len(), &self.limits) {
            warn!("Dropping oversized SSE event: {}", e);
            return true;
        }
        match event.into_message() {
            Ok(message) => self.deliver(message).await,
            Err(e) => {
                warn!("Ignoring malformed SSE event: {}", e);
                true
            }
        }
    }

    /// Read an event stream to its end.
    ///
    /// JSON-RPC events are queued; every other named event is handed to
    /// `on_other`. Stops early when `shutdown` fires.
    pub(crate) async fn pump(
        &self,
        response: reqwest::Response,
        shutdown: &CancellationToken,
        mut on_other: impl FnMut(SseEvent),
    ) {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let chunk = tokio::select! {
                biased;
                () = shutdown.cancelled() => return,
                chunk = stream.next() => chunk,
            };

            let events = match chunk {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => {
                    warn!("Error reading SSE stream: {}", e);
                    return;
                }
                None => {
                    if let Some(event) = decoder.finish() {
                        self.dispatch(event, &mut on_other).await;
                    }
                    debug!("SSE stream ended");
                    return;
                }
            };

            for event in events {
                if !self.dispatch(event, &mut on_other).await {
                    return;
                }
            }
        }
    }

    async fn dispatch(&self, event: SseEvent, on_other: &mut impl FnMut(SseEvent)) -> bool {
        if event.is_message() {
            self.deliver_event(event).await
        } else {
            on_other(event);
            true
        }
    }
}

/// Split a JSON response body into messages; batches become several.
pub(crate) fn split_json_body(body: Bytes) -> TransportResult<Vec<TransportMessage>> {
    let is_batch = body
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'[');

    if !is_batch {
        return Ok(vec![
            TransportMessage::from_payload(body)?.with_content_type("application/json"),
        ]);
    }

    let batch: Vec<serde_json::Value> = serde_json::from_slice(&body)?;
    batch
        .iter()
        .map(|value| {
            let payload = Bytes::from(serde_json::to_vec(value)?);
            Ok(TransportMessage::from_payload(payload)?.with_content_type("application/json"))
        })
        .collect()
}

/// Map a non-success HTTP status to a transport error.
pub(crate) fn status_error(status: StatusCode, body: &str) -> TransportError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", truncate(body, 256))
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::AuthenticationFailed(detail)
        }
        _ => TransportError::SendFailed(detail),
    }
}

/// Map a reqwest failure for `operation` to a transport error.
pub(crate) fn request_error(
    err: &reqwest::Error,
    operation: &str,
    timeout: Option<Duration>,
) -> TransportError {
    if err.is_timeout() {
        TransportError::ConnectionTimeout {
            operation: operation.to_string(),
            timeout: timeout.unwrap_or_default(),
        }
    } else if err.is_connect() {
        TransportError::ConnectionFailed(format!("{operation}: {err}"))
    } else {
        TransportError::SendFailed(format!("{operation}: {err}"))
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
