//! Legacy HTTP+SSE client transport.
//!
//! The client holds a GET `text/event-stream` open. The server's first
//! `endpoint` event names the URL messages are POSTed to; responses come
//! back as `message` events on the stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mcpload_transport_traits::{
    AtomicMetrics, LimitsConfig, Transport, TransportError, TransportMessage, TransportMetrics,
    TransportResult, TransportState, TransportType, validate_request_size,
};
use parking_lot::{Mutex, RwLock};
use reqwest::header;
use tokio::sync::{Mutex as TokioMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::auth::HttpClient;
use crate::inbound::{INBOUND_CHANNEL_CAPACITY, InboundSink, request_error, status_error};

/// How long `connect` waits for the `endpoint` event by default.
pub const DEFAULT_ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// SSE client configuration.
#[derive(Debug, Clone)]
pub struct SseClientConfig {
    /// The event stream URL, e.g. `https://api.example.com/sse`.
    pub url: Url,

    /// Bound on waiting for the `endpoint` event.
    pub endpoint_timeout: Duration,

    /// Bound on each POST exchange.
    pub request_timeout: Option<Duration>,

    /// Message size limits.
    pub limits: LimitsConfig,
}

impl SseClientConfig {
    /// Defaults for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            request_timeout: None,
            limits: LimitsConfig::default(),
        }
    }

    /// Bound each POST.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound endpoint discovery.
    #[must_use]
    pub fn with_endpoint_timeout(mut self, timeout: Duration) -> Self {
        self.endpoint_timeout = timeout;
        self
    }
}

/// MCP client transport over HTTP+SSE.
///
/// The stream reader task owns the only sender of the receive queue, so the
/// server closing the stream (or `disconnect` aborting the reader) surfaces
/// as `Ok(None)` from [`Transport::receive`].
#[derive(Debug)]
pub struct SseClientTransport {
    client: HttpClient,
    config: SseClientConfig,
    state: Mutex<TransportState>,
    metrics: Arc<AtomicMetrics>,
    message_endpoint: RwLock<Option<Url>>,
    inbound_rx: TokioMutex<Option<mpsc::Receiver<TransportMessage>>>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
    used: AtomicBool,
}

impl SseClientTransport {
    /// A transport reading events from `config.url` through `client`.
    pub fn new(client: HttpClient, config: SseClientConfig) -> Self {
        Self {
            client,
            config,
            state: Mutex::new(TransportState::Disconnected),
            metrics: Arc::new(AtomicMetrics::new()),
            message_endpoint: RwLock::new(None),
            inbound_rx: TokioMutex::new(None),
            stream_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            used: AtomicBool::new(false),
        }
    }

    /// The POST endpoint announced by the server, once connected.
    pub fn message_endpoint(&self) -> Option<Url> {
        self.message_endpoint.read().clone()
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock();
        if *state != new_state {
            trace!("SSE transport state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    fn current_state(&self) -> TransportState {
        self.state.lock().clone()
    }

    fn fail(&self, err: TransportError) -> TransportError {
        error!(url = %self.config.url, "SSE connect failed: {}", err);
        if let Some(task) = self.stream_task.lock().take() {
            task.abort();
        }
        self.metrics
            .failed_connections
            .fetch_add(1, Ordering::Relaxed);
        self.set_state(TransportState::Failed {
            reason: err.to_string(),
        });
        err
    }

    async fn open_stream(&self) -> TransportResult<Url> {
        let response = self
            .client
            .get(self.config.url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| request_error(&e, "GET event stream", None))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status_error(status, &body) {
                TransportError::SendFailed(detail) => TransportError::ConnectionFailed(detail),
                other => other,
            });
        }

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        *self.inbound_rx.lock().await = Some(rx);

        let inbound = InboundSink {
            tx,
            metrics: Arc::clone(&self.metrics),
            limits: self.config.limits.clone(),
        };
        let base = self.config.url.clone();
        let shutdown = self.shutdown.clone();

        let task = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            inbound
                .pump(response, &shutdown, |event| {
                    if event.event.as_deref() != Some("endpoint") {
                        debug!(event = ?event.event, "Ignoring SSE event");
                        return;
                    }
                    match endpoint_tx.take() {
                        Some(sender) => {
                            let _ = sender.send(resolve_endpoint(&base, &event.data));
                        }
                        None => warn!("Ignoring repeated endpoint event"),
                    }
                })
                .await;
            debug!(url = %base, "SSE stream closed");
        });
        *self.stream_task.lock() = Some(task);

        match tokio::time::timeout(self.config.endpoint_timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => Err(TransportError::ConnectionFailed(
                "SSE stream ended before the endpoint event".to_string(),
            )),
            Err(_) => Err(TransportError::ConnectionTimeout {
                operation: "endpoint discovery".to_string(),
                timeout: self.config.endpoint_timeout,
            }),
        }
    }
}

/// Resolve an `endpoint` event payload against the stream URL.
///
/// The payload is either a bare (possibly relative) URL or a JSON object
/// with a `uri` field.
fn resolve_endpoint(base: &Url, data: &str) -> TransportResult<Url> {
    let data = data.trim();
    let raw = if data.starts_with('{') {
        let value: serde_json::Value = serde_json::from_str(data)?;
        value
            .get("uri")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::ProtocolError("endpoint event has no `uri` field".to_string())
            })?
    } else {
        data.to_string()
    };

    if raw.is_empty() {
        return Err(TransportError::ProtocolError(
            "endpoint event is empty".to_string(),
        ));
    }

    base.join(&raw)
        .map_err(|e| TransportError::ProtocolError(format!("invalid endpoint `{raw}`: {e}")))
}

#[async_trait]
impl Transport for SseClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    async fn state(&self) -> TransportState {
        self.current_state()
    }

    async fn connect(&self) -> TransportResult<()> {
        if matches!(self.current_state(), TransportState::Connected) {
            return Ok(());
        }
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "SSE transports cannot be reconnected".to_string(),
            ));
        }

        info!("Connecting to {}", self.config.url);
        self.set_state(TransportState::Connecting);
        self.metrics.connections.fetch_add(1, Ordering::Relaxed);

        match self.open_stream().await {
            Ok(endpoint) => {
                info!(endpoint = %endpoint, "SSE message endpoint discovered");
                *self.message_endpoint.write() = Some(endpoint);
                self.set_state(TransportState::Connected);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);
        self.shutdown.cancel();
        // Aborting the reader drops the queue's only sender.
        if let Some(task) = self.stream_task.lock().take() {
            task.abort();
        }
        self.message_endpoint.write().take();

        self.set_state(TransportState::Disconnected);
        info!("Disconnected from {}", self.config.url);
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let state = self.current_state();
        let endpoint = match (&state, self.message_endpoint()) {
            (TransportState::Connected, Some(endpoint)) => endpoint,
            _ => {
                return Err(TransportError::ConnectionFailed(format!(
                    "Transport not connected: {state}"
                )));
            }
        };

        let size = message.size();
        validate_request_size(size, &self.config.limits)?;

        let mut request = self
            .client
            .post(endpoint)
            .header(header::CONTENT_TYPE, "application/json")
            .body(message.payload);
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(&e, "POST", self.config.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        self.metrics.record_sent(size);
        trace!("Posted message: {} bytes ({})", size, status);
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        let Some(rx) = inbound_rx.as_mut() else {
            return match self.current_state() {
                TransportState::Disconnected | TransportState::Disconnecting => Ok(None),
                state => Err(TransportError::ReceiveFailed(format!(
                    "Transport not connected: {state}"
                ))),
            };
        };

        match rx.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                debug!(url = %self.config.url, "Server closed the event stream");
                Ok(None)
            }
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.url.to_string())
    }
}

impl Drop for SseClientTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.stream_task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Url {
        Url::parse("http://localhost:8080/sse").unwrap()
    }

    #[test]
    fn test_resolve_relative_endpoint() {
        let url = resolve_endpoint(&base(), "/messages?sessionId=abc").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/messages?sessionId=abc");

        let url = resolve_endpoint(&base(), "messages").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/messages");
    }

    #[test]
    fn test_resolve_absolute_endpoint() {
        let url = resolve_endpoint(&base(), "http://127.0.0.1:9000/mcp").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/mcp");
    }

    #[test]
    fn test_resolve_json_endpoint() {
        let url = resolve_endpoint(&base(), r#"{"uri":"http://127.0.0.1:8080/mcp"}"#).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/mcp");

        assert!(resolve_endpoint(&base(), r#"{"url":"/x"}"#).is_err());
        assert!(resolve_endpoint(&base(), "  ").is_err());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let transport = SseClientTransport::new(
            HttpClient::new(reqwest::Client::new()),
            SseClientConfig::new(base()),
        );
        let message = TransportMessage::new(None, bytes::Bytes::from_static(b"{}"));
        assert!(matches!(
            transport.send(message).await,
            Err(TransportError::ConnectionFailed(_))
        ));
        assert!(transport.receive().await.unwrap().is_none());
    }
}
