//! Streamable HTTP client transport.
//!
//! - Every message is a POST to the single MCP endpoint, accepting either a
//!   JSON body or a `text/event-stream` body; notifications get `202`
//! - `Mcp-Session-Id` issued by the server is echoed on every later request
//! - `MCP-Protocol-Version` is sent on every request
//! - Once initialised, the optional GET event stream is opened for
//!   server-initiated messages (`405` means the server does not offer one)
//! - The session is terminated with DELETE on disconnect

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mcpload_protocol::{PROTOCOL_VERSION, methods};
use mcpload_transport_traits::{
    AtomicMetrics, LimitsConfig, Transport, TransportError, TransportMessage, TransportMetrics,
    TransportResult, TransportState, TransportType, validate_request_size, validate_response_size,
};
use parking_lot::{Mutex, RwLock};
use reqwest::{StatusCode, header};
use serde::Deserialize;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::auth::HttpClient;
use crate::inbound::{
    INBOUND_CHANNEL_CAPACITY, InboundSink, request_error, split_json_body, status_error,
};
use crate::{MCP_PROTOCOL_VERSION, MCP_SESSION_ID};

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Bound on the session DELETE when no request timeout is configured.
const DELETE_TIMEOUT: Duration = Duration::from_secs(5);

/// Streamable HTTP client configuration.
#[derive(Debug, Clone)]
pub struct StreamableHttpConfig {
    /// The MCP endpoint, e.g. `https://api.example.com/mcp`.
    pub url: Url,

    /// Value of the `MCP-Protocol-Version` header.
    pub protocol_version: String,

    /// Bound on each POST/DELETE exchange.
    pub request_timeout: Option<Duration>,

    /// Message size limits.
    pub limits: LimitsConfig,

    /// Open the GET event stream after initialisation.
    pub open_event_stream: bool,
}

impl StreamableHttpConfig {
    /// Defaults for `url`.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_timeout: None,
            limits: LimitsConfig::default(),
            open_event_stream: true,
        }
    }

    /// Bound each request.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Never open the GET event stream.
    #[must_use]
    pub fn without_event_stream(mut self) -> Self {
        self.open_event_stream = false;
        self
    }
}

/// MCP client transport over streamable HTTP.
///
/// POST responses and the GET stream all feed one bounded queue drained by
/// [`Transport::receive`]. Background readers are aborted on disconnect or
/// drop.
#[derive(Debug)]
pub struct StreamableHttpClientTransport {
    client: HttpClient,
    config: StreamableHttpConfig,
    state: Mutex<TransportState>,
    metrics: Arc<AtomicMetrics>,
    session_id: Arc<RwLock<Option<String>>>,
    inbound: InboundSink,
    inbound_rx: TokioMutex<mpsc::Receiver<TransportMessage>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    event_stream_requested: AtomicBool,
    shutdown: CancellationToken,
}

impl StreamableHttpClientTransport {
    /// A transport posting to `config.url` through `client`.
    pub fn new(client: HttpClient, config: StreamableHttpConfig) -> Self {
        let metrics = Arc::new(AtomicMetrics::new());
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            client,
            inbound: InboundSink {
                tx,
                metrics: Arc::clone(&metrics),
                limits: config.limits.clone(),
            },
            config,
            state: Mutex::new(TransportState::Disconnected),
            metrics,
            session_id: Arc::new(RwLock::new(None)),
            inbound_rx: TokioMutex::new(rx),
            tasks: Mutex::new(Vec::new()),
            event_stream_requested: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn set_state(&self, new_state: TransportState) {
        let mut state = self.state.lock();
        if *state != new_state {
            trace!("Streamable HTTP state: {} -> {}", *state, new_state);
            *state = new_state;
        }
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        let state = self.state.lock();
        match &*state {
            TransportState::Connected => Ok(()),
            other => Err(TransportError::ConnectionFailed(format!(
                "Transport not connected: {other}"
            ))),
        }
    }

    fn capture_session_id(&self, headers: &header::HeaderMap) {
        let Some(sid) = headers.get(MCP_SESSION_ID).and_then(|v| v.to_str().ok()) else {
            return;
        };
        let mut current = self.session_id.write();
        if current.as_deref() != Some(sid) {
            info!("Received session ID: {}", sid);
            *current = Some(sid.to_string());
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn spawn_body_reader(&self, response: reqwest::Response) {
        let inbound = self.inbound.clone();
        let shutdown = self.shutdown.clone();
        self.track(tokio::spawn(async move {
            inbound
                .pump(response, &shutdown, |event| {
                    debug!(event = ?event.event, "Ignoring non-message SSE event on POST stream");
                })
                .await;
        }));
    }

    fn open_event_stream(&self) {
        if !self.config.open_event_stream || self.event_stream_requested.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let client = self.client.clone();
        let url = self.config.url.clone();
        let protocol_version = self.config.protocol_version.clone();
        let session_id = self.session_id();
        let inbound = self.inbound.clone();
        let shutdown = self.shutdown.clone();

        self.track(tokio::spawn(async move {
            let mut request = client
                .get(url)
                .header(header::ACCEPT, "text/event-stream")
                .header(MCP_PROTOCOL_VERSION, protocol_version);
            if let Some(sid) = session_id {
                request = request.header(MCP_SESSION_ID, sid);
            }

            let response = tokio::select! {
                () = shutdown.cancelled() => return,
                response = request.send() => response,
            };

            match response {
                Ok(response) if response.status().is_success() => {
                    debug!("Opened server event stream");
                    inbound
                        .pump(response, &shutdown, |event| {
                            debug!(event = ?event.event, "Ignoring non-message SSE event");
                        })
                        .await;
                }
                Ok(response) if response.status() == StatusCode::METHOD_NOT_ALLOWED => {
                    debug!("Server does not offer a GET event stream");
                }
                Ok(response) => {
                    warn!("GET event stream rejected: {}", response.status());
                }
                Err(e) => {
                    warn!("Failed to open GET event stream: {}", e);
                }
            }
        }));
    }

    /// POST one message and deliver whatever the response body carries.
    async fn exchange(&self, message: TransportMessage) -> TransportResult<()> {
        let size = message.size();
        validate_request_size(size, &self.config.limits)?;
        let opens_stream = is_initialized_notification(&message);

        let mut request = self
            .client
            .post(self.config.url.clone())
            .header(header::ACCEPT, ACCEPT_BOTH)
            .header(header::CONTENT_TYPE, "application/json")
            .header(MCP_PROTOCOL_VERSION, &self.config.protocol_version)
            .body(message.payload);
        if let Some(sid) = self.session_id() {
            request = request.header(MCP_SESSION_ID, sid);
        }
        if let Some(timeout) = self.config.request_timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| request_error(&e, "POST", self.config.request_timeout))?;
        self.metrics.record_sent(size);

        let status = response.status();
        if !status.is_success() {
            let had_session = self.session_id.read().is_some();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::NOT_FOUND && had_session {
                return Err(TransportError::ConnectionLost(
                    "Server no longer recognises the session".to_string(),
                ));
            }
            return Err(status_error(status, &body));
        }

        self.capture_session_id(response.headers());
        if opens_stream {
            self.open_event_stream();
        }

        if matches!(status, StatusCode::ACCEPTED | StatusCode::NO_CONTENT) {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            self.spawn_body_reader(response);
            return Ok(());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        validate_response_size(body.len(), &self.config.limits)?;

        for message in split_json_body(body)? {
            if !self.inbound.deliver(message).await {
                return Err(TransportError::ConnectionLost(
                    "Receive queue closed".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn terminate_session(&self) {
        let Some(sid) = self.session_id.write().take() else {
            return;
        };

        let request = self
            .client
            .delete(self.config.url.clone())
            .header(MCP_SESSION_ID, &sid)
            .header(MCP_PROTOCOL_VERSION, &self.config.protocol_version)
            .timeout(self.config.request_timeout.unwrap_or(DELETE_TIMEOUT));

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Terminated session {}", sid);
            }
            Ok(response) => {
                debug!("Session DELETE answered {}", response.status());
            }
            Err(e) => {
                debug!("Session DELETE failed: {}", e);
            }
        }
    }
}

#[derive(Deserialize)]
struct MethodOnly {
    method: Option<String>,
}

fn is_initialized_notification(message: &TransportMessage) -> bool {
    message.id.is_none()
        && serde_json::from_slice::<MethodOnly>(&message.payload)
            .ok()
            .and_then(|m| m.method)
            .is_some_and(|method| method == methods::INITIALIZED)
}

#[async_trait]
impl Transport for StreamableHttpClientTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    async fn state(&self) -> TransportState {
        self.state.lock().clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::ConnectionFailed(
                "Transport was disconnected and cannot be reused".to_string(),
            ));
        }
        if matches!(*self.state.lock(), TransportState::Connected) {
            return Ok(());
        }

        // Nothing to dial yet: the first POST opens the exchange.
        self.metrics.connections.fetch_add(1, Ordering::Relaxed);
        self.set_state(TransportState::Connected);
        info!("Streamable HTTP transport ready for {}", self.config.url);
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }

        self.set_state(TransportState::Disconnecting);
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.terminate_session().await;

        self.set_state(TransportState::Disconnected);
        info!("Disconnected from {}", self.config.url);
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        self.ensure_connected()?;

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(TransportError::ConnectionLost(
                "Transport disconnected during exchange".to_string(),
            )),
            result = self.exchange(message) => result,
        }
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Ok(None),
            message = rx.recv() => Ok(message),
        }
    }

    fn metrics(&self) -> TransportMetrics {
        self.metrics.snapshot()
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.url.to_string())
    }
}

impl Drop for StreamableHttpClientTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn transport() -> StreamableHttpClientTransport {
        let url = Url::parse("http://127.0.0.1:9/mcp").unwrap();
        StreamableHttpClientTransport::new(
            HttpClient::new(reqwest::Client::new()),
            StreamableHttpConfig::new(url),
        )
    }

    #[test]
    fn test_initialized_notification_detection() {
        let initialized = TransportMessage::new(
            None,
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
        );
        assert!(is_initialized_notification(&initialized));

        let request = TransportMessage::new(
            Some(mcpload_protocol::MessageId::Number(1)),
            Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#),
        );
        assert!(!is_initialized_notification(&request));
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let transport = transport();
        let message = TransportMessage::new(None, Bytes::from_static(b"{}"));
        assert!(matches!(
            transport.send(message).await,
            Err(TransportError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_is_lazy_and_disconnect_is_terminal() {
        let transport = transport();
        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
        assert_eq!(transport.transport_type(), TransportType::StreamableHttp);

        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert_eq!(transport.state().await, TransportState::Disconnected);
        assert!(transport.receive().await.unwrap().is_none());
        assert!(transport.connect().await.is_err());
    }
}
