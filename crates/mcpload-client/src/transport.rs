//! Transport construction from a [`ClientConfig`]

use async_trait::async_trait;
use mcpload_http::{
    AuthInjector, HttpClientPolicy, SseClientConfig, SseClientTransport,
    StreamableHttpClientTransport, StreamableHttpConfig,
};
use mcpload_stdio::{ProcessCommand, ProcessTransport};
use mcpload_transport_traits::{
    Transport, TransportError, TransportMessage, TransportMetrics, TransportResult,
    TransportState, TransportType,
};
use tracing::debug;

use crate::config::{ClientConfig, HttpConfig, HttpTransportKind, ProcessConfig};
use crate::error::{Error, Result};

/// Any transport the factory can build.
#[derive(Debug)]
pub enum McpTransport {
    /// A spawned server over stdio
    Process(ProcessTransport),
    /// Legacy HTTP+SSE
    Sse(SseClientTransport),
    /// Streamable HTTP
    StreamableHttp(StreamableHttpClientTransport),
}

macro_rules! dispatch_transport {
    ($transport:expr, $t:ident => $body:expr) => {
        match $transport {
            McpTransport::Process($t) => $body,
            McpTransport::Sse($t) => $body,
            McpTransport::StreamableHttp($t) => $body,
        }
    };
}

#[async_trait]
impl Transport for McpTransport {
    fn transport_type(&self) -> TransportType {
        dispatch_transport!(self, t => t.transport_type())
    }

    async fn state(&self) -> TransportState {
        dispatch_transport!(self, t => t.state().await)
    }

    async fn connect(&self) -> TransportResult<()> {
        dispatch_transport!(self, t => t.connect().await)
    }

    async fn disconnect(&self) -> TransportResult<()> {
        dispatch_transport!(self, t => t.disconnect().await)
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        dispatch_transport!(self, t => t.send(message).await)
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        dispatch_transport!(self, t => t.receive().await)
    }

    fn metrics(&self) -> TransportMetrics {
        dispatch_transport!(self, t => t.metrics())
    }

    fn endpoint(&self) -> Option<String> {
        dispatch_transport!(self, t => t.endpoint())
    }
}

/// Builds transports, applying the host's HTTP client policy.
#[derive(Debug, Clone, Default)]
pub struct TransportFactory {
    policy: HttpClientPolicy,
    skip_event_stream: bool,
}

impl TransportFactory {
    /// A factory building HTTP clients from `policy`.
    pub fn new(policy: HttpClientPolicy) -> Self {
        Self {
            policy,
            skip_event_stream: false,
        }
    }

    /// Do not open the optional GET event stream on streamable HTTP.
    #[must_use]
    pub fn without_event_stream(mut self) -> Self {
        self.skip_event_stream = true;
        self
    }

    /// The HTTP client policy.
    pub fn policy(&self) -> &HttpClientPolicy {
        &self.policy
    }

    /// Build the transport `config` describes.
    ///
    /// A process config spawns the server immediately. Must be called within
    /// a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid settings, [`Error::Connection`] when the
    /// process cannot be spawned.
    pub fn create(&self, config: &ClientConfig) -> Result<McpTransport> {
        config.validate()?;

        match config {
            ClientConfig::Process(process) => self.create_process(process),
            ClientConfig::Http(http) => self.create_http(http),
        }
    }

    fn create_process(&self, config: &ProcessConfig) -> Result<McpTransport> {
        let command = config
            .env
            .iter()
            .fold(
                ProcessCommand::new(&config.path).args(&config.args),
                |command, (key, value)| command.env(key, value),
            )
            .debug(config.debug);

        ProcessTransport::spawn(&command)
            .map(McpTransport::Process)
            .map_err(map_build_error)
    }

    fn create_http(&self, config: &HttpConfig) -> Result<McpTransport> {
        let url = config.url()?;

        let mut policy = self.policy.clone();
        if let Some(timeout) = config.timeout() {
            policy.timeout = Some(timeout);
        }
        let client = AuthInjector::wrap(policy.build().map_err(map_build_error)?, &config.auth);

        debug!(
            url = %url,
            kind = ?config.kind,
            authenticated = client.is_authenticated(),
            "Creating HTTP transport"
        );

        Ok(match config.kind {
            HttpTransportKind::Sse => McpTransport::Sse(SseClientTransport::new(
                client,
                SseClientConfig::new(url).with_request_timeout(policy.timeout),
            )),
            HttpTransportKind::Streamable => {
                let mut transport_config =
                    StreamableHttpConfig::new(url).with_request_timeout(policy.timeout);
                if self.skip_event_stream {
                    transport_config = transport_config.without_event_stream();
                }
                McpTransport::StreamableHttp(StreamableHttpClientTransport::new(
                    client,
                    transport_config,
                ))
            }
        })
    }
}

fn map_build_error(err: TransportError) -> Error {
    match err {
        TransportError::ConfigurationError(msg) => Error::Config(msg),
        other => Error::Connection(other.to_string()),
    }
}
