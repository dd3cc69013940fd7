//! Client configuration
//!
//! [`ClientConfig`] says which server to reach and how; [`SessionOptions`]
//! tunes the session that talks to it.

use std::collections::BTreeMap;
use std::time::Duration;

use mcpload_http::AuthConfig;
use mcpload_protocol::types::Implementation;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::metrics::MetricsRecorder;

/// Default bound on a single request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on transport connect plus the `initialize` exchange.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of pages a listing may span.
pub const DEFAULT_MAX_PAGES: usize = 1000;

/// Where the MCP server is and how to reach it.
///
/// ```json
/// {"type": "process", "path": "./server", "args": ["--stdio"]}
/// {"type": "http", "base_url": "http://localhost:3000/mcp", "kind": "streamable"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientConfig {
    /// Spawn the server and speak over its stdio.
    Process(ProcessConfig),
    /// Connect to a remote server over HTTP.
    Http(HttpConfig),
}

/// A server run as a local subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Executable path
    pub path: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables set on top of the inherited environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Forward the server's stderr
    #[serde(default)]
    pub debug: bool,
}

/// Which HTTP flavour the server speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpTransportKind {
    /// Legacy HTTP+SSE: a GET event stream plus POSTs to an announced endpoint.
    Sse,
    /// Streamable HTTP: every message is a POST to one endpoint.
    #[default]
    Streamable,
}

/// A remote server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Endpoint URL (the SSE stream for [`HttpTransportKind::Sse`])
    pub base_url: String,
    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,
    /// Transport flavour
    #[serde(default)]
    pub kind: HttpTransportKind,
    /// Per-request HTTP timeout, overriding the client policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ClientConfig {
    /// A process config with no arguments.
    pub fn process(path: impl Into<String>) -> Self {
        Self::Process(ProcessConfig {
            path: path.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            debug: false,
        })
    }

    /// A streamable HTTP config without credentials.
    pub fn streamable_http(base_url: impl Into<String>) -> Self {
        Self::Http(HttpConfig::new(base_url, HttpTransportKind::Streamable))
    }

    /// An SSE config without credentials.
    pub fn sse(base_url: impl Into<String>) -> Self {
        Self::Http(HttpConfig::new(base_url, HttpTransportKind::Sse))
    }

    /// Parse and validate a JSON document.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the document is malformed or invalid.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the config without touching the system.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an empty process path or a missing or
    /// unparseable base URL.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Process(process) => {
                if process.path.trim().is_empty() {
                    return Err(Error::Config("process path must not be empty".to_string()));
                }
                Ok(())
            }
            Self::Http(http) => http.url().map(|_| ()),
        }
    }
}

impl HttpConfig {
    /// `base_url` with the given flavour and no credentials.
    pub fn new(base_url: impl Into<String>, kind: HttpTransportKind) -> Self {
        Self {
            base_url: base_url.into(),
            auth: AuthConfig::default(),
            kind,
            timeout_ms: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// The configured timeout, if any. Zero means none.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// The parsed base URL.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] when the URL is empty or does not parse.
    pub fn url(&self) -> Result<Url> {
        let raw = self.base_url.trim();
        if raw.is_empty() {
            return Err(Error::Config("base_url must not be empty".to_string()));
        }
        Url::parse(raw).map_err(|e| Error::Config(format!("invalid base_url `{raw}`: {e}")))
    }
}

/// Tunables for a [`crate::ClientSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identity sent in `initialize`
    pub client_info: Implementation,
    /// Bound on each request, on top of the caller's own deadline
    pub request_timeout: Option<Duration>,
    /// Bound on connecting and initializing
    pub handshake_timeout: Duration,
    /// Page bound for listings
    pub max_pages: usize,
    /// Where per-call samples go; none drops them
    pub metrics: Option<MetricsRecorder>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_info: Implementation::new("mcpload", env!("CARGO_PKG_VERSION")),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_pages: DEFAULT_MAX_PAGES,
            metrics: None,
        }
    }
}

impl SessionOptions {
    /// Defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a different client identity.
    #[must_use]
    pub fn with_client_info(mut self, client_info: Implementation) -> Self {
        self.client_info = client_info;
        self
    }

    /// Bound each request; `None` relies on the caller's context alone.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound the handshake.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Change the page bound. Values below one are treated as one.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Record per-call samples.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_process_config_from_json() {
        let config = ClientConfig::from_json_str(
            r#"{"type":"process","path":"/usr/bin/server","args":["--stdio"],"env":{"A":"1"},"debug":true}"#,
        )
        .unwrap();

        let ClientConfig::Process(process) = config else {
            panic!("expected a process config");
        };
        assert_eq!(process.path, "/usr/bin/server");
        assert_eq!(process.args, vec!["--stdio"]);
        assert_eq!(process.env.get("A").map(String::as_str), Some("1"));
        assert!(process.debug);
    }

    #[test]
    fn test_http_config_defaults_to_streamable() {
        let config =
            ClientConfig::from_json_str(r#"{"type":"http","base_url":"http://localhost:3000/mcp"}"#)
                .unwrap();

        let ClientConfig::Http(http) = config else {
            panic!("expected an http config");
        };
        assert_eq!(http.kind, HttpTransportKind::Streamable);
        assert!(http.auth.token().is_none());
        assert!(http.timeout().is_none());
    }

    #[test]
    fn test_http_config_with_auth_and_timeout() {
        let config = ClientConfig::from_json_str(
            r#"{"type":"http","base_url":"https://example.com/sse","kind":"sse","auth":{"bearer_token":"t"},"timeout_ms":1500}"#,
        )
        .unwrap();

        let ClientConfig::Http(http) = config else {
            panic!("expected an http config");
        };
        assert_eq!(http.kind, HttpTransportKind::Sse);
        assert_eq!(http.auth.token(), Some("t"));
        assert_eq!(http.timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_validation_errors() {
        let empty_path = ClientConfig::process("  ");
        assert!(matches!(empty_path.validate(), Err(Error::Config(_))));

        let empty_url = ClientConfig::streamable_http("");
        assert!(matches!(empty_url.validate(), Err(Error::Config(_))));

        let bad_url = ClientConfig::sse("not a url");
        assert!(matches!(bad_url.validate(), Err(Error::Config(_))));

        let unknown = ClientConfig::from_json_str(r#"{"type":"carrier-pigeon"}"#);
        assert!(matches!(unknown, Err(Error::Config(_))));
    }

    #[test]
    fn test_session_option_defaults() {
        let options = SessionOptions::default();
        assert_eq!(options.client_info.name, "mcpload");
        assert_eq!(options.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(options.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
        assert_eq!(options.max_pages, 1000);
        assert!(options.metrics.is_none());
        assert_eq!(SessionOptions::new().with_max_pages(0).max_pages, 1);
    }
}
