//! Construction policy for the base HTTP client.

use std::time::Duration;

use mcpload_transport_traits::{TransportError, TransportResult};
use serde::{Deserialize, Serialize};

/// How the base `reqwest::Client` is built.
///
/// The load-generation host decides these; transports only consume the
/// resulting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientPolicy {
    /// Bound on connecting and on each request/response exchange.
    ///
    /// Applied per request rather than on the client, so long-lived event
    /// streams are not cut off.
    #[serde(with = "duration_ms_opt")]
    pub timeout: Option<Duration>,

    /// Open a fresh connection for every request.
    pub no_connection_reuse: bool,

    /// Never negotiate HTTP/2.
    pub http1_only: bool,

    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Default for HttpClientPolicy {
    fn default() -> Self {
        Self {
            timeout: None,
            no_connection_reuse: false,
            http1_only: false,
            user_agent: format!("mcpload/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientPolicy {
    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable connection pooling.
    #[must_use]
    pub fn without_connection_reuse(mut self) -> Self {
        self.no_connection_reuse = true;
        self
    }

    /// Restrict to HTTP/1.1.
    #[must_use]
    pub fn http1_only(mut self) -> Self {
        self.http1_only = true;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` when reqwest rejects the settings (for example
    /// when no TLS backend can be initialised).
    pub fn build(&self) -> TransportResult<reqwest::Client> {
        let mut builder = reqwest::Client::builder().user_agent(&self.user_agent);

        if let Some(timeout) = self.timeout {
            builder = builder.connect_timeout(timeout);
        }
        if self.no_connection_reuse {
            builder = builder.pool_max_idle_per_host(0);
        }
        if self.http1_only {
            builder = builder.http1_only();
        }

        builder
            .build()
            .map_err(|e| TransportError::ConfigurationError(format!("HTTP client: {e}")))
    }
}

mod duration_ms_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}
