//! Bearer token injection for outbound HTTP requests.
//!
//! [`AuthInjector::wrap`] composes a base `reqwest::Client` with an optional
//! [`TokenSource`]. Every request built through the resulting [`HttpClient`]
//! carries `Authorization: Bearer <token>`; without a token the requests are
//! exactly what the base client would have produced.

use std::fmt;
use std::sync::Arc;

use reqwest::{IntoUrl, Method, RequestBuilder};
use serde::{Deserialize, Serialize};

/// Authentication settings for HTTP transports.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static bearer token. Empty or missing means no `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl AuthConfig {
    /// Authenticate with `token`.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }

    /// The token to inject, if there is a non-empty one.
    pub fn token(&self) -> Option<&str> {
        self.bearer_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("bearer_token", &self.token().map(|_| "<redacted>"))
            .finish()
    }
}

/// Supplies the bearer token for each request.
pub trait TokenSource: Send + Sync {
    /// Current token; `None` sends the request unauthenticated.
    fn token(&self) -> Option<String>;
}

/// A fixed token that is never refreshed.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    /// Wrap `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

impl fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticTokenSource(<redacted>)")
    }
}

/// A `reqwest::Client` paired with an optional token source.
///
/// Cloning is cheap: both halves are reference counted.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    token: Option<Arc<dyn TokenSource>>,
}

impl HttpClient {
    /// An unauthenticated client.
    pub fn new(inner: reqwest::Client) -> Self {
        Self { inner, token: None }
    }

    /// Authenticate every request with tokens from `source`.
    #[must_use]
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token = Some(source);
        self
    }

    /// Whether requests carry an `Authorization` header.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// The wrapped base client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.inner
    }

    /// Start a request, attaching the bearer token when one is configured.
    pub fn request(&self, method: Method, url: impl IntoUrl) -> RequestBuilder {
        let builder = self.inner.request(method, url);
        match self.token.as_ref().and_then(|source| source.token()) {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Start a GET request.
    pub fn get(&self, url: impl IntoUrl) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// Start a POST request.
    pub fn post(&self, url: impl IntoUrl) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// Start a DELETE request.
    pub fn delete(&self, url: impl IntoUrl) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field(
                "auth",
                &if self.token.is_some() {
                    "Bearer <redacted>"
                } else {
                    "none"
                },
            )
            .finish_non_exhaustive()
    }
}

/// Composes HTTP clients with bearer authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthInjector;

impl AuthInjector {
    /// Wrap `client` so that requests carry `auth`'s bearer token.
    ///
    /// The base client is not modified; with no usable token the wrapper adds
    /// nothing.
    pub fn wrap(client: reqwest::Client, auth: &AuthConfig) -> HttpClient {
        let wrapped = HttpClient::new(client);
        match auth.token() {
            Some(token) => wrapped.with_token_source(Arc::new(StaticTokenSource::new(token))),
            None => wrapped,
        }
    }
}
