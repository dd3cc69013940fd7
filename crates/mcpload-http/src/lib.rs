//! # mcpload HTTP transports
//!
//! Client-side HTTP transports for MCP servers:
//!
//! - [`StreamableHttpClientTransport`]: the streamable HTTP transport (single
//!   endpoint, JSON or SSE response bodies, `Mcp-Session-Id` sessions)
//! - [`SseClientTransport`]: the legacy HTTP+SSE transport (GET event stream
//!   plus POST to a server-announced endpoint)
//!
//! Both send through an [`HttpClient`], produced by [`AuthInjector::wrap`]
//! from a base `reqwest::Client` built with an [`HttpClientPolicy`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcpload_http::{
//!     AuthConfig, AuthInjector, HttpClientPolicy, StreamableHttpClientTransport,
//!     StreamableHttpConfig,
//! };
//!
//! let base = HttpClientPolicy::default().http1_only().build()?;
//! let client = AuthInjector::wrap(base, &AuthConfig::bearer("token"));
//! let url = "http://localhost:8080/mcp".parse()?;
//! let transport = StreamableHttpClientTransport::new(client, StreamableHttpConfig::new(url));
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

mod auth;
mod inbound;
mod policy;
pub mod sse;
mod sse_client;
mod streamable;

pub use auth::{AuthConfig, AuthInjector, HttpClient, StaticTokenSource, TokenSource};
pub use policy::HttpClientPolicy;
pub use sse_client::{DEFAULT_ENDPOINT_TIMEOUT, SseClientConfig, SseClientTransport};
pub use streamable::{StreamableHttpClientTransport, StreamableHttpConfig};

/// Session header of the streamable HTTP transport.
pub const MCP_SESSION_ID: &str = "Mcp-Session-Id";

/// Protocol version header sent on every streamable HTTP request.
pub const MCP_PROTOCOL_VERSION: &str = "MCP-Protocol-Version";
