//! # mcpload client
//!
//! Instrumented MCP client sessions for load generation.
//!
//! A [`ClientSession`] connects to one MCP server over a transport built by
//! the [`TransportFactory`] from a [`ClientConfig`]:
//!
//! - **Process**: spawn the server and speak newline-delimited JSON over its stdio
//! - **SSE**: legacy HTTP+SSE (GET event stream, POST to the announced endpoint)
//! - **Streamable HTTP**: POST per message, JSON or SSE response bodies
//!
//! Every RPC is timed and reported through an optional [`MetricsRecorder`]
//! as `mcp_request_duration` and `mcp_request_count`, plus
//! `mcp_request_errors` when the call fails.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mcpload_client::{
//!     CallContext, ClientConfig, ClientSession, MetricsFacadeSink, MetricsRecorder,
//!     SessionOptions, TransportFactory,
//! };
//! use mcpload_protocol::types::CallToolRequest;
//!
//! let recorder = MetricsRecorder::new(Arc::new(MetricsFacadeSink::new()));
//! let session = ClientSession::new(SessionOptions::default().with_metrics(recorder));
//!
//! let config = ClientConfig::from_json_str(
//!     r#"{"type": "http", "base_url": "http://localhost:3000/mcp", "auth": {"bearer_token": "t"}}"#,
//! )?;
//! session.connect_with_config(&config, &TransportFactory::default()).await?;
//!
//! let ctx = CallContext::new();
//! let tools = session.list_all_tools(None, &ctx).await?;
//! let result = session.call_tool(CallToolRequest::new(&tools[0].name), &ctx).await?;
//! session.close().await?;
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

pub mod config;
pub mod context;
mod dispatcher;
pub mod error;
pub mod metrics;
pub mod pagination;
pub mod session;
pub mod transport;

pub use config::{
    ClientConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_PAGES, DEFAULT_REQUEST_TIMEOUT,
    HttpConfig, HttpTransportKind, ProcessConfig, SessionOptions,
};
pub use context::CallContext;
pub use error::{Error, Result};
pub use metrics::{
    AmbientTags, ChannelSink, MetricKind, MetricSample, MetricsFacadeSink, MetricsRecorder,
    SampleSink,
};
pub use pagination::{Page, Paginator, collect_all};
pub use session::{ClientSession, SessionState};
pub use transport::{McpTransport, TransportFactory};

pub use mcpload_http::{AuthConfig, AuthInjector, HttpClient, HttpClientPolicy};
pub use mcpload_protocol as protocol;
pub use mcpload_transport_traits::{Transport, TransportError};
