//! # mcpload transport traits
//!
//! The contract every mcpload transport implements, and the types that cross
//! it.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Trait**: [`Transport`]
//! - **Types**: [`TransportType`], [`TransportState`], [`TransportMessage`]
//! - **Errors**: [`TransportError`], [`TransportResult`]
//! - **Config**: [`LimitsConfig`]
//! - **Metrics**: [`TransportMetrics`], [`AtomicMetrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use mcpload_transport_traits::{Transport, TransportMessage, TransportResult};
//!
//! #[derive(Debug)]
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     // ...
//! }
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

mod config;
mod error;
mod message;
mod metrics;
mod traits;
mod types;

pub use config::LimitsConfig;
pub use error::{TransportError, TransportResult, validate_request_size, validate_response_size};
pub use message::{TransportMessage, TransportMessageMetadata};
pub use metrics::{AtomicMetrics, TransportMetrics};
pub use traits::Transport;
pub use types::{TransportState, TransportType};
