//! # mcpload stdio transport
//!
//! Drives an MCP server that runs as a local subprocess, speaking JSON-RPC
//! over its stdin/stdout.
//!
//! - **Newline-delimited JSON**: `LinesCodec` framing in both directions
//! - **No embedded newlines**: outbound payloads containing `\n` or `\r` are rejected
//! - **Scoped child**: the process is killed when the transport is dropped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mcpload_stdio::{ProcessCommand, ProcessTransport};
//! use mcpload_transport_traits::Transport;
//!
//! let command = ProcessCommand::new("my-mcp-server").args(["--stdio"]);
//! let transport = ProcessTransport::spawn(&command)?;
//! transport.connect().await?;
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

mod process;
mod transport;

pub use process::{DEFAULT_SHUTDOWN_GRACE, ProcessCommand, ProcessTransport};
pub use transport::StdioTransport;
