//! # mcpload protocol
//!
//! Wire types for the Model Context Protocol as spoken by the mcpload client:
//! JSON-RPC 2.0 envelopes ([`jsonrpc`]) and the MCP request/result shapes for
//! the handshake, tools, resources, prompts and ping ([`types`]).
//!
//! The crate is deliberately transport-agnostic. Framing lives in the
//! transport crates; correlation and lifecycle live in `mcpload-client`.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, JsonRpcResponsePayload, JsonRpcVersion, MessageId, ResponseId,
};

/// Protocol version offered during the handshake.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions the client accepts from a server's `initialize` result.
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Maximum size of a single framed message (10 MiB).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Check whether a server-selected protocol version is one this client speaks.
pub fn is_supported_version(version: &str) -> bool {
    SUPPORTED_VERSIONS.contains(&version)
}

/// MCP method names used by the client.
pub mod methods {
    /// Handshake request.
    pub const INITIALIZE: &str = "initialize";
    /// Notification sent once the handshake result has been accepted.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Notification asking the peer to abandon an in-flight request.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Liveness check.
    pub const PING: &str = "ping";
    /// One page of tool definitions.
    pub const LIST_TOOLS: &str = "tools/list";
    /// Tool invocation.
    pub const CALL_TOOL: &str = "tools/call";
    /// One page of resource definitions.
    pub const LIST_RESOURCES: &str = "resources/list";
    /// Resource read.
    pub const READ_RESOURCE: &str = "resources/read";
    /// One page of prompt definitions.
    pub const LIST_PROMPTS: &str = "prompts/list";
    /// Prompt rendering.
    pub const GET_PROMPT: &str = "prompts/get";
}
