//! Client error types.

use mcpload_protocol::JsonRpcError;
use mcpload_transport_traits::TransportError;
use serde_json::Value;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything a client session operation can fail with.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The client configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The transport could not be established or the handshake failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The operation is not allowed in the session's current state.
    #[error("{0}")]
    SessionState(String),

    /// The server answered with a JSON-RPC error.
    #[error("server error {code}: {message}")]
    Protocol {
        /// JSON-RPC error code
        code: i32,
        /// Error message from the server
        message: String,
        /// Optional structured error data
        data: Option<Value>,
    },

    /// A page fetch failed while aggregating a paginated listing.
    #[error("failed to list {operation}: {source}")]
    Pagination {
        /// What was being listed (`tools`, `resources`, `prompts`)
        operation: &'static str,
        /// The failure of the offending page
        #[source]
        source: Box<Error>,
    },

    /// The server kept returning cursors past the page bound, or repeated one.
    #[error("pagination did not terminate: {0}")]
    NonTerminating(String),

    /// The caller cancelled the request or its deadline passed.
    #[error("request cancelled")]
    Cancelled,

    /// The session was closed while the request was in flight.
    #[error("session closed")]
    SessionClosed,

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The error for calling `method` outside the `Connected` state.
    pub fn not_connected(method: &str) -> Self {
        Self::SessionState(format!("must connect before calling {method}"))
    }

    /// Whether the server rejected the request (as opposed to the exchange failing).
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// The JSON-RPC error code, for server-side errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            Self::Pagination { source, .. } => source.code(),
            _ => None,
        }
    }
}

impl From<JsonRpcError> for Error {
    fn from(err: JsonRpcError) -> Self {
        Self::Protocol {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
