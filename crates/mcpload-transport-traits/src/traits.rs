//! The transport contract.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::message::TransportMessage;
use crate::metrics::TransportMetrics;
use crate::types::{TransportState, TransportType};

/// A message channel to one MCP server.
///
/// `send` and `receive` may be called concurrently from different tasks: the
/// client runs a single routing task that is the only caller of `receive`,
/// while any number of callers `send`.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the type of this transport.
    fn transport_type(&self) -> TransportType;

    /// Returns the current state of the transport.
    async fn state(&self) -> TransportState;

    /// Establishes the connection (spawn wiring, SSE endpoint discovery, ...).
    ///
    /// Connecting an already connected transport is a no-op.
    async fn connect(&self) -> TransportResult<()>;

    /// Releases every resource held by the transport.
    ///
    /// Idempotent. After it returns, pending `receive` calls resolve to
    /// `Ok(None)` or an error.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Sends a single serialized JSON-RPC message.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Waits for the next inbound message.
    ///
    /// Returns `Ok(None)` once the peer has closed the channel and no more
    /// messages will arrive.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Returns a snapshot of the transport's traffic counters.
    fn metrics(&self) -> TransportMetrics;

    /// Returns `true` if the transport is currently in the `Connected` state.
    async fn is_connected(&self) -> bool {
        matches!(self.state().await, TransportState::Connected)
    }

    /// Returns the endpoint address or command line, if applicable.
    fn endpoint(&self) -> Option<String> {
        None
    }
}
