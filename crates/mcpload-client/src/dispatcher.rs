//! Response routing
//!
//! One background task per session is the only caller of
//! [`Transport::receive`]. It completes pending requests by id, answers the
//! few server-initiated requests a load client must handle, and logs
//! notifications.
//!
//! ```text
//! request()                         routing task
//!   register(id) ──► PendingTable ◄── response(id)
//!   transport.send                    transport.receive
//!   pending.wait ◄─────────────────── oneshot
//! ```
//!
//! Responses complete in whatever order the server sends them. When the
//! transport ends or fails, every waiter fails with the transport's error;
//! when the session closes, every waiter fails with [`Error::SessionClosed`].
//! Registration after either fails immediately.

use std::collections::HashMap;
use std::sync::Arc;

use mcpload_protocol::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, MessageId, methods,
};
use mcpload_transport_traits::{Transport, TransportError, TransportMessage};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

type ResponseResult = std::result::Result<JsonRpcResponse, TransportError>;

#[derive(Debug)]
enum TableState {
    Open,
    Closed,
    Failed(TransportError),
}

#[derive(Debug)]
struct PendingTable {
    waiters: HashMap<MessageId, oneshot::Sender<ResponseResult>>,
    state: TableState,
}

impl PendingTable {
    fn new() -> Self {
        Self {
            waiters: HashMap::new(),
            state: TableState::Open,
        }
    }

    fn complete(&mut self, response: JsonRpcResponse) {
        let Some(id) = response.id.as_message_id().cloned() else {
            warn!("Received response with null id");
            return;
        };

        match self.waiters.remove(&id) {
            Some(tx) => {
                trace!(%id, "Routing response");
                // The caller may have given up already.
                let _ = tx.send(Ok(response));
            }
            None => warn!(%id, "Received response for unknown or abandoned request"),
        }
    }

    fn close(&mut self) {
        if matches!(self.state, TableState::Open) {
            self.state = TableState::Closed;
        }
        // Dropping the senders wakes every waiter with `SessionClosed`.
        self.waiters.clear();
    }

    fn fail(&mut self, err: &TransportError) {
        if !matches!(self.state, TableState::Open) {
            return;
        }
        self.state = TableState::Failed(err.clone());
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

/// A registered request awaiting its response.
///
/// Dropping it (completion, cancellation, timeout) removes the table entry.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    id: MessageId,
    rx: oneshot::Receiver<ResponseResult>,
    table: Arc<Mutex<PendingTable>>,
}

impl PendingRequest {
    pub(crate) fn id(&self) -> &MessageId {
        &self.id
    }

    /// Wait for the correlated response.
    pub(crate) async fn wait(&mut self) -> Result<JsonRpcResponse> {
        match (&mut self.rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(Error::Transport(err)),
            Err(_) => Err(Error::SessionClosed),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.table.lock().waiters.remove(&self.id);
    }
}

/// Owns the routing task of one session.
#[derive(Debug)]
pub(crate) struct Dispatcher {
    table: Arc<Mutex<PendingTable>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start routing messages received from `transport`.
    pub(crate) fn spawn(transport: Arc<dyn Transport>) -> Self {
        let table = Arc::new(Mutex::new(PendingTable::new()));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(route(
            transport,
            Arc::clone(&table),
            shutdown.clone(),
        ));

        Self {
            table,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// Reserve a slot for the response to `id`.
    ///
    /// Must happen before the request is sent so a fast response is not lost.
    pub(crate) fn register(&self, id: MessageId) -> Result<PendingRequest> {
        let (tx, rx) = oneshot::channel();
        let mut table = self.table.lock();

        match &table.state {
            TableState::Open => {}
            TableState::Closed => return Err(Error::SessionClosed),
            TableState::Failed(err) => return Err(Error::Transport(err.clone())),
        }
        table.waiters.insert(id.clone(), tx);
        drop(table);

        Ok(PendingRequest {
            id,
            rx,
            table: Arc::clone(&self.table),
        })
    }

    /// Number of requests awaiting a response.
    pub(crate) fn pending(&self) -> usize {
        self.table.lock().waiters.len()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub(crate) fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.shutdown.cancelled()
    }

    /// Fail every waiter with `SessionClosed` and stop routing.
    pub(crate) fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(pending = self.pending(), "Closing dispatcher");
        }
        self.table.lock().close();
        self.shutdown.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

async fn route(
    transport: Arc<dyn Transport>,
    table: Arc<Mutex<PendingTable>>,
    shutdown: CancellationToken,
) {
    debug!("Response routing task started");

    loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = transport.receive() => received,
        };

        match received {
            Ok(Some(message)) => dispatch(&transport, &table, message),
            Ok(None) => {
                info!("Server closed the connection");
                table.lock().fail(&TransportError::ConnectionLost(
                    "server closed the connection".to_string(),
                ));
                break;
            }
            Err(e) => {
                warn!("Transport receive failed: {}", e);
                table.lock().fail(&e);
                break;
            }
        }
    }

    debug!("Response routing task terminated");
}

fn dispatch(
    transport: &Arc<dyn Transport>,
    table: &Arc<Mutex<PendingTable>>,
    message: TransportMessage,
) {
    let message = match message.to_jsonrpc() {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed JSON-RPC message: {}", e);
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => table.lock().complete(response),
        JsonRpcMessage::Request(request) => answer(transport, request),
        JsonRpcMessage::Notification(notification) => {
            debug!(method = %notification.method, "Server notification");
        }
    }
}

/// Reply to a server-initiated request without blocking the routing loop.
fn answer(transport: &Arc<dyn Transport>, request: JsonRpcRequest) {
    debug!(method = %request.method, id = %request.id, "Server request");

    let response = if request.method == methods::PING {
        JsonRpcResponse::success(json!({}), request.id)
    } else {
        JsonRpcResponse::error_response(
            JsonRpcError::method_not_found(&request.method),
            request.id,
        )
    };

    let message = match TransportMessage::from_jsonrpc(&response.into()) {
        Ok(message) => message,
        Err(e) => {
            warn!("Failed to encode reply to server request: {}", e);
            return;
        }
    };

    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        if let Err(e) = transport.send(message).await {
            debug!("Failed to reply to server request: {}", e);
        }
    });
}
