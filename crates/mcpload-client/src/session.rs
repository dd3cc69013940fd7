//! Client session lifecycle and RPC surface
//!
//! A [`ClientSession`] moves through `Unconnected → Connecting → Connected →
//! Closed`. RPCs succeed only while `Connected`; `Closed` is terminal.
//!
//! ```rust,ignore
//! let session = ClientSession::new(SessionOptions::default().with_metrics(recorder));
//! session.connect_with_config(&config, &TransportFactory::default()).await?;
//!
//! let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
//! let tools = session.list_all_tools(None, &ctx).await?;
//! let result = session
//!     .call_tool(CallToolRequest::new("myTool").with_arguments(json!({"x": 1})), &ctx)
//!     .await?;
//! session.close().await?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use futures::Stream;
use mcpload_protocol::types::{
    CallToolRequest, CallToolResult, CancelledNotification, ClientCapabilities, GetPromptRequest,
    GetPromptResult, InitializeRequest, InitializeResult, ListPromptsRequest, ListPromptsResult,
    ListResourcesRequest, ListResourcesResult, ListToolsRequest, ListToolsResult, Meta,
    PaginatedRequest, Prompt, ReadResourceRequest, ReadResourceResult, Resource, Tool,
};
use mcpload_protocol::{
    JsonRpcNotification, JsonRpcRequest, MessageId, PROTOCOL_VERSION, is_supported_version,
    methods,
};
use mcpload_transport_traits::{Transport, TransportMessage, TransportMetrics};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::{ClientConfig, SessionOptions};
use crate::context::CallContext;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::pagination::{Page, Paginator, collect_all};
use crate::transport::TransportFactory;

/// Observable lifecycle state of a [`ClientSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, no transport yet
    Unconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake done; RPCs allowed
    Connected,
    /// Terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

enum Phase {
    Unconnected,
    Connecting,
    Connected {
        connection: Arc<Connection>,
        init: InitializeResult,
    },
    Closed,
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Unconnected => SessionState::Unconnected,
            Self::Connecting => SessionState::Connecting,
            Self::Connected { .. } => SessionState::Connected,
            Self::Closed => SessionState::Closed,
        }
    }
}

/// A connected transport plus its routing task and id counter.
#[derive(Debug)]
struct Connection {
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    next_id: AtomicI64,
}

impl Connection {
    fn start(transport: Arc<dyn Transport>) -> Self {
        Self {
            dispatcher: Dispatcher::spawn(Arc::clone(&transport)),
            transport,
            next_id: AtomicI64::new(1),
        }
    }

    /// Send a request and wait for its result.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: &CallContext,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let id = MessageId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut pending = self.dispatcher.register(id.clone())?;
        let message = TransportMessage::from_jsonrpc(
            &JsonRpcRequest::new(method, params, id.clone()).into(),
        )?;

        tokio::select! {
            biased;
            () = self.dispatcher.closed() => return Err(Error::SessionClosed),
            () = ctx.done_by(deadline) => return Err(Error::Cancelled),
            sent = self.transport.send(message) => sent?,
        }
        trace!(method, id = %pending.id(), "Request sent");

        let response = tokio::select! {
            biased;
            () = self.dispatcher.closed() => return Err(Error::SessionClosed),
            () = ctx.done_by(deadline) => {
                let reason = if ctx.is_done() { "cancelled by client" } else { "request timed out" };
                debug!(method, %id, reason, "Abandoning request");
                drop(pending);
                self.cancel_remote(id, reason);
                return Err(Error::Cancelled);
            }
            response = pending.wait() => response?,
        };

        response.into_result().map_err(Error::from)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let message =
            TransportMessage::from_jsonrpc(&JsonRpcNotification::new(method, params).into())?;
        self.transport.send(message).await?;
        Ok(())
    }

    /// Tell the server to stop working on `id`, without waiting.
    fn cancel_remote(&self, id: MessageId, reason: &str) {
        let params = CancelledNotification {
            request_id: id,
            reason: Some(reason.to_string()),
        };
        let message = serde_json::to_value(params)
            .map_err(Error::from)
            .and_then(|params| {
                TransportMessage::from_jsonrpc(
                    &JsonRpcNotification::new(methods::CANCELLED, Some(params)).into(),
                )
                .map_err(Error::from)
            });

        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("Failed to encode cancellation: {}", e);
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            if let Err(e) = transport.send(message).await {
                debug!("Failed to send cancellation: {}", e);
            }
        });
    }

    async fn initialize(&self, options: &SessionOptions) -> Result<InitializeResult> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: options.client_info.clone(),
        };

        let value = self
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(request)?),
                &CallContext::new(),
                None,
            )
            .await?;
        let result: InitializeResult = serde_json::from_value(value)?;

        if !is_supported_version(&result.protocol_version) {
            return Err(Error::Connection(format!(
                "server selected unsupported protocol version {}",
                result.protocol_version
            )));
        }

        self.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    async fn shutdown(&self) -> Result<()> {
        self.dispatcher.close();
        self.transport.disconnect().await?;
        Ok(())
    }
}

struct SessionInner {
    phase: Mutex<Phase>,
    options: SessionOptions,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let Phase::Connected { connection, .. } =
            std::mem::replace(self.phase.get_mut(), Phase::Closed)
        else {
            return;
        };

        connection.dispatcher.close();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = connection.transport.disconnect().await {
                    debug!("Disconnect of dropped session failed: {}", e);
                }
            });
        }
    }
}

/// An MCP client session over one transport.
///
/// Cheap to clone; clones share the session. The transport is released when
/// the session is closed or the last clone is dropped.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

impl ClientSession {
    /// An unconnected session.
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                phase: Mutex::new(Phase::Unconnected),
                options,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.phase.lock().state()
    }

    /// Whether RPCs are currently allowed.
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// The options the session was created with.
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// The handshake result, once connected.
    pub fn initialize_result(&self) -> Option<InitializeResult> {
        match &*self.inner.phase.lock() {
            Phase::Connected { init, .. } => Some(init.clone()),
            _ => None,
        }
    }

    /// Traffic counters of the transport, once connected.
    pub fn transport_metrics(&self) -> Option<TransportMetrics> {
        match &*self.inner.phase.lock() {
            Phase::Connected { connection, .. } => Some(connection.transport.metrics()),
            _ => None,
        }
    }

    /// Connect over `transport` and run the MCP handshake.
    ///
    /// On an already connected session this returns the cached handshake
    /// result and drops `transport` unused.
    ///
    /// # Errors
    ///
    /// [`Error::SessionState`] while connecting or once closed;
    /// [`Error::Connection`] when the transport or handshake fails, after
    /// which the session is closed.
    pub async fn connect<T>(&self, transport: T) -> Result<InitializeResult>
    where
        T: Transport + 'static,
    {
        if let Some(init) = self.begin_connect()? {
            return Ok(init);
        }
        self.finish_connect(Arc::new(transport)).await
    }

    /// Build the transport from `config` and connect over it.
    ///
    /// The transport (and for process configs, the child) is only created
    /// when the session is `Unconnected`.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::connect`], plus [`Error::Config`] for an invalid
    /// config. A config error leaves the session `Unconnected`.
    pub async fn connect_with_config(
        &self,
        config: &ClientConfig,
        factory: &TransportFactory,
    ) -> Result<InitializeResult> {
        if let Some(init) = self.begin_connect()? {
            return Ok(init);
        }

        let transport = match factory.create(config) {
            Ok(transport) => transport,
            Err(e) => {
                let mut phase = self.inner.phase.lock();
                if matches!(*phase, Phase::Connecting) {
                    *phase = match e {
                        Error::Config(_) => Phase::Unconnected,
                        _ => Phase::Closed,
                    };
                }
                return Err(e);
            }
        };

        self.finish_connect(Arc::new(transport)).await
    }

    /// Move to `Connecting`, or return the cached result when connected.
    fn begin_connect(&self) -> Result<Option<InitializeResult>> {
        let mut phase = self.inner.phase.lock();
        match &*phase {
            Phase::Unconnected => {
                *phase = Phase::Connecting;
                Ok(None)
            }
            Phase::Connected { init, .. } => {
                debug!("Session already connected, reusing handshake result");
                Ok(Some(init.clone()))
            }
            Phase::Connecting => Err(Error::SessionState(
                "connect already in progress".to_string(),
            )),
            Phase::Closed => Err(Error::SessionState("session is closed".to_string())),
        }
    }

    async fn finish_connect(&self, transport: Arc<dyn Transport>) -> Result<InitializeResult> {
        let options = &self.inner.options;
        let endpoint = transport.endpoint();
        debug!(
            transport = %transport.transport_type(),
            endpoint = ?endpoint,
            "Connecting MCP session"
        );

        let handshake = async {
            transport.connect().await?;
            let connection = Arc::new(Connection::start(Arc::clone(&transport)));
            let init = connection.initialize(options).await?;
            Ok::<_, Error>((connection, init))
        };

        let outcome = match tokio::time::timeout(options.handshake_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Connection(format!(
                "handshake timed out after {:?}",
                options.handshake_timeout
            ))),
        };

        match outcome {
            Ok((connection, init)) => {
                let accepted = {
                    let mut phase = self.inner.phase.lock();
                    if matches!(*phase, Phase::Connecting) {
                        *phase = Phase::Connected {
                            connection: Arc::clone(&connection),
                            init: init.clone(),
                        };
                        true
                    } else {
                        false
                    }
                };

                if !accepted {
                    debug!("Session closed during handshake, releasing transport");
                    if let Err(e) = connection.shutdown().await {
                        debug!("Releasing transport failed: {}", e);
                    }
                    return Err(Error::SessionClosed);
                }

                info!(
                    server = %init.server_info.name,
                    version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    "MCP session connected"
                );
                Ok(init)
            }
            Err(e) => {
                warn!(endpoint = ?endpoint, "MCP handshake failed: {}", e);
                if let Err(de) = transport.disconnect().await {
                    debug!("Releasing transport failed: {}", de);
                }
                *self.inner.phase.lock() = Phase::Closed;

                Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    /// Close the session. Idempotent and terminal.
    ///
    /// Pending requests fail with [`Error::SessionClosed`]; the transport is
    /// disconnected, terminating a spawned server.
    ///
    /// # Errors
    ///
    /// The transport's disconnect error. The session is closed regardless.
    pub async fn close(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.inner.phase.lock(), Phase::Closed);

        match previous {
            Phase::Connected { connection, .. } => {
                info!("Closing MCP session");
                connection.shutdown().await
            }
            _ => Ok(()),
        }
    }

    fn connection(&self, method: &str) -> Result<Arc<Connection>> {
        match &*self.inner.phase.lock() {
            Phase::Connected { connection, .. } => Ok(Arc::clone(connection)),
            _ => Err(Error::not_connected(method)),
        }
    }

    /// One instrumented request.
    async fn call<P, R>(&self, method: &'static str, params: &P, ctx: &CallContext) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let connection = self.connection(method)?;

        let started = Instant::now();
        let result = async {
            let value = connection
                .request(
                    method,
                    Some(serde_json::to_value(params)?),
                    ctx,
                    self.inner.options.request_timeout,
                )
                .await?;
            Ok::<R, Error>(serde_json::from_value(value)?)
        }
        .await;

        if let Some(recorder) = &self.inner.options.metrics {
            recorder.record(ctx, method, started.elapsed(), result.is_err());
        }
        result
    }

    /// `tools/list`: one page of tools.
    ///
    /// # Errors
    ///
    /// [`Error::SessionState`] outside `Connected`, otherwise whatever the
    /// exchange fails with.
    pub async fn list_tools(
        &self,
        request: ListToolsRequest,
        ctx: &CallContext,
    ) -> Result<ListToolsResult> {
        self.call(methods::LIST_TOOLS, &request, ctx).await
    }

    /// `tools/call`.
    ///
    /// A tool reporting `isError` is still a successful call.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_tools`].
    pub async fn call_tool(
        &self,
        request: CallToolRequest,
        ctx: &CallContext,
    ) -> Result<CallToolResult> {
        self.call(methods::CALL_TOOL, &request, ctx).await
    }

    /// `resources/list`: one page of resources.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_tools`].
    pub async fn list_resources(
        &self,
        request: ListResourcesRequest,
        ctx: &CallContext,
    ) -> Result<ListResourcesResult> {
        self.call(methods::LIST_RESOURCES, &request, ctx).await
    }

    /// `resources/read`.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_tools`].
    pub async fn read_resource(
        &self,
        request: ReadResourceRequest,
        ctx: &CallContext,
    ) -> Result<ReadResourceResult> {
        self.call(methods::READ_RESOURCE, &request, ctx).await
    }

    /// `prompts/list`: one page of prompts.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_tools`].
    pub async fn list_prompts(
        &self,
        request: ListPromptsRequest,
        ctx: &CallContext,
    ) -> Result<ListPromptsResult> {
        self.call(methods::LIST_PROMPTS, &request, ctx).await
    }

    /// `prompts/get`.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_tools`].
    pub async fn get_prompt(
        &self,
        request: GetPromptRequest,
        ctx: &CallContext,
    ) -> Result<GetPromptResult> {
        self.call(methods::GET_PROMPT, &request, ctx).await
    }

    /// `ping`. Every failure, including calling it unconnected, is `false`.
    pub async fn ping(&self, ctx: &CallContext) -> bool {
        match self.call::<_, Value>(methods::PING, &Value::Object(Meta::new()), ctx).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Ping failed: {}", e);
                false
            }
        }
    }

    fn paginator(&self, operation: &'static str) -> Paginator {
        Paginator::new(operation, self.inner.options.max_pages)
    }

    /// Pages of `tools/list`, fetched lazily.
    pub fn tool_pages(
        &self,
        meta: Option<Meta>,
        ctx: CallContext,
    ) -> impl Stream<Item = Result<Page<Tool>>> + Send + 'static {
        let session = self.clone();
        self.paginator("tools").stream(move |cursor| {
            let session = session.clone();
            let ctx = ctx.clone();
            let request = PaginatedRequest {
                meta: meta.clone(),
                cursor: None,
            }
            .with_cursor(cursor);
            async move {
                let result = session.list_tools(request, &ctx).await?;
                Ok(Page::new(result.tools, result.next_cursor))
            }
        })
    }

    /// Pages of `resources/list`, fetched lazily.
    pub fn resource_pages(
        &self,
        meta: Option<Meta>,
        ctx: CallContext,
    ) -> impl Stream<Item = Result<Page<Resource>>> + Send + 'static {
        let session = self.clone();
        self.paginator("resources").stream(move |cursor| {
            let session = session.clone();
            let ctx = ctx.clone();
            let request = PaginatedRequest {
                meta: meta.clone(),
                cursor: None,
            }
            .with_cursor(cursor);
            async move {
                let result = session.list_resources(request, &ctx).await?;
                Ok(Page::new(result.resources, result.next_cursor))
            }
        })
    }

    /// Pages of `prompts/list`, fetched lazily.
    pub fn prompt_pages(
        &self,
        meta: Option<Meta>,
        ctx: CallContext,
    ) -> impl Stream<Item = Result<Page<Prompt>>> + Send + 'static {
        let session = self.clone();
        self.paginator("prompts").stream(move |cursor| {
            let session = session.clone();
            let ctx = ctx.clone();
            let request = PaginatedRequest {
                meta: meta.clone(),
                cursor: None,
            }
            .with_cursor(cursor);
            async move {
                let result = session.list_prompts(request, &ctx).await?;
                Ok(Page::new(result.prompts, result.next_cursor))
            }
        })
    }

    /// Every tool across all pages, in server order.
    ///
    /// `meta` is sent with every page request; `None` sends an empty object.
    ///
    /// # Errors
    ///
    /// [`Error::SessionState`] outside `Connected`; otherwise
    /// [`Error::Pagination`] wrapping the first failure, with nothing returned.
    pub async fn list_all_tools(&self, meta: Option<Meta>, ctx: &CallContext) -> Result<Vec<Tool>> {
        self.connection(methods::LIST_TOOLS)?;
        collect_all(self.tool_pages(Some(meta.unwrap_or_default()), ctx.clone())).await
    }

    /// Every resource across all pages, in server order.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_all_tools`].
    pub async fn list_all_resources(
        &self,
        meta: Option<Meta>,
        ctx: &CallContext,
    ) -> Result<Vec<Resource>> {
        self.connection(methods::LIST_RESOURCES)?;
        collect_all(self.resource_pages(Some(meta.unwrap_or_default()), ctx.clone())).await
    }

    /// Every prompt across all pages, in server order.
    ///
    /// # Errors
    ///
    /// As [`ClientSession::list_all_tools`].
    pub async fn list_all_prompts(
        &self,
        meta: Option<Meta>,
        ctx: &CallContext,
    ) -> Result<Vec<Prompt>> {
        self.connection(methods::LIST_PROMPTS)?;
        collect_all(self.prompt_pages(Some(meta.unwrap_or_default()), ctx.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Unconnected.to_string(), "unconnected");
        assert_eq!(SessionState::Closed.to_string(), "closed");
    }

    #[tokio::test]
    async fn test_rpcs_require_connection() {
        let session = ClientSession::default();
        let ctx = CallContext::new();

        let err = session
            .list_tools(ListToolsRequest::default(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "must connect before calling tools/list");
        assert!(!session.ping(&ctx).await);
        assert!(matches!(
            session.list_all_prompts(None, &ctx).await,
            Err(Error::SessionState(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let session = ClientSession::default();
        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        let err = session
            .connect_with_config(
                &ClientConfig::process("/bin/true"),
                &TransportFactory::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionState(_)));
    }

    #[tokio::test]
    async fn test_config_error_keeps_session_unconnected() {
        let session = ClientSession::default();
        let err = session
            .connect_with_config(&ClientConfig::process(""), &TransportFactory::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(session.state(), SessionState::Unconnected);
    }
}
