//! Shared fixtures: a scripted in-memory peer, a wiremock MCP responder, a
//! live SSE server and the mock server binary.
#![allow(dead_code)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use futures::stream::{self, Stream, StreamExt};
use mcpload_client::{ChannelSink, ClientSession, MetricSample, MetricsRecorder, SessionOptions};
use mcpload_protocol::{JsonRpcError, PROTOCOL_VERSION};
use mcpload_stdio::StdioTransport;
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use wiremock::{Request, Respond, ResponseTemplate};

pub const SESSION_ID: &str = "mock-session-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Options recording into a channel the test can drain.
pub fn recording_options() -> (SessionOptions, mpsc::Receiver<MetricSample>) {
    let (sink, rx) = ChannelSink::channel(1024);
    let options = SessionOptions::default().with_metrics(MetricsRecorder::new(Arc::new(sink)));
    (options, rx)
}

pub fn drain(rx: &mut mpsc::Receiver<MetricSample>) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    while let Ok(sample) = rx.try_recv() {
        samples.push(sample);
    }
    samples
}

// =============================================================================
// In-memory peer
// =============================================================================

/// The server end of an in-memory stdio pair.
pub struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

pub fn duplex_pair() -> (StdioTransport, Peer) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    let transport = StdioTransport::from_raw(client_read, client_write);
    let peer = Peer {
        lines: BufReader::new(server_read).lines(),
        writer: server_write,
    };
    (transport, peer)
}

impl Peer {
    /// Next message from the client, or `None` once it hung up.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for the client")
            .ok()??;
        Some(serde_json::from_str(&line).expect("client sent invalid JSON"))
    }

    pub async fn recv(&mut self) -> Value {
        self.try_recv().await.expect("client hung up")
    }

    pub async fn send(&mut self, message: Value) {
        let mut line = serde_json::to_vec(&message).unwrap();
        line.push(b'\n');
        self.writer.write_all(&line).await.unwrap();
    }

    pub async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
            .await;
    }

    pub async fn reply_error(&mut self, request: &Value, error: JsonRpcError) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "error": error}))
            .await;
    }

    /// Answer `initialize` with `version` and consume `notifications/initialized`.
    pub async fn handshake_with_version(&mut self, version: &str) {
        let init = self.recv().await;
        assert_eq!(init["method"], json!("initialize"));
        assert_eq!(init["params"]["protocolVersion"], json!(PROTOCOL_VERSION));
        self.reply(&init, initialize_result(version)).await;

        if version == PROTOCOL_VERSION {
            let initialized = self.recv().await;
            assert_eq!(initialized["method"], json!("notifications/initialized"));
            assert!(initialized.get("id").is_none());
        }
    }

    pub async fn handshake(&mut self) {
        self.handshake_with_version(PROTOCOL_VERSION).await;
    }

    /// Answer every request with `handler` until the client hangs up.
    pub fn serve<F>(mut self, handler: F) -> JoinHandle<Vec<Value>>
    where
        F: Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut notifications = Vec::new();
            while let Some(message) = self.try_recv().await {
                let method = message["method"].as_str().unwrap_or_default().to_string();
                if message.get("id").is_none() {
                    notifications.push(message);
                    continue;
                }
                match handler(&method, &message["params"]) {
                    Ok(result) => self.reply(&message, result).await,
                    Err(error) => self.reply_error(&message, error).await,
                }
            }
            notifications
        })
    }
}

pub fn initialize_result(version: &str) -> Value {
    json!({
        "protocolVersion": version,
        "capabilities": {"tools": {}},
        "serverInfo": {"name": "scripted", "version": "1.0.0"},
    })
}

/// A session connected to a fresh in-memory peer.
pub async fn connected_session(options: SessionOptions) -> (ClientSession, Peer) {
    let session = ClientSession::new(options);
    let (transport, mut peer) = duplex_pair();

    let (connected, ()) = tokio::join!(session.connect(transport), peer.handshake());
    connected.expect("handshake failed");
    (session, peer)
}

// =============================================================================
// Streamable HTTP mock
// =============================================================================

type Handler = dyn Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync;

/// Answers JSON-RPC POSTs the way a streamable HTTP MCP server does.
pub struct McpResponder {
    handler: Arc<Handler>,
}

impl McpResponder {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(message) = serde_json::from_slice::<Value>(&request.body) else {
            return ResponseTemplate::new(400);
        };
        match scripted_reply(&*self.handler, &message) {
            Some(body) => ResponseTemplate::new(200)
                .insert_header("Mcp-Session-Id", SESSION_ID)
                .set_body_json(body),
            None => ResponseTemplate::new(202),
        }
    }
}

/// The reply to `message`, or `None` for notifications.
fn scripted_reply(handler: &Handler, message: &Value) -> Option<Value> {
    let id = message.get("id")?.clone();
    let method = message["method"].as_str().unwrap_or_default();
    let body = if method == "initialize" {
        json!({"jsonrpc": "2.0", "id": id, "result": initialize_result(PROTOCOL_VERSION)})
    } else {
        match handler(method, &message["params"]) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        }
    };
    Some(body)
}

/// `myTool` echoes its name, `myToolBad` is rejected.
pub fn my_tool_handler(method: &str, params: &Value) -> Result<Value, JsonRpcError> {
    match (method, params["name"].as_str()) {
        ("tools/call", Some("myTool")) => Ok(json!({
            "content": [{"type": "text", "text": "myTool"}],
            "structuredContent": {"output": "myTool"},
        })),
        ("tools/call", Some(name)) => Err(JsonRpcError::invalid_params(&format!(
            "unknown tool {name}"
        ))),
        ("tools/list", _) => match params["cursor"].as_str() {
            None => Ok(json!({"tools": [{"name": "myTool", "inputSchema": {}}], "nextCursor": "2"})),
            Some("2") => Ok(json!({"tools": [{"name": "myToolBad", "inputSchema": {}}]})),
            Some(other) => Err(JsonRpcError::invalid_params(other)),
        },
        ("ping", _) => Ok(json!({})),
        (other, _) => Err(JsonRpcError::method_not_found(other)),
    }
}

// =============================================================================
// Legacy HTTP+SSE server
// =============================================================================

#[derive(Clone)]
struct SseState {
    handler: Arc<Handler>,
    outbound: mpsc::UnboundedSender<Event>,
    events: Arc<parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Event>>>>,
    posted: Arc<parking_lot::Mutex<Vec<Value>>>,
}

/// A live server speaking the HTTP+SSE transport: `GET /sse` announces
/// `/messages` and carries every reply as a `message` event.
pub struct SseServer {
    addr: SocketAddr,
    posted: Arc<parking_lot::Mutex<Vec<Value>>>,
    task: JoinHandle<()>,
}

impl SseServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
    {
        let (outbound, events) = mpsc::unbounded_channel();
        let posted = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let state = SseState {
            handler: Arc::new(handler),
            outbound,
            events: Arc::new(parking_lot::Mutex::new(Some(events))),
            posted: Arc::clone(&posted),
        };

        let app = Router::new()
            .route("/sse", get(sse_stream))
            .route("/messages", post(post_message))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, posted, task }
    }

    pub fn url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    /// Every message POSTed so far, in arrival order.
    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().clone()
    }
}

impl Drop for SseServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn sse_stream(
    State(state): State<SseState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let events = state.events.lock().take().ok_or(StatusCode::CONFLICT)?;

    let endpoint = Event::default()
        .event("endpoint")
        .data("/messages?sessionId=s1");
    let replies = stream::unfold(events, |mut events| async move {
        events.recv().await.map(|event| (event, events))
    });
    Ok(Sse::new(
        stream::once(async move { endpoint })
            .chain(replies)
            .map(Ok),
    ))
}

async fn post_message(State(state): State<SseState>, body: Bytes) -> StatusCode {
    let Ok(message) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    state.posted.lock().push(message.clone());

    if let Some(reply) = scripted_reply(&*state.handler, &message) {
        let event = Event::default().event("message").data(reply.to_string());
        if state.outbound.send(event).is_err() {
            return StatusCode::GONE;
        }
    }
    StatusCode::ACCEPTED
}

// =============================================================================
// Mock server subprocess
// =============================================================================

#[cfg(feature = "mock-server")]
pub fn mock_server(env: &[(&str, &str)]) -> mcpload_client::ClientConfig {
    mcpload_client::ClientConfig::Process(mcpload_client::ProcessConfig {
        path: env!("CARGO_BIN_EXE_mock-mcp-server").to_string(),
        args: Vec::new(),
        env: env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        debug: false,
    })
}
