//! Scriptable MCP server speaking newline-delimited JSON-RPC on stdio.
//!
//! Used by the integration tests as a real subprocess. Behaviour is tuned
//! through environment variables:
//!
//! - `MOCK_PROTOCOL_VERSION`: version returned from `initialize`
//! - `MOCK_FAIL_CURSOR`: `tools/list` with this cursor fails with `-32603`
//! - `MOCK_LOOP_CURSOR`: every `tools/list` page points at this cursor
//! - `MOCK_ENDLESS_PAGES`: `tools/list` never reaches a last page
//!
//! Tools: `myTool`, `echoEnv {name}`, `slow {ms}`, `crash`, `lastCancelled`.
//! Any other tool name is rejected with `-32602`.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use mcpload_protocol::{JsonRpcError, PROTOCOL_VERSION, methods};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

#[derive(Default)]
struct ServerState {
    last_cancelled: Mutex<Option<Value>>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let state = Arc::new(ServerState::default());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("mock-mcp-server: ignoring malformed line");
            continue;
        };

        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string)
        else {
            // A response to something we sent; nothing to do.
            continue;
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let Some(id) = message.get("id").cloned() else {
            if method == methods::CANCELLED {
                *state.last_cancelled.lock() = Some(params);
            }
            continue;
        };

        let tx = tx.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let reply = match handle(&method, &params, &state).await {
                Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
            };
            let _ = tx.send(reply.to_string());
        });
    }

    drop(tx);
    let _ = writer.await;
}

async fn handle(method: &str, params: &Value, state: &ServerState) -> Result<Value, JsonRpcError> {
    match method {
        methods::INITIALIZE => Ok(json!({
            "protocolVersion": env::var("MOCK_PROTOCOL_VERSION")
                .unwrap_or_else(|_| PROTOCOL_VERSION.to_string()),
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": "mock-mcp-server", "version": env!("CARGO_PKG_VERSION")},
        })),
        methods::PING => Ok(json!({})),
        methods::LIST_TOOLS => list_tools(params.get("cursor").and_then(Value::as_str)),
        methods::CALL_TOOL => call_tool(params, state).await,
        methods::LIST_RESOURCES => Ok(json!({
            "resources": [
                {"uri": "mock://readme", "name": "readme", "mimeType": "text/plain"},
            ],
        })),
        methods::READ_RESOURCE => match params.get("uri").and_then(Value::as_str) {
            Some("mock://readme") => Ok(json!({
                "contents": [{"uri": "mock://readme", "mimeType": "text/plain", "text": "hello"}],
            })),
            other => Err(JsonRpcError::invalid_params(&format!(
                "unknown resource {}",
                other.unwrap_or("<missing>")
            ))),
        },
        methods::LIST_PROMPTS => Ok(json!({
            "prompts": [
                {"name": "greet", "arguments": [{"name": "name", "required": true}]},
            ],
        })),
        methods::GET_PROMPT => {
            if params.get("name").and_then(Value::as_str) != Some("greet") {
                return Err(JsonRpcError::invalid_params("unknown prompt"));
            }
            let name = params
                .pointer("/arguments/name")
                .and_then(Value::as_str)
                .unwrap_or("world");
            Ok(json!({
                "description": "A greeting",
                "messages": [
                    {"role": "user", "content": {"type": "text", "text": format!("Hello, {name}!")}},
                ],
            }))
        }
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn list_tools(cursor: Option<&str>) -> Result<Value, JsonRpcError> {
    if let (Some(cursor), Ok(failing)) = (cursor, env::var("MOCK_FAIL_CURSOR"))
        && cursor == failing
    {
        return Err(JsonRpcError::internal_error("page unavailable"));
    }

    if let Ok(looping) = env::var("MOCK_LOOP_CURSOR") {
        return Ok(json!({"tools": [tool("loop")], "nextCursor": looping}));
    }

    if env::var_os("MOCK_ENDLESS_PAGES").is_some() {
        let n = cursor
            .and_then(|c| c.strip_prefix("page-"))
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(1);
        return Ok(json!({"tools": [tool(&format!("tool-{n}"))], "nextCursor": format!("page-{}", n + 1)}));
    }

    Ok(match cursor {
        None => json!({"tools": [tool("alpha"), tool("beta")], "nextCursor": "page-2"}),
        Some("page-2") => json!({"tools": [null, tool("gamma")], "nextCursor": "page-3"}),
        Some("page-3") => json!({"tools": [tool("delta")], "nextCursor": ""}),
        Some(other) => return Err(JsonRpcError::invalid_params(&format!("bad cursor {other}"))),
    })
}

fn tool(name: &str) -> Value {
    json!({"name": name, "inputSchema": {"type": "object"}})
}

fn text(text: impl Into<String>) -> Value {
    json!({"content": [{"type": "text", "text": text.into()}]})
}

async fn call_tool(params: &Value, state: &ServerState) -> Result<Value, JsonRpcError> {
    let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    match params.get("name").and_then(Value::as_str) {
        Some("myTool") => Ok(json!({
            "content": [{"type": "text", "text": "ok"}],
            "structuredContent": {"ok": true, "arguments": arguments},
        })),
        Some("echoEnv") => {
            let name = arguments.get("name").and_then(Value::as_str).unwrap_or("");
            Ok(text(env::var(name).unwrap_or_default()))
        }
        Some("slow") => {
            let ms = arguments.get("ms").and_then(Value::as_u64).unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(text("done"))
        }
        Some("crash") => std::process::exit(3),
        Some("lastCancelled") => Ok(text(
            state
                .last_cancelled
                .lock()
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default(),
        )),
        Some(other) => Err(JsonRpcError::invalid_params(&format!("unknown tool {other}"))),
        None => Err(JsonRpcError::invalid_params("missing tool name")),
    }
}
