use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::ToolCatalog;
use crate::error::{ToolError, ToolErrorCode};
use crate::process_runner::CancellationToken;

const MCP_JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "cypress-mcp-rs";
const MCP_ERROR_PARSE: i64 = -32700;
const MCP_ERROR_INVALID_REQUEST: i64 = -32600;
const MCP_ERROR_METHOD_NOT_FOUND: i64 = -32601;
const MCP_ERROR_INVALID_PARAMS: i64 = -32602;
const MCP_ERROR_INTERNAL: i64 = -32603;
const MCP_CONTENT_TYPE_TEXT: &str = "text";
const MCP_NOTIFICATION_CANCELLED: &str = "notifications/cancelled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpServeReport {
    pub processed_frames: usize,
    pub error_count: usize,
}

#[derive(Debug, Clone)]
struct McpJsonRpcRequest {
    id: Value,
    method: String,
    params: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
struct McpDispatchError {
    id: Value,
    code: i64,
    message: String,
}

impl McpDispatchError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Serves the catalog over the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(catalog: Arc<ToolCatalog>) -> Result<McpServeReport> {
    let reader = tokio::io::BufReader::new(tokio::io::stdin());
    serve_mcp_jsonrpc(catalog, reader, tokio::io::stdout()).await
}

/// Reads one JSON-RPC message per line and writes one response per line.
///
/// Tool calls run as separate tasks; every response goes through a single writer task so
/// frames never interleave. Returns once the reader is exhausted and every in-flight call
/// has answered.
pub async fn serve_mcp_jsonrpc<R, W>(
    catalog: Arc<ToolCatalog>,
    reader: R,
    writer: W,
) -> Result<McpServeReport>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_frames(writer, frames_rx));
    let in_flight: InFlight = Arc::default();
    let mut calls = JoinSet::new();
    let mut report = McpServeReport::default();
    let mut lines = reader.lines();

    info!(tools = catalog.descriptors().len(), "mcp server ready");
    while let Some(line) = lines
        .next_line()
        .await
        .context("failed reading mcp frame from input")?
    {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        report.processed_frames = report.processed_frames.saturating_add(1);

        let frame = match serde_json::from_str::<Value>(line) {
            Ok(frame) => frame,
            Err(error) => {
                report.error_count = report.error_count.saturating_add(1);
                let _ = frames_tx.send(jsonrpc_error_frame(
                    Value::Null,
                    MCP_ERROR_PARSE,
                    format!("failed to parse mcp frame: {error}"),
                ));
                continue;
            }
        };

        if is_notification(&frame) {
            handle_notification(&frame, &in_flight);
            continue;
        }

        let request = match parse_jsonrpc_request(&frame) {
            Ok(request) => request,
            Err(error) => {
                report.error_count = report.error_count.saturating_add(1);
                let _ = frames_tx.send(jsonrpc_error_frame(error.id, error.code, error.message));
                continue;
            }
        };
        debug!(method = %request.method, id = %request.id, "mcp request");

        if request.method == "tools/call" {
            match spawn_tool_call(&catalog, &request, &in_flight, &frames_tx, &mut calls) {
                Ok(()) => {}
                Err(error) => {
                    report.error_count = report.error_count.saturating_add(1);
                    let _ = frames_tx.send(jsonrpc_error_frame(error.id, error.code, error.message));
                }
            }
            continue;
        }

        let response = match dispatch_jsonrpc_request(&request, &catalog) {
            Ok(result) => jsonrpc_result_frame(request.id, result),
            Err(error) => {
                report.error_count = report.error_count.saturating_add(1);
                jsonrpc_error_frame(error.id, error.code, error.message)
            }
        };
        let _ = frames_tx.send(response);
    }

    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok(true) => {}
            Ok(false) => report.error_count = report.error_count.saturating_add(1),
            Err(error) => {
                warn!("tool call task failed: {error}");
                report.error_count = report.error_count.saturating_add(1);
            }
        }
    }
    drop(frames_tx);
    writer_task
        .await
        .context("mcp writer task panicked")??;

    info!(
        processed_frames = report.processed_frames,
        error_count = report.error_count,
        "mcp input closed"
    );
    Ok(report)
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Value>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut encoded = serde_json::to_vec(&frame).context("failed encoding mcp frame")?;
        encoded.push(b'\n');
        writer
            .write_all(&encoded)
            .await
            .context("failed writing mcp frame")?;
        writer.flush().await.context("failed flushing mcp output")?;
    }
    writer.shutdown().await.context("failed closing mcp output")?;
    Ok(())
}

fn is_notification(frame: &Value) -> bool {
    frame
        .as_object()
        .is_some_and(|object| !object.contains_key("id") && object.contains_key("method"))
}

fn handle_notification(frame: &Value, in_flight: &InFlight) {
    let method = frame.get("method").and_then(Value::as_str).unwrap_or_default();
    if method != MCP_NOTIFICATION_CANCELLED {
        debug!(method, "mcp notification");
        return;
    }
    let Some(request_id) = frame.pointer("/params/requestId") else {
        warn!("cancellation notification without requestId");
        return;
    };
    let key = request_id.to_string();
    let token = lock_in_flight(in_flight).get(&key).cloned();
    match token {
        Some(token) => {
            info!(request_id = %key, "cancelling tool call");
            token.cancel();
        }
        None => debug!(request_id = %key, "cancellation for unknown or finished request"),
    }
}

fn spawn_tool_call(
    catalog: &Arc<ToolCatalog>,
    request: &McpJsonRpcRequest,
    in_flight: &InFlight,
    frames_tx: &mpsc::UnboundedSender<Value>,
    calls: &mut JoinSet<bool>,
) -> Result<(), McpDispatchError> {
    let tool_name = request
        .params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                request.id.clone(),
                MCP_ERROR_INVALID_PARAMS,
                "tools/call requires non-empty field 'name'",
            )
        })?
        .to_owned();
    let arguments = request.params.get("arguments").cloned().unwrap_or(Value::Null);

    let key = request.id.to_string();
    let token = CancellationToken::new();
    lock_in_flight(in_flight).insert(key.clone(), token.clone());

    let catalog = Arc::clone(catalog);
    let in_flight = Arc::clone(in_flight);
    let frames_tx = frames_tx.clone();
    let id = request.id.clone();
    calls.spawn(async move {
        let outcome = catalog.call(&tool_name, arguments, &token).await;
        lock_in_flight(&in_flight).remove(&key);
        let succeeded = outcome.is_ok();
        let frame = match outcome {
            Ok(content) => jsonrpc_result_frame(id, mcp_tool_call_result(&content)),
            Err(error) => tool_error_frame(id, &error),
        };
        let _ = frames_tx.send(frame);
        succeeded
    });
    Ok(())
}

fn lock_in_flight(
    in_flight: &InFlight,
) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
    in_flight
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn parse_jsonrpc_request(value: &Value) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let Some(object) = value.as_object() else {
        return Err(McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must be an object",
        ));
    };
    let id = object.get("id").cloned().ok_or_else(|| {
        McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must include id",
        )
    })?;
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if jsonrpc != MCP_JSONRPC_VERSION {
        return Err(McpDispatchError::new(
            id,
            MCP_ERROR_INVALID_REQUEST,
            format!("jsonrpc must be '{MCP_JSONRPC_VERSION}'"),
        ));
    }
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                id.clone(),
                MCP_ERROR_INVALID_REQUEST,
                "jsonrpc request must include non-empty method",
            )
        })?;
    let params = match object.get("params") {
        Some(Value::Object(params)) => params.clone(),
        Some(Value::Null) | None => serde_json::Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                id,
                MCP_ERROR_INVALID_PARAMS,
                "jsonrpc request params must be an object",
            ))
        }
    };
    Ok(McpJsonRpcRequest {
        id,
        method: method.to_owned(),
        params,
    })
}

fn dispatch_jsonrpc_request(
    request: &McpJsonRpcRequest,
    catalog: &ToolCatalog,
) -> Result<Value, McpDispatchError> {
    match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(handle_tools_list(catalog)),
        other => Err(McpDispatchError::new(
            request.id.clone(),
            MCP_ERROR_METHOD_NOT_FOUND,
            format!("unsupported method '{other}'"),
        )),
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn handle_tools_list(catalog: &ToolCatalog) -> Value {
    let mut tools = catalog.descriptors().to_vec();
    tools.sort_by(|left, right| left.name.cmp(right.name));
    json!({
        "tools": tools
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema
                })
            })
            .collect::<Vec<_>>()
    })
}

fn mcp_tool_call_result(content: &Value) -> Value {
    let text = serde_json::to_string_pretty(content)
        .unwrap_or_else(|_| "{\"error\":\"failed to serialize tool result\"}".to_owned());
    json!({
        "content": [{
            "type": MCP_CONTENT_TYPE_TEXT,
            "text": text
        }]
    })
}

fn tool_error_frame(id: Value, error: &ToolError) -> Value {
    let code = match error.code {
        ToolErrorCode::InvalidArgs | ToolErrorCode::UnknownTool => MCP_ERROR_INVALID_PARAMS,
        ToolErrorCode::PathOutsideRoot
        | ToolErrorCode::MalformedConfig
        | ToolErrorCode::Io
        | ToolErrorCode::SpawnFailed => MCP_ERROR_INTERNAL,
    };
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": error.message,
            "data": { "code": error.code.as_str() }
        }
    })
}

fn jsonrpc_result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error_frame(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}
