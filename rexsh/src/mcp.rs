//! MCP (Model Context Protocol) stdio server.
//!
//! Exposes the [`ToolServer`] tools via JSON-RPC 2.0, one JSON object per
//! line in each direction:
//!
//! - `initialize` returns the server's capabilities
//! - `notifications/initialized` and other notifications get no response
//! - `ping` returns an empty result
//! - `tools/list` enumerates the tools
//! - `tools/call` runs a tool and returns its JSON result as text content
//!
//! Requests are handled concurrently, so a long `send_input` wait does not
//! hold up other calls. Responses may therefore arrive out of request order;
//! clients match them by `id`.

use std::io;
use std::sync::Arc;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::tools::{ToolError, ToolErrorCode, ToolServer};

/// Protocol revision announced when the client does not name one.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const SERVER_NAME: &str = "rexsh";

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl From<ToolError> for JsonRpcError {
    fn from(error: ToolError) -> Self {
        let code = match error.code {
            ToolErrorCode::InvalidParams => INVALID_PARAMS,
            ToolErrorCode::MethodNotFound => METHOD_NOT_FOUND,
            ToolErrorCode::InternalError => INTERNAL_ERROR,
        };
        Self {
            code,
            message: error.message,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// MCP server over one [`ToolServer`].
pub struct McpServer {
    tools: Arc<ToolServer>,
}

impl McpServer {
    pub fn new(tools: Arc<ToolServer>) -> Self {
        Self { tools }
    }

    /// Serve requests from `input` until it reaches EOF and every request
    /// read so far has been answered.
    pub async fn run(
        &self,
        input: impl AsyncBufRead + Unpin,
        mut output: impl AsyncWrite + Unpin,
    ) -> io::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
        let mut tx = Some(tx);
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line(), if tx.is_some() => match line? {
                    Some(line) => {
                        if let Some(tx) = &tx {
                            self.accept(line.trim(), tx);
                        }
                    }
                    // Answers still in flight hold their own senders.
                    None => tx = None,
                },
                Some(response) = rx.recv() => write_response(&mut output, &response).await?,
                else => break,
            }
        }
        debug!("input closed, MCP server stopping");
        Ok(())
    }

    fn accept(&self, line: &str, tx: &mpsc::UnboundedSender<JsonRpcResponse>) {
        if line.is_empty() {
            return;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                let (code, message) = match serde_json::from_str::<Value>(line) {
                    Ok(_) => (INVALID_REQUEST, format!("Invalid request: {}", e)),
                    Err(_) => (PARSE_ERROR, "Parse error".to_string()),
                };
                let _ = tx.send(JsonRpcResponse::failure(Value::Null, code, message));
                return;
            }
        };
        if request.jsonrpc != "2.0" {
            debug!("request without jsonrpc 2.0 marker: {}", request.method);
        }

        let Some(id) = request.id else {
            debug!("notification: {}", request.method);
            return;
        };

        let tools = Arc::clone(&self.tools);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle(&tools, id, &request.method, request.params).await;
            let _ = tx.send(response);
        });
    }
}

/// Answer one request.
pub async fn handle(
    tools: &ToolServer,
    id: Value,
    method: &str,
    params: Option<Value>,
) -> JsonRpcResponse {
    match method {
        "initialize" => {
            let version = params
                .as_ref()
                .and_then(|p| p.get("protocolVersion"))
                .and_then(Value::as_str)
                .unwrap_or(PROTOCOL_VERSION);
            JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": version,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": SERVER_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
        }
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => match serde_json::to_value(ToolServer::definitions()) {
            Ok(tools) => JsonRpcResponse::success(id, json!({ "tools": tools })),
            Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
        },
        "tools/call" => {
            let call: CallParams = match params.map(serde_json::from_value).transpose() {
                Ok(Some(call)) => call,
                Ok(None) => {
                    return JsonRpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        "Missing params for tools/call",
                    );
                }
                Err(e) => {
                    return JsonRpcResponse::failure(
                        id,
                        INVALID_PARAMS,
                        format!("Invalid tools/call params: {}", e),
                    );
                }
            };

            let arguments = call.arguments.unwrap_or_else(|| json!({}));
            match tools.call(&call.name, arguments).await {
                Ok(result) => match serde_json::to_string_pretty(&result) {
                    Ok(text) => JsonRpcResponse::success(
                        id,
                        json!({ "content": [{ "type": "text", "text": text }] }),
                    ),
                    Err(e) => JsonRpcResponse::failure(id, INTERNAL_ERROR, e.to_string()),
                },
                Err(e) => {
                    warn!("tool {} failed: {}", call.name, e);
                    let error = JsonRpcError::from(e);
                    JsonRpcResponse::failure(id, error.code, error.message)
                }
            }
        }
        other => JsonRpcResponse::failure(
            id,
            METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        ),
    }
}

async fn write_response(
    writer: &mut (impl AsyncWrite + Unpin),
    response: &JsonRpcResponse,
) -> io::Result<()> {
    let mut line = match serde_json::to_vec(response) {
        Ok(line) => line,
        Err(e) => {
            error!("failed to encode response: {}", e);
            return Ok(());
        }
    };
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
