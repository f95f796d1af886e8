//! Line-delimited JSON-RPC 2.0 transport over stdio or TCP.
//!
//! Each inbound line is one request; each response is written as one line.
//! Requests run concurrently, so responses may come back out of order and
//! are matched by `id`. Requests without an `id` are notifications and get
//! no response.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::tools::{self, Tools};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "ibdesk";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Routes JSON-RPC methods to the tool registry.
pub struct RpcServer {
    tools: Tools,
}

impl RpcServer {
    pub fn new(tools: Tools) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    /// Handle one raw line. Returns the serialized response, or `None` for
    /// notifications.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(line) {
            Err(e) => Some(Response::err(Value::Null, PARSE_ERROR, format!("parse error: {e}"))),
            Ok(raw) => {
                let id = raw.get("id").cloned().unwrap_or(Value::Null);
                match serde_json::from_value::<Request>(raw) {
                    Err(e) => Some(Response::err(id, INVALID_REQUEST, format!("invalid request: {e}"))),
                    Ok(request) => self.handle(request).await,
                }
            }
        };
        response.and_then(|r| match serde_json::to_string(&r) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to encode response: {e}");
                None
            }
        })
    }

    async fn handle(&self, request: Request) -> Option<Response> {
        if request.jsonrpc.as_deref().is_some_and(|v| v != "2.0") {
            let id = request.id.unwrap_or(Value::Null);
            return Some(Response::err(id, INVALID_REQUEST, "jsonrpc must be \"2.0\""));
        }
        let Some(id) = request.id else {
            debug!("Notification {}", request.method);
            return None;
        };

        let response = match request.method.as_str() {
            "initialize" => Response::ok(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
                }),
            ),
            "ping" => Response::ok(id, json!({})),
            "tools/list" => Response::ok(id, json!({ "tools": tools::definitions() })),
            "tools/call" => match serde_json::from_value::<CallParams>(request.params) {
                Err(e) => Response::err(id, INVALID_PARAMS, format!("invalid params: {e}")),
                Ok(call) => {
                    let output = self.tools.call(&call.name, &call.arguments).await;
                    Response::ok(
                        id,
                        json!({
                            "content": [{ "type": "text", "text": output.text }],
                            "isError": output.is_error,
                        }),
                    )
                }
            },
            other => Response::err(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
        };
        Some(response)
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}

/// Serve one line-delimited stream until the reader hits EOF and every
/// in-flight request has answered.
pub async fn serve_stream<R, W>(server: Arc<RpcServer>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let server = Arc::clone(&server);
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Some(response) = server.handle_line(&line).await {
                let _ = tx.send(response);
            }
        });
    }
    drop(tx);

    writer_task
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Serve on stdin/stdout.
pub async fn serve_stdio(server: Arc<RpcServer>) -> Result<()> {
    info!("Serving JSON-RPC on stdio");
    serve_stream(server, tokio::io::stdin(), tokio::io::stdout()).await
}

/// A source of inbound TCP connections.
pub trait Incoming {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Incoming for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Accept TCP connections forever, one task per connection.
pub async fn serve_tcp(server: Arc<RpcServer>, listener: TcpListener) -> Result<()> {
    info!("Serving JSON-RPC on {}", listener.local_addr()?);
    serve_incoming(server, listener).await
}

/// Accept loop behind [`serve_tcp`]. A failed accept is logged and retried;
/// it never ends the loop.
pub async fn serve_incoming(server: Arc<RpcServer>, mut incoming: impl Incoming) -> Result<()> {
    loop {
        let (stream, peer) = match incoming.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        info!("Client connected: {peer}");
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            match serve_stream(server, reader, writer).await {
                Ok(()) => info!("Client disconnected: {peer}"),
                Err(e) => warn!("Connection {peer} ended with error: {e}"),
            }
        });
    }
}
