//! MCP transports: a spawned child process over stdio, and streamable HTTP.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use proto::McpError;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::types::{
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerConnection, TransportConfig,
};

/// Session header of the streamable HTTP binding.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// A request/notify channel to one server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Sends a request and waits for its result.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError>;

    /// Sends a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// Tears the channel down. Further requests fail with [`McpError::Closed`].
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens transports for connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        connection: &ServerConnection,
    ) -> Result<Box<dyn McpTransport>, McpError>;
}

/// Opens the transport named by the connection's config.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        connection: &ServerConnection,
    ) -> Result<Box<dyn McpTransport>, McpError> {
        let timeout = connection.timeout_secs.map(Duration::from_secs);
        match &connection.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut transport = StdioTransport::spawn(command, args, env, cwd.as_deref())?;
                transport.timeout = timeout;
                Ok(Box::new(transport))
            }
            TransportConfig::Http { url, headers } => {
                let mut transport = HttpTransport::new(url, headers.clone())?;
                transport.timeout = timeout;
                Ok(Box::new(transport))
            }
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Child process speaking newline-delimited JSON-RPC on stdin/stdout.
pub struct StdioTransport {
    request_id: AtomicU64,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin_tx: mpsc::Sender<String>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    timeout: Option<Duration>,
}

impl StdioTransport {
    /// Spawns the server process and starts its reader/writer tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &IndexMap<String, String>,
        cwd: Option<&std::path::Path>,
    ) -> Result<Self, McpError> {
        info!(command = %command, ?args, "Spawning MCP server");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::Spawn(format!("{command}: {e}")))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("stdout not captured".to_string()))?;

        let (stdin_tx, mut stdin_rx) = mpsc::channel::<String>(32);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let connected_for_writer = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(frame) = stdin_rx.recv().await {
                let written = async {
                    stdin.write_all(frame.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                }
                .await;
                if let Err(e) = written {
                    warn!(error = %e, "MCP stdin write failed");
                    connected_for_writer.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let pending_for_reader = Arc::clone(&pending);
        let connected_for_reader = Arc::clone(&connected);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match JsonRpcResponse::from_frame(line) {
                    Ok(Some(response)) => {
                        let sender = response
                            .request_id()
                            .and_then(|id| pending_for_reader.lock().remove(&id));
                        match sender {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => debug!(id = ?response.id, "Unmatched MCP response"),
                        }
                    }
                    Ok(None) => debug!(frame = %line, "Ignoring server-initiated MCP message"),
                    Err(e) => debug!(error = %e, frame = %line, "Non-JSON line on MCP stdout"),
                }
            }
            connected_for_reader.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with `Closed`.
            pending_for_reader.lock().clear();
            debug!("MCP stdout reader finished");
        });

        Ok(Self {
            request_id: AtomicU64::new(1),
            child: tokio::sync::Mutex::new(Some(child)),
            stdin_tx,
            pending,
            connected,
            timeout: None,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: &impl Serialize) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::Closed);
        }
        let text = serde_json::to_string(frame)?;
        self.stdin_tx
            .send(text)
            .await
            .map_err(|_| McpError::Closed)
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        debug!(id, method = %method, "Sending MCP request");
        if let Err(e) = self.send_frame(&JsonRpcRequest::new(id, method, params)).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(McpError::Timeout(limit.as_secs()));
                }
            },
            None => rx.await,
        }
        .map_err(|_| McpError::Closed)?;

        response.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.send_frame(&JsonRpcNotification::new(method, params))
            .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
            debug!("MCP server process stopped");
        }
        Ok(())
    }
}

/// Streamable HTTP binding: one POST per message, replies as JSON or SSE.
pub struct HttpTransport {
    url: String,
    headers: IndexMap<String, String>,
    client: reqwest::Client,
    request_id: AtomicU64,
    session_id: Mutex<Option<String>>,
    closed: AtomicBool,
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(url: &str, headers: IndexMap<String, String>) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| McpError::Connection(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            headers,
            client,
            request_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
            closed: AtomicBool::new(false),
            timeout: None,
        })
    }

    /// Session id assigned by the server, once known.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn decorate(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(id) = self.session_id() {
            req = req.header(SESSION_HEADER, id);
        }
        if let Some(limit) = self.timeout {
            req = req.timeout(limit);
        }
        req
    }

    fn map_send_error(&self, e: reqwest::Error) -> McpError {
        match self.timeout {
            Some(limit) if e.is_timeout() => McpError::Timeout(limit.as_secs()),
            _ => McpError::Connection(e.to_string()),
        }
    }

    async fn post(&self, body: &impl Serialize) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }
        let req = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        let resp = self
            .decorate(req)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(id.to_string());
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        debug!(id, method = %method, url = %self.url, "Posting MCP request");
        let resp = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_stream = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let body = resp.text().await.map_err(|e| self.map_send_error(e))?;

        let response = if is_stream {
            sse_data_frames(&body)
                .iter()
                .filter_map(|frame| JsonRpcResponse::from_frame(frame).ok().flatten())
                .find(|r| r.request_id() == Some(id))
                .ok_or_else(|| {
                    McpError::Protocol(format!("no response for request {id} in event stream"))
                })?
        } else {
            JsonRpcResponse::from_frame(&body)?.ok_or_else(|| {
                McpError::Protocol("expected a response, got a server message".to_string())
            })?
        };
        response.into_result()
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(id) = self.session_id() else {
            return Ok(());
        };
        let req = self.client.delete(&self.url).header(SESSION_HEADER, id);
        match self.decorate(req).send().await {
            Ok(resp) => debug!(status = %resp.status(), "MCP session terminated"),
            Err(e) => warn!(error = %e, "MCP session DELETE failed"),
        }
        Ok(())
    }
}

/// Extracts the `data:` payload of every event in an SSE body. Multi-line
/// data is joined with `\n`.
pub fn sse_data_frames(body: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !data.is_empty() {
                frames.push(data.join("\n"));
                data.clear();
            }
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frames_split_on_blank_lines() {
        let body = "event: message\ndata: {\"a\":1}\n\n: comment\ndata: {\"b\":\ndata: 2}\n";
        assert_eq!(sse_data_frames(body), vec![r#"{"a":1}"#, "{\"b\":\n2}"]);
    }

    #[test]
    fn sse_handles_crlf_and_no_space() {
        let body = "data:{\"x\":true}\r\n\r\n";
        assert_eq!(sse_data_frames(body), vec![r#"{"x":true}"#]);
        assert!(sse_data_frames("event: ping\n\n").is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let result = StdioTransport::spawn(
            "definitely-not-an-mcp-server-binary",
            &[],
            &IndexMap::new(),
            None,
        );
        assert!(matches!(result, Err(McpError::Spawn(_))));
    }
}
