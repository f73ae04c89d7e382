//! One MCP session: open, handshake, a few requests, close.

use std::collections::HashSet;

use proto::McpError;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::transport::{Connector, McpTransport};
use crate::types::{CallToolResult, ListToolsResult, McpTool, PROTOCOL_VERSION, ServerConnection};

const CLIENT_NAME: &str = "agentrt";

/// An initialized session over one transport.
pub struct McpSession {
    server_id: String,
    transport: Box<dyn McpTransport>,
    server_info: Value,
}

impl McpSession {
    /// Connects and performs the `initialize` handshake. The transport is
    /// closed again when the handshake fails.
    pub async fn open(
        connector: &dyn Connector,
        connection: &ServerConnection,
    ) -> Result<Self, McpError> {
        let transport = connector.connect(connection).await?;
        let mut session = Self {
            server_id: connection.id.clone(),
            transport,
            server_info: Value::Null,
        };
        match session.initialize().await {
            Ok(()) => Ok(session),
            Err(e) => {
                warn!(server = %session.server_id, error = %e, "MCP handshake failed");
                let _ = session.transport.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = self.transport.request("initialize", Some(params)).await?;
        if !result.is_object() {
            return Err(McpError::Protocol(
                "initialize returned a non-object result".to_string(),
            ));
        }
        self.server_info = result.get("serverInfo").cloned().unwrap_or(Value::Null);
        debug!(
            server = %self.server_id,
            protocol = ?result.get("protocolVersion"),
            info = %self.server_info,
            "MCP session initialized"
        );
        self.transport
            .notify("notifications/initialized", None)
            .await
    }

    /// `serverInfo` reported during the handshake.
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    /// Lists every tool, following `nextCursor` until the server stops
    /// paginating. A repeated cursor ends the walk.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let value = self.transport.request("tools/list", params).await?;
            let page: ListToolsResult = serde_json::from_value(value)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if seen.insert(next.clone()) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.server_id, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    /// Calls one tool with a verbatim argument map.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let value = self.transport.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn close(self) -> Result<(), McpError> {
        self.transport.close().await
    }
}

/// Opens a fresh session, lists its tools and closes it.
pub async fn discover(
    connector: &dyn Connector,
    connection: &ServerConnection,
) -> Result<Vec<McpTool>, McpError> {
    info!(server = %connection.id, transport = connection.kind(), "Discovering MCP tools");
    let session = McpSession::open(connector, connection).await?;
    let listed = session.list_tools().await;
    close_quietly(session).await;
    listed
}

/// Opens a fresh session, calls `name` and closes it.
pub async fn call(
    connector: &dyn Connector,
    connection: &ServerConnection,
    name: &str,
    arguments: Map<String, Value>,
) -> Result<CallToolResult, McpError> {
    debug!(server = %connection.id, tool = %name, "Calling MCP tool");
    let session = McpSession::open(connector, connection).await?;
    let outcome = session.call_tool(name, arguments).await;
    close_quietly(session).await;
    outcome
}

async fn close_quietly(session: McpSession) {
    let server = session.server_id.clone();
    if let Err(e) = session.close().await {
        warn!(server = %server, error = %e, "MCP session close failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Replays canned results and records every method sent.
    #[derive(Clone, Default)]
    struct Script {
        log: Arc<Mutex<Vec<String>>>,
        pages: Arc<Mutex<Vec<Value>>>,
    }

    struct ScriptTransport(Script);

    #[async_trait]
    impl McpTransport for ScriptTransport {
        async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
            self.0.log.lock().push(format!("{method} {}", params.unwrap_or_default()));
            match method {
                "initialize" => Ok(json!({"protocolVersion": PROTOCOL_VERSION, "serverInfo": {"name": "s"}})),
                "tools/list" => {
                    let mut pages = self.0.pages.lock();
                    if pages.is_empty() {
                        Ok(json!({"tools": []}))
                    } else {
                        Ok(pages.remove(0))
                    }
                }
                "tools/call" => Ok(json!({"content": [{"type": "text", "text": "ok"}]})),
                other => Err(McpError::Rpc {
                    code: -32601,
                    message: format!("unknown method {other}"),
                }),
            }
        }

        async fn notify(&self, method: &str, _params: Option<Value>) -> Result<(), McpError> {
            self.0.log.lock().push(format!("notify {method}"));
            Ok(())
        }

        async fn close(&self) -> Result<(), McpError> {
            self.0.log.lock().push("close".to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl Connector for Script {
        async fn connect(
            &self,
            _connection: &ServerConnection,
        ) -> Result<Box<dyn McpTransport>, McpError> {
            Ok(Box::new(ScriptTransport(self.clone())))
        }
    }

    fn connection() -> ServerConnection {
        ServerConnection::stdio("scripted", "unused")
    }

    #[tokio::test]
    async fn discover_follows_cursor_and_closes() {
        let script = Script::default();
        script.pages.lock().extend([
            json!({"tools": [{"name": "a", "inputSchema": {}}], "nextCursor": "p2"}),
            json!({"tools": [{"name": "b", "inputSchema": {}}]}),
        ]);

        let tools = discover(&script, &connection()).await.expect("discover");
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        let log = script.log.lock().clone();
        assert!(log[0].starts_with("initialize "));
        assert_eq!(log[1], "notify notifications/initialized");
        assert_eq!(log[2], "tools/list null");
        assert_eq!(log[3], r#"tools/list {"cursor":"p2"}"#);
        assert_eq!(log.last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn repeated_cursor_stops_pagination() {
        let script = Script::default();
        script.pages.lock().extend([
            json!({"tools": [{"name": "a"}], "nextCursor": "same"}),
            json!({"tools": [{"name": "b"}], "nextCursor": "same"}),
            json!({"tools": [{"name": "c"}]}),
        ]);
        let tools = discover(&script, &connection()).await.expect("discover");
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn each_call_opens_its_own_session() {
        let script = Script::default();
        for _ in 0..2 {
            let result = call(&script, &connection(), "t", Map::new())
                .await
                .expect("call");
            assert_eq!(result.joined_text().as_deref(), Some("ok"));
        }
        let log = script.log.lock().clone();
        let opens = log.iter().filter(|l| l.starts_with("initialize")).count();
        let closes = log.iter().filter(|l| *l == "close").count();
        assert_eq!(opens, 2);
        assert_eq!(closes, 2);
        assert!(log.iter().any(|l| l == r#"tools/call {"name":"t","arguments":{}}"#));
    }
}
