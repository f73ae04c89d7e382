//! JSON-RPC framing and MCP payload types.

use std::path::PathBuf;

use indexmap::IndexMap;
use proto::McpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no reply expected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Numeric request id this response answers, if any.
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Turns an error object into [`McpError::Rpc`]; a missing result reads
    /// as `null`.
    pub fn into_result(self) -> Result<Value, McpError> {
        match self.error {
            Some(error) => Err(McpError::Rpc {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }

    /// Parses one inbound frame. Returns `None` for server-initiated
    /// requests and notifications, which carry a `method`.
    pub fn from_frame(frame: &str) -> Result<Option<Self>, McpError> {
        let value: Value = serde_json::from_str(frame)?;
        if value.get("method").is_some() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A tool advertised by a remote server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpTool {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One page of `tools/list`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(rename = "nextCursor", default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One content block of a tool result. Only text blocks carry `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// Reply of `tools/call`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl CallToolResult {
    /// Text of all text blocks joined with newlines; `None` when there is
    /// no text at all.
    pub fn joined_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }
}

/// How to reach a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and speak newline-delimited JSON over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: IndexMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
    },
    /// POST each message to a streamable HTTP endpoint.
    Http {
        url: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
    },
}

/// A remote server the registry can attach.
///
/// Nothing is kept open between operations: every discovery or call opens
/// its own session from this description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConnection {
    pub id: String,
    /// Registration prefix; tools register as `{prefix}_{name}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Per-request deadline; absent means none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ServerConnection {
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            TransportConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: IndexMap::new(),
                cwd: None,
            },
        )
    }

    pub fn http(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            id,
            TransportConfig::Http {
                url: url.into(),
                headers: IndexMap::new(),
            },
        )
    }

    fn with_transport(id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            prefix: None,
            transport,
            timeout_secs: None,
        }
    }

    /// Appends a process argument. No-op for HTTP connections.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { args, .. } = &mut self.transport {
            args.push(arg.into());
        }
        self
    }

    /// Sets a child environment variable. No-op for HTTP connections.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        if let TransportConfig::Stdio { cwd, .. } = &mut self.transport {
            *cwd = Some(dir.into());
        }
        self
    }

    /// Adds a request header. No-op for stdio connections.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Http { headers, .. } = &mut self.transport {
            headers.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn kind(&self) -> &'static str {
        match self.transport {
            TransportConfig::Stdio { .. } => "stdio",
            TransportConfig::Http { .. } => "http",
        }
    }
}
