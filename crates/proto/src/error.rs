use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// LLM provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Tool registration error.
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Remote tool server error.
    #[error("MCP error: {0}")]
    Mcp(#[from] McpError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// LLM provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider throttled the request.
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Conversation exceeded the configured number of model round-trips.
    #[error("Max turns exceeded ({0})")]
    MaxTurnsExceeded(usize),

    /// Conversation was cancelled by the caller.
    #[error("Conversation cancelled")]
    Cancelled,

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Tool registration errors
#[derive(Debug, Error)]
pub enum ToolError {
    /// Requested tool is unknown.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// A tool with this name is already registered and the policy rejects duplicates.
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    /// Tool declaration is invalid.
    #[error("Invalid tool definition: {0}")]
    InvalidDefinition(String),
}

/// Remote tool server (MCP) errors
#[derive(Debug, Error)]
pub enum McpError {
    /// Server process could not be started.
    #[error("Failed to spawn server: {0}")]
    Spawn(String),

    /// Network/connection-level failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Server answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Server sent something that does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request did not complete within the configured deadline.
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Transport was closed before the reply arrived.
    #[error("Transport closed")]
    Closed,

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for McpError {
    fn from(e: serde_json::Error) -> Self {
        McpError::Serialization(e.to_string())
    }
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_config_error_variant() {
        let err = ConfigError::MissingField("agent.model".to_string());
        assert!(err.to_string().contains("Missing required field"));
    }

    #[test]
    fn wraps_llm_error_into_top_level_error() {
        let err: Error = LlmError::MaxTurnsExceeded(25).into();
        assert!(err.to_string().contains("Max turns exceeded (25)"));
    }

    #[test]
    fn wraps_tool_and_mcp_errors() {
        let tool_err: Error = ToolError::DuplicateName("echo".to_string()).into();
        assert!(tool_err.to_string().contains("Tool error"));
        assert!(tool_err.to_string().contains("echo"));

        let mcp_err: Error = McpError::Rpc {
            code: -32601,
            message: "Method not found".to_string(),
        }
        .into();
        assert!(mcp_err.to_string().contains("MCP error"));
        assert!(mcp_err.to_string().contains("-32601"));
    }

    #[test]
    fn converts_serde_json_error_into_mcp_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: McpError = parse.into();
        assert!(matches!(err, McpError::Serialization(_)));
    }

    #[test]
    fn wraps_proto_error() {
        let proto_err: Error = ProtoError::InvalidRole("owner".to_string()).into();
        assert!(proto_err.to_string().contains("Proto error"));
    }
}
