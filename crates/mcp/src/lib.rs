//! MCP client side: JSON-RPC transports, per-operation sessions and the
//! adapter that turns remote tools into [`tools::ToolContract`]s.

pub mod adapter;
pub mod session;
pub mod transport;
pub mod types;

pub use adapter::{
    RemoteToolHandler, discover_contracts, input_schema_to_parameters, normalize_result,
    remote_contract, scoped_name,
};
pub use proto::McpError;
pub use session::{McpSession, call, discover};
pub use transport::{Connector, DefaultConnector, HttpTransport, McpTransport, StdioTransport};
pub use types::{
    CallToolResult, ContentBlock, McpTool, PROTOCOL_VERSION, ServerConnection, TransportConfig,
};
