//! Tool contracts: parameter schemas, signature/doc discovery, validation
//! and the invocation envelope.
//!
//! The agent runtime registers [`ToolContract`]s and dispatches model tool
//! calls through them; remote tools from MCP servers are wrapped the same
//! way.

pub mod contract;
pub mod docstring;
pub mod schema;

pub use contract::{
    FnHandler, RuntimeState, ToolBuilder, ToolCategory, ToolContract, ToolFault, ToolHandler,
    ToolMetadata, ToolPermission, handler_fn,
};
pub use docstring::{DocInfo, ParamDoc, Signature, SignatureParam, derive_parameters, parse_docstring};
pub use schema::{ParamType, ParameterSpec, SchemaType, object_schema};
