//! Shared protocol types for the tool layer, remote adapters, and the
//! conversation runtime.
//!
//! This crate defines serializable message/tool/envelope structures and
//! strongly-typed error enums shared across the workspace.

pub mod envelope;
pub mod error;
pub mod event;
pub mod message;
pub mod tool;

/// Re-export of uniform tool result envelope types.
pub use envelope::{
    EnvelopeErrorKind, EnvelopeMetadata, EnvelopeStatus, FaultInfo, ResultEnvelope,
    ValidationErrors,
};
/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of runtime progress events.
pub use event::ProgressEvent;
/// Re-export of conversation message types.
pub use message::{Message, Role};
/// Re-export of tool call request and wire definition types.
pub use tool::{ToolCall, ToolDefinition};
