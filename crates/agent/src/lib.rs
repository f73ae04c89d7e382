//! Tool registry, model transport, and the conversation loop.

pub mod history;
pub mod llm;
pub mod runtime;
pub mod tool_registry;

/// Append-only conversation history.
pub use history::ConversationHistory;
/// Chat request/response models and provider interfaces.
pub use llm::{ChatRequest, ChatResponse, LlmProvider, OpenAiProvider, TokenUsage};
/// Main runtime orchestration loop.
pub use runtime::{AgentRuntime, DEFAULT_MAX_TURNS, LoopState, RunOutcome, RuntimeConfig};
/// Runtime tool registry.
pub use tool_registry::{DuplicatePolicy, Registration, RegistryExport, ToolRegistry};
