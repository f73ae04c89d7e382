/// Real-time progress events emitted while a conversation runs.
///
/// These events are sent via `tokio::sync::mpsc` from the conversation
/// runtime so that consumers (e.g. a CLI) can display live tool-call status
/// while the loop runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The model is being consulted (round N of the loop).
    LlmThinking { round: usize },
    /// A tool call has been dispatched but has not yet completed.
    ToolCallStarted {
        call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    /// A tool call has finished executing.
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        success: bool,
    },
}
