//! Conversation loop: model round-trips and tool execution.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use proto::{LlmError, Message, ProgressEvent, ResultEnvelope, ToolCall, ToolDefinition};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    history::ConversationHistory,
    llm::{ChatRequest, ChatResponse, LlmProvider, TokenUsage},
    tool_registry::ToolRegistry,
};

/// Round-trip bound used when none is configured.
pub const DEFAULT_MAX_TURNS: usize = 25;
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings for one runtime instance.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub model: String,
    /// Sent ahead of the history unless the history already opens with a
    /// system message. Never stored in the history.
    pub system_prompt: Option<String>,
    /// Maximum model round-trips per run.
    pub max_turns: usize,
    /// Runs the tool calls of one turn concurrently.
    pub parallel_tool_calls: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: None,
            max_turns: DEFAULT_MAX_TURNS,
            parallel_tool_calls: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// State of the conversation state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCall>),
    /// Terminal: the last assistant message requested no tools.
    Finished(String),
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Content of the final assistant message.
    pub text: String,
    /// Model round-trips performed.
    pub rounds: usize,
    pub usage: TokenUsage,
}

/// The main agent runtime: drives the model/tool loop
pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmProvider>, tools: Arc<ToolRegistry>, config: RuntimeConfig) -> Self {
        Self { llm, tools, config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Runs a fresh conversation seeded with one user message.
    pub async fn process(&self, user_message: &str) -> Result<RunOutcome, LlmError> {
        let mut history = ConversationHistory::with_user(user_message);
        self.run(&mut history, &CancellationToken::new()).await
    }

    /// Runs the loop until the model answers without tool calls.
    ///
    /// Every message produced is appended to `history`. Cancellation is
    /// checked before each model call and aborts an in-flight one; a started
    /// tool batch always completes so each call gets its result message.
    pub async fn run(
        &self,
        history: &mut ConversationHistory,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, LlmError> {
        self.drive(history, cancel, None).await
    }

    /// Same as [`run()`](Self::run) but emits [`ProgressEvent`]s on the
    /// provided channel so a consumer can display live status.
    pub async fn run_with_progress(
        &self,
        history: &mut ConversationHistory,
        cancel: &CancellationToken,
        progress_tx: mpsc::Sender<ProgressEvent>,
    ) -> Result<RunOutcome, LlmError> {
        self.drive(history, cancel, Some(&progress_tx)).await
    }

    async fn drive(
        &self,
        history: &mut ConversationHistory,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Result<RunOutcome, LlmError> {
        let functions = self.tools.definitions();
        let mut state = LoopState::AwaitingModel;
        let mut round = 0;
        let mut total_usage = TokenUsage::default();

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if cancel.is_cancelled() {
                        info!(round = %round, "Conversation cancelled");
                        return Err(LlmError::Cancelled);
                    }
                    if round >= self.config.max_turns {
                        warn!("Max turns ({}) reached", self.config.max_turns);
                        return Err(LlmError::MaxTurnsExceeded(self.config.max_turns));
                    }

                    emit(progress, ProgressEvent::LlmThinking { round });
                    let req = self.build_request(history, &functions);
                    debug!(round = %round, messages = %req.messages.len(), "LLM call");

                    let t0 = Instant::now();
                    let response = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(round = %round, "Conversation cancelled during LLM call");
                            return Err(LlmError::Cancelled);
                        }
                        response = self.llm.chat(req) => response?,
                    };
                    debug!(elapsed_ms = %t0.elapsed().as_millis(), round = %round, "LLM response received");

                    round += 1;
                    total_usage.add(&response.usage);
                    record_response(history, response)
                }
                LoopState::ExecutingTools(calls) => {
                    debug!(
                        "Tool calls requested: {:?}",
                        calls.iter().map(|tc| &tc.name).collect::<Vec<_>>()
                    );
                    let envelopes = self.execute_tools(&calls, progress).await;
                    for (call, envelope) in calls.iter().zip(envelopes) {
                        emit(
                            progress,
                            ProgressEvent::ToolCallFinished {
                                call_id: call.id.clone(),
                                tool_name: call.name.clone(),
                                success: envelope.success,
                            },
                        );
                        history.push(Message::tool_result(
                            &call.id,
                            &call.name,
                            envelope.to_message_content(),
                        ));
                    }
                    LoopState::AwaitingModel
                }
                LoopState::Finished(text) => {
                    info!(
                        rounds = round,
                        prompt_tokens = total_usage.prompt_tokens,
                        completion_tokens = total_usage.completion_tokens,
                        "Agent final response: {text:.50}"
                    );
                    return Ok(RunOutcome {
                        text,
                        rounds: round,
                        usage: total_usage,
                    });
                }
            };
        }
    }

    fn build_request(
        &self,
        history: &ConversationHistory,
        functions: &[ToolDefinition],
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(prompt) = &self.config.system_prompt
            && !history.has_system_prompt()
        {
            messages.push(Message::system(prompt.clone()));
        }
        messages.extend_from_slice(history.messages());

        ChatRequest {
            messages,
            tools: functions.to_vec(),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Dispatches every call of one turn. Envelopes come back in request
    /// order whether or not the calls ran concurrently.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        progress: Option<&mpsc::Sender<ProgressEvent>>,
    ) -> Vec<ResultEnvelope> {
        for call in calls {
            emit(
                progress,
                ProgressEvent::ToolCallStarted {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    args: call.arguments.clone(),
                },
            );
        }

        if self.config.parallel_tool_calls {
            join_all(
                calls
                    .iter()
                    .map(|call| self.tools.dispatch(&call.name, call.arguments.clone())),
            )
            .await
        } else {
            let mut envelopes = Vec::with_capacity(calls.len());
            for call in calls {
                envelopes.push(self.tools.dispatch(&call.name, call.arguments.clone()).await);
            }
            envelopes
        }
    }
}

/// Appends the assistant turn and picks the next state.
fn record_response(history: &mut ConversationHistory, response: ChatResponse) -> LoopState {
    let next = if response.tool_calls.is_empty() {
        LoopState::Finished(response.content.clone())
    } else {
        LoopState::ExecutingTools(response.tool_calls.clone())
    };
    history.push(response.into_message());
    next
}

fn emit(progress: Option<&mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = progress {
        let _ = tx.try_send(event);
    }
}
