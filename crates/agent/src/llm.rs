//! LLM provider abstraction and OpenAI-compatible implementation.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall,
        FunctionObjectArgs,
    },
};
use async_trait::async_trait;
use proto::{LlmError, Message, Role, ToolCall, ToolDefinition};
use serde_json::{Map, Value};
use tracing::debug;

/// Key holding tool arguments the model sent as non-JSON text.
pub const RAW_ARGUMENTS_KEY: &str = "raw_arguments";

/// Request to the LLM
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Full ordered history, system prompt first when present.
    pub messages: Vec<Message>,
    /// Wire functions the model may call.
    pub tools: Vec<ToolDefinition>,
    /// Target model id.
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Token usage reported by the LLM for a single call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Number of tokens in the prompt / input.
    pub prompt_tokens: u32,
    /// Number of tokens in the generated output.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Accumulates another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

/// One assistant turn: text, optional tool-call requests, and usage.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    /// Requested tool calls in the order the model issued them.
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// A final answer with no tool calls.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// A turn requesting tools.
    pub fn tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Converts the turn into the assistant message appended to history.
    pub fn into_message(self) -> Message {
        if self.tool_calls.is_empty() {
            Message::assistant(self.content)
        } else {
            Message::assistant_tool_calls(self.content, self.tool_calls)
        }
    }
}

/// LLM provider trait
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends the history plus tool specs and returns the assistant turn.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// OpenAI-compatible provider (works with OpenAI, together.ai, Ollama, etc.)
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAiProvider {
    /// Creates an OpenAI provider using the default API base URL.
    pub fn new(api_key: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
        }
    }

    /// Creates an OpenAI provider with a custom API base URL.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, LlmError> {
        let messages: Vec<ChatCompletionRequestMessage> = req
            .messages
            .iter()
            .map(convert_message)
            .collect::<Result<_, _>>()?;

        let tools: Vec<ChatCompletionTool> = req
            .tools
            .iter()
            .map(convert_tool)
            .collect::<Result<_, _>>()?;

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&req.model).messages(messages);
        if !tools.is_empty() {
            builder.tools(tools);
        }
        if let Some(temperature) = req.temperature {
            builder.temperature(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            builder.max_completion_tokens(max_tokens);
        }

        let request = builder
            .build()
            .map_err(|e| LlmError::Serialization(e.to_string()))?;

        debug!(
            model = %req.model,
            messages = %req.messages.len(),
            tools = %req.tools.len(),
            "Sending request to OpenAI"
        );

        let response = self.client.chat().create(request).await.map_err(|e| {
            let msg = e.to_string();
            debug!(error = %msg, "OpenAI API error");
            if msg.contains("429") || msg.to_lowercase().contains("rate limit") {
                LlmError::RateLimit
            } else {
                LlmError::Api(msg)
            }
        })?;

        let usage = TokenUsage {
            prompt_tokens: response.usage.as_ref().map_or(0, |u| u.prompt_tokens),
            completion_tokens: response.usage.as_ref().map_or(0, |u| u.completion_tokens),
        };
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                ToolCall::with_id(
                    tc.id,
                    tc.function.name,
                    parse_tool_arguments(&tc.function.arguments),
                )
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage,
        })
    }
}

/// Converts a history message into OpenAI request format.
fn convert_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let ser = |e: async_openai::error::OpenAIError| LlmError::Serialization(e.to_string());
    match m.role {
        Role::System => Ok(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(ser)?,
        )),
        Role::User => Ok(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(ser)?,
        )),
        Role::Assistant => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            builder.content(m.content.clone());

            if !m.tool_calls.is_empty() {
                let calls: Vec<ChatCompletionMessageToolCall> = m
                    .tool_calls
                    .iter()
                    .map(|tc| ChatCompletionMessageToolCall {
                        id: tc.id.clone(),
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect();
                builder.tool_calls(calls);
            }

            Ok(ChatCompletionRequestMessage::Assistant(
                builder.build().map_err(ser)?,
            ))
        }
        Role::Tool => {
            let call_id = m
                .tool_call_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            Ok(ChatCompletionRequestMessage::Tool(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call_id)
                    .content(m.content.clone())
                    .build()
                    .map_err(ser)?,
            ))
        }
    }
}

/// Converts a wire function into an OpenAI function-tool declaration.
fn convert_tool(t: &ToolDefinition) -> Result<ChatCompletionTool, LlmError> {
    Ok(ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObjectArgs::default()
            .name(t.name.clone())
            .description(t.description.clone())
            .parameters(t.parameters.clone())
            .build()
            .map_err(|e| LlmError::Serialization(e.to_string()))?,
    })
}

/// Parses tool-call argument JSON.
///
/// Empty text is an empty object. Text that is not JSON is kept under
/// `raw_arguments` so validation reports it back to the model.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| {
        let mut raw = Map::new();
        raw.insert(RAW_ARGUMENTS_KEY.to_string(), Value::from(arguments));
        Value::Object(raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_message_supports_all_roles() {
        let system = convert_message(&Message::system("sys")).expect("system");
        assert!(matches!(system, ChatCompletionRequestMessage::System(_)));

        let user = convert_message(&Message::user("hello")).expect("user");
        assert!(matches!(user, ChatCompletionRequestMessage::User(_)));

        let assistant = convert_message(&Message::assistant("done")).expect("assistant");
        assert!(matches!(
            assistant,
            ChatCompletionRequestMessage::Assistant(_)
        ));

        let tool = convert_message(&Message::tool_result("id", "echo", "ok")).expect("tool");
        assert!(matches!(tool, ChatCompletionRequestMessage::Tool(_)));
    }

    #[test]
    fn convert_message_assistant_with_tool_calls_includes_calls() {
        let assistant = Message::assistant_tool_calls(
            "",
            vec![ToolCall::with_id(
                "tc1",
                "search",
                serde_json::json!({"q": "rust"}),
            )],
        );

        let converted = convert_message(&assistant).expect("assistant with tool calls");
        let ChatCompletionRequestMessage::Assistant(msg) = converted else {
            panic!("expected assistant message");
        };
        let calls = msg.tool_calls.expect("tool calls");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "tc1");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, r#"{"q":"rust"}"#);
    }

    #[test]
    fn convert_message_tool_without_call_id_uses_unknown() {
        let mut msg = Message::tool_result("x", "echo", "result");
        msg.tool_call_id = None;
        let converted = convert_message(&msg).expect("tool without call_id");
        let ChatCompletionRequestMessage::Tool(tool) = converted else {
            panic!("expected tool message");
        };
        assert_eq!(tool.tool_call_id, "unknown");
    }

    #[test]
    fn convert_tool_builds_function_tool_schema() {
        let def = ToolDefinition::new(
            "search",
            "Search the web",
            serde_json::json!({"type": "object", "properties": {}, "required": []}),
        );
        let converted = convert_tool(&def).expect("tool conversion");
        assert_eq!(converted.r#type, ChatCompletionToolType::Function);
        assert_eq!(converted.function.name, "search");
        assert_eq!(
            converted.function.description.as_deref(),
            Some("Search the web")
        );
    }

    #[test]
    fn parse_tool_arguments_handles_valid_empty_and_invalid_json() {
        let valid = parse_tool_arguments(r#"{"x":1}"#);
        assert_eq!(valid["x"], 1);

        let empty = parse_tool_arguments("  ");
        assert_eq!(empty, serde_json::json!({}));

        let invalid = parse_tool_arguments("{invalid");
        assert_eq!(invalid[RAW_ARGUMENTS_KEY], "{invalid");
    }

    #[test]
    fn provider_builders_construct_provider_instances() {
        let _provider = OpenAiProvider::new("k");
        let _provider = OpenAiProvider::with_base_url("k", "https://example.com/v1");
    }

    #[test]
    fn token_usage_add_accumulates_values() {
        let mut total = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 20,
        };
        total.add(&TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 15,
        });
        assert_eq!(total.prompt_tokens, 15);
        assert_eq!(total.completion_tokens, 35);

        total.add(&TokenUsage::default());
        assert_eq!(total.prompt_tokens, 15);
    }

    #[test]
    fn response_becomes_history_message() {
        let text = ChatResponse::text("hi").into_message();
        assert_eq!(text.role, Role::Assistant);
        assert!(!text.has_tool_calls());

        let calls = ChatResponse::tool_calls(vec![ToolCall::new("t", serde_json::json!({}))])
            .into_message();
        assert!(calls.has_tool_calls());
        assert_eq!(calls.content, "");
    }
}
