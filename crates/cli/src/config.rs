use std::path::{Path, PathBuf};

use agent::{DEFAULT_MAX_TURNS, DuplicatePolicy, RuntimeConfig};
use mcp::ServerConnection;
use proto::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::debug;

const CONFIG_FILE_NAME: &str = "agentrt.toml";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools when they help answer the request.";

/// Top-level CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Model and loop configuration.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool registry behaviour.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Remote tool servers attached at startup.
    #[serde(default)]
    pub mcp_servers: Vec<ServerConnection>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

/// Agent model/loop config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Explicit API base URL for OpenAI-compatible endpoints.
    pub base_url: Option<String>,
    /// API key (env overrides applied at load time; see `Config::load`).
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Maximum model round-trips per request before bailing out.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// Run the tool calls of one turn concurrently.
    #[serde(default)]
    pub parallel_tool_calls: bool,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key: String::new(),
            system_prompt: default_system_prompt(),
            max_turns: default_max_turns(),
            parallel_tool_calls: false,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl AgentConfig {
    /// Returns the base URL when one is set and non-empty.
    pub fn effective_base_url(&self) -> Option<&str> {
        self.base_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    /// Runtime settings derived from this section.
    pub fn runtime_config(&self) -> RuntimeConfig {
        let system_prompt = Some(self.system_prompt.clone()).filter(|p| !p.trim().is_empty());
        RuntimeConfig {
            model: self.model.clone(),
            system_prompt,
            max_turns: self.max_turns,
            parallel_tool_calls: self.parallel_tool_calls,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Registry config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// `replace` (default) or `reject`.
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

impl Config {
    /// Loads configuration from explicit path, fallback locations, and env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = path.map(|p| p.to_path_buf()).or_else(|| {
            // Look in current dir, then home dir
            let cwd = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
            if cwd.exists() {
                return Some(cwd);
            }
            let home = std::env::var("HOME").ok()?;
            let home_config = PathBuf::from(home).join(".agentrt").join("config.toml");
            if home_config.exists() {
                return Some(home_config);
            }
            None
        });
        debug!(path = ?config_path, "Config file resolved");

        let mut config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(&path).map_err(ConfigError::Io)?;
            toml::from_str(&content).map_err(|e| ConfigError::Toml(e.to_string()))?
        } else {
            Config::default()
        };

        // Environment variable overrides (highest priority → lowest)
        if let Ok(key) = std::env::var("AGENTRT_API_KEY") {
            config.agent.api_key = key;
        } else if config.agent.api_key.is_empty()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            config.agent.api_key = key;
        }
        if let Ok(model) = std::env::var("AGENTRT_MODEL") {
            config.agent.model = model;
        }
        if let Ok(url) = std::env::var("AGENTRT_BASE_URL") {
            config.agent.base_url = Some(url);
        }

        config.validate()?;
        debug!(
            model = %config.agent.model,
            base_url = ?config.agent.effective_base_url(),
            mcp_servers = config.mcp_servers.len(),
            "Config loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.model.trim().is_empty() {
            return Err(ConfigError::MissingField("agent.model".to_string()));
        }
        if self.agent.max_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_turns".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.mcp_servers {
            if !seen.insert(server.id.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "mcp_servers.id".to_string(),
                    reason: format!("duplicate server id '{}'", server.id),
                });
            }
        }
        Ok(())
    }
}
