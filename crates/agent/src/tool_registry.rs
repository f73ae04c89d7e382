//! Tool registry used by the runtime to list and dispatch tools.

use std::sync::Arc;

use indexmap::IndexMap;
use mcp::{Connector, DefaultConnector, ServerConnection};
use proto::{ResultEnvelope, ToolDefinition, ToolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tools::ToolContract;
use tracing::{debug, info, warn};

/// What to do when a name is registered twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Last write wins; the replacement is logged.
    #[default]
    Replace,
    /// Registration fails with [`ToolError::DuplicateName`].
    Reject,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    /// An earlier contract under the same name was replaced in place.
    Replaced,
}

/// Everything a model round-trip needs, in registration order.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryExport {
    /// Full schema per tool.
    pub tools: IndexMap<String, Value>,
    /// Category tag to tool names.
    pub categories: IndexMap<String, Vec<String>>,
    /// Wire functions for the model.
    pub functions: Vec<ToolDefinition>,
}

/// Registry of available tools
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Arc<ToolContract>>,
    categories: IndexMap<String, Vec<String>>,
    servers: IndexMap<String, Vec<String>>,
    policy: DuplicatePolicy,
}

impl ToolRegistry {
    /// Creates an empty registry that replaces duplicates.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Register a tool
    ///
    /// A replacement keeps the original registration position and moves the
    /// name to the new contract's category bucket.
    pub fn register(&mut self, contract: ToolContract) -> Result<Registration, ToolError> {
        let name = contract.name().to_string();
        let category = contract.category_tag();

        let existing = self.tools.get(&name).map(|previous| previous.category_tag());
        let outcome = match existing {
            Some(_) if self.policy == DuplicatePolicy::Reject => {
                return Err(ToolError::DuplicateName(name));
            }
            Some(old_category) => {
                warn!(tool = %name, "Replacing previously registered tool");
                if old_category != category {
                    self.remove_from_category(old_category, &name);
                }
                Registration::Replaced
            }
            None => {
                debug!(tool = %name, category = %category, "Registering tool");
                Registration::Added
            }
        };

        let bucket = self.categories.entry(category.to_string()).or_default();
        if !bucket.contains(&name) {
            bucket.push(name.clone());
        }
        self.tools.insert(name, Arc::new(contract));
        Ok(outcome)
    }

    /// Registers every contract, stopping at the first rejection.
    pub fn register_all(
        &mut self,
        contracts: impl IntoIterator<Item = ToolContract>,
    ) -> Result<Vec<Registration>, ToolError> {
        contracts
            .into_iter()
            .map(|contract| self.register(contract))
            .collect()
    }

    fn remove_from_category(&mut self, category: &str, name: &str) {
        if let Some(bucket) = self.categories.get_mut(category) {
            bucket.retain(|n| n != name);
            if bucket.is_empty() {
                self.categories.shift_remove(category);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolContract>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invokes a tool by name. Never fails: an unknown name yields a
    /// not-found envelope.
    pub async fn dispatch(&self, name: &str, args: Value) -> ResultEnvelope {
        match self.tools.get(name) {
            Some(tool) => {
                debug!(tool = %name, "Dispatching tool call");
                tool.invoke_value(args).await
            }
            None => {
                warn!(tool = %name, "Dispatch to unknown tool");
                ResultEnvelope::not_found(name)
            }
        }
    }

    /// Get tool definitions for the LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_wire_function()).collect()
    }

    /// Returns the list of registered tool names.
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn categories(&self) -> &IndexMap<String, Vec<String>> {
        &self.categories
    }

    /// Full schema of every tool, keyed by name.
    pub fn schemas(&self) -> IndexMap<String, Value> {
        self.tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.schema()))
            .collect()
    }

    pub fn export_all(&self) -> RegistryExport {
        RegistryExport {
            tools: self.schemas(),
            categories: self.categories.clone(),
            functions: self.definitions(),
        }
    }

    /// Discovers a remote server's tools and registers each one.
    ///
    /// Returns the registered names. `prefix` overrides the connection's own
    /// prefix.
    pub async fn attach_mcp_server(
        &mut self,
        connection: ServerConnection,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, proto::Error> {
        self.attach_mcp_server_with(Arc::new(DefaultConnector), connection, prefix)
            .await
    }

    /// Same as [`attach_mcp_server`](Self::attach_mcp_server) with a custom
    /// transport connector.
    pub async fn attach_mcp_server_with(
        &mut self,
        connector: Arc<dyn Connector>,
        connection: ServerConnection,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, proto::Error> {
        let server_id = connection.id.clone();
        let contracts = mcp::discover_contracts(connector, connection, prefix).await?;
        let names: Vec<String> = contracts.iter().map(|c| c.name().to_string()).collect();
        self.register_all(contracts)?;
        info!(server = %server_id, tools = names.len(), "Attached MCP server");
        self.servers.insert(server_id, names.clone());
        Ok(names)
    }

    /// Ids of attached remote servers with the tool names each contributed.
    pub fn attached_servers(&self) -> &IndexMap<String, Vec<String>> {
        &self.servers
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tools::{ParamType, ParameterSpec, ToolCategory, handler_fn};

    use super::*;

    fn echo(name: &str) -> ToolContract {
        ToolContract::builder(
            name,
            handler_fn(|args: serde_json::Map<String, Value>| async move {
                Ok(args.get("value").cloned().unwrap_or(Value::Null))
            }),
        )
        .description("Echoes the input")
        .param(ParameterSpec::new("value", ParamType::String))
        .build()
    }

    #[tokio::test]
    async fn register_and_dispatch_known_tool() {
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.register(echo("echo")).expect("register"), Registration::Added);

        let env = registry.dispatch("echo", json!({"value": "hello"})).await;
        assert!(env.success);
        assert_eq!(env.result, Some(json!("hello")));
        assert_eq!(env.metadata.expect("metadata").tool, "echo");
    }

    #[tokio::test]
    async fn dispatch_unknown_tool_returns_not_found() {
        let registry = ToolRegistry::new();
        let env = registry.dispatch("missing", json!({})).await;
        assert!(!env.success);
        assert_eq!(env.error_kind, Some(proto::EnvelopeErrorKind::NotFound));
        assert!(env.error.expect("error").contains("not found"));
    }

    #[test]
    fn uncategorized_tools_share_utility_bucket_once() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("a")).expect("a");
        registry.register(echo("b")).expect("b");
        registry.register(echo("a")).expect("a again");

        assert_eq!(registry.categories()["utility"], vec!["a", "b"]);
        assert_eq!(registry.tool_names(), vec!["a", "b"]);
    }

    #[test]
    fn replacement_keeps_position_and_moves_category() {
        let mut registry = ToolRegistry::new();
        registry.register(echo("a")).expect("a");
        registry.register(echo("b")).expect("b");

        let searcher = ToolContract::builder("a", handler_fn(|_| async { Ok(Value::Null) }))
            .category(ToolCategory::Search)
            .build();
        assert_eq!(registry.register(searcher).expect("replace"), Registration::Replaced);

        assert_eq!(registry.tool_names(), vec!["a", "b"]);
        assert_eq!(registry.categories()["utility"], vec!["b"]);
        assert_eq!(registry.categories()["search"], vec!["a"]);
        assert_eq!(registry.get("a").map(|t| t.category_tag()), Some("search"));
    }

    #[test]
    fn reject_policy_refuses_duplicates() {
        let mut registry = ToolRegistry::with_policy(DuplicatePolicy::Reject);
        registry.register(echo("a")).expect("a");
        let err = registry.register(echo("a")).expect_err("duplicate");
        assert!(matches!(err, ToolError::DuplicateName(ref n) if n == "a"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn export_all_is_in_registration_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register_all([echo("zeta"), echo("alpha")])
            .expect("register");

        let export = registry.export_all();
        let names: Vec<&str> = export.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["zeta", "alpha"]);
        assert_eq!(export.tools.keys().collect::<Vec<_>>(), ["zeta", "alpha"]);
        assert_eq!(export.tools["zeta"]["function"]["parameters"]["required"][0], "value");
        assert_eq!(export.categories["utility"], vec!["zeta", "alpha"]);

        let defs = registry.definitions();
        assert_eq!(defs[1].description, "Echoes the input");
    }
}
