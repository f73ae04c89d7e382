//! Materializes remote MCP tools as [`ToolContract`]s.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use proto::McpError;
use serde_json::{Map, Value};
use tools::{ParamType, ParameterSpec, ToolCategory, ToolContract, ToolFault, ToolHandler};
use tracing::{debug, warn};

use crate::session;
use crate::transport::Connector;
use crate::types::{CallToolResult, McpTool, ServerConnection};

/// Fault kind for a result the server flagged with `isError`.
pub const REMOTE_ERROR_KIND: &str = "RemoteToolError";
/// Fault kind for a session that could not be opened or completed.
pub const TRANSPORT_FAULT_KIND: &str = "TransportFault";

/// Translates a JSON-Schema `inputSchema` into parameter specs.
///
/// Malformed or empty descriptors yield an empty map. `type` arrays resolve
/// to their first non-null member; unknown or missing types read as string.
pub fn input_schema_to_parameters(schema: &Value) -> IndexMap<String, ParameterSpec> {
    let mut parameters = IndexMap::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return parameters;
    };
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for (name, prop) in properties {
        let Some(prop) = prop.as_object() else {
            continue;
        };
        let mut spec = ParameterSpec::new(name.clone(), property_type(prop.get("type")));
        spec.required = required.contains(&name.as_str());
        spec.description = prop
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        spec.default = prop.get("default").cloned();
        spec.enum_values = prop.get("enum").and_then(Value::as_array).cloned();
        spec.minimum = prop.get("minimum").and_then(Value::as_f64);
        spec.maximum = prop.get("maximum").and_then(Value::as_f64);
        spec.pattern = prop.get("pattern").and_then(Value::as_str).map(str::to_string);
        parameters.insert(name.clone(), spec);
    }
    parameters
}

fn property_type(declared: Option<&Value>) -> ParamType {
    let name = match declared {
        Some(Value::String(name)) => Some(name.as_str()),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null"),
        _ => None,
    };
    name.and_then(ParamType::from_schema_name)
        .unwrap_or(ParamType::String)
}

/// Converts a `tools/call` reply into a tool result.
///
/// Structured content wins over text; text blocks are joined with newlines;
/// a reply with neither is `null`. An `isError` reply becomes a fault.
pub fn normalize_result(result: CallToolResult) -> Result<Value, ToolFault> {
    if result.is_error {
        let detail = result
            .joined_text()
            .or_else(|| result.structured_content.as_ref().map(Value::to_string))
            .unwrap_or_else(|| "remote tool reported an error".to_string());
        return Err(ToolFault::new(REMOTE_ERROR_KIND, detail));
    }
    if let Some(structured) = result.structured_content {
        return Ok(structured);
    }
    Ok(result.joined_text().map_or(Value::Null, Value::String))
}

/// Entrypoint of a remote tool: each call runs in its own session.
pub struct RemoteToolHandler {
    connector: Arc<dyn Connector>,
    connection: Arc<ServerConnection>,
    remote_name: String,
}

impl RemoteToolHandler {
    pub fn new(
        connector: Arc<dyn Connector>,
        connection: Arc<ServerConnection>,
        remote_name: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            connection,
            remote_name: remote_name.into(),
        }
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }
}

#[async_trait]
impl ToolHandler for RemoteToolHandler {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFault> {
        match session::call(
            self.connector.as_ref(),
            &self.connection,
            &self.remote_name,
            args,
        )
        .await
        {
            Ok(result) => normalize_result(result),
            Err(e) => {
                warn!(
                    server = %self.connection.id,
                    tool = %self.remote_name,
                    error = %e,
                    "MCP call failed"
                );
                Err(ToolFault::new(TRANSPORT_FAULT_KIND, e.to_string()))
            }
        }
    }
}

/// Registry name of a remote tool under an optional prefix.
pub fn scoped_name(prefix: Option<&str>, name: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}_{name}"),
        _ => name.to_string(),
    }
}

/// Builds the contract for one advertised tool. Nameless tools are skipped.
pub fn remote_contract(
    tool: &McpTool,
    connector: Arc<dyn Connector>,
    connection: Arc<ServerConnection>,
    prefix: Option<&str>,
) -> Option<ToolContract> {
    if tool.name.is_empty() {
        warn!(server = %connection.id, "Skipping MCP tool without a name");
        return None;
    }
    let description = tool
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("MCP tool: {}", tool.name));
    let handler = RemoteToolHandler::new(connector, connection, tool.name.clone());

    let mut builder = ToolContract::builder(scoped_name(prefix, &tool.name), handler)
        .description(description)
        .category(ToolCategory::Custom);
    for spec in input_schema_to_parameters(&tool.input_schema).into_values() {
        builder = builder.param(spec);
    }
    Some(builder.build())
}

/// Discovers a server's tools and wraps each as a contract.
///
/// `prefix` overrides the connection's own prefix when given.
pub async fn discover_contracts(
    connector: Arc<dyn Connector>,
    connection: ServerConnection,
    prefix: Option<&str>,
) -> Result<Vec<ToolContract>, McpError> {
    let listed = session::discover(connector.as_ref(), &connection).await?;
    let prefix = prefix
        .map(str::to_string)
        .or_else(|| connection.prefix.clone());
    let connection = Arc::new(connection);

    let contracts: Vec<ToolContract> = listed
        .iter()
        .filter_map(|tool| {
            remote_contract(
                tool,
                Arc::clone(&connector),
                Arc::clone(&connection),
                prefix.as_deref(),
            )
        })
        .collect();
    debug!(server = %connection.id, count = contracts.len(), "Built MCP tool contracts");
    Ok(contracts)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::ContentBlock;

    #[test]
    fn required_string_property() {
        let params = input_schema_to_parameters(&json!({
            "properties": {"q": {"type": "string"}},
            "required": ["q"]
        }));
        let q = &params["q"];
        assert!(q.required);
        assert_eq!(q.param_type, ParamType::String);
    }

    #[test]
    fn constraints_pass_through() {
        let params = input_schema_to_parameters(&json!({
            "type": "object",
            "properties": {
                "n": {"type": "integer", "minimum": 1, "maximum": 10, "default": 3, "description": "count"},
                "mode": {"type": ["null", "string"], "enum": ["fast", "slow"]},
                "id": {"type": "string", "pattern": "^[a-z]+$"},
                "free": {}
            }
        }));
        let names: Vec<&str> = params.keys().map(String::as_str).collect();
        assert_eq!(names, ["n", "mode", "id", "free"]);

        let n = &params["n"];
        assert_eq!(n.param_type, ParamType::Integer);
        assert!(!n.required);
        assert_eq!((n.minimum, n.maximum), (Some(1.0), Some(10.0)));
        assert_eq!(n.default, Some(json!(3)));
        assert_eq!(n.description, "count");

        assert_eq!(params["mode"].param_type, ParamType::String);
        assert_eq!(params["mode"].enum_values, Some(vec![json!("fast"), json!("slow")]));
        assert_eq!(params["id"].pattern.as_deref(), Some("^[a-z]+$"));
        assert_eq!(params["free"].param_type, ParamType::String);
    }

    #[test]
    fn malformed_descriptors_are_empty() {
        assert!(input_schema_to_parameters(&Value::Null).is_empty());
        assert!(input_schema_to_parameters(&json!({"type": "object"})).is_empty());
        assert!(input_schema_to_parameters(&json!({"properties": []})).is_empty());
        let params = input_schema_to_parameters(&json!({"properties": {"x": 5}}));
        assert!(params.is_empty());
    }

    #[test]
    fn structured_content_wins() {
        let result = CallToolResult {
            is_error: false,
            structured_content: Some(json!({"sum": 3})),
            content: vec![ContentBlock::text("3")],
        };
        assert_eq!(normalize_result(result), Ok(json!({"sum": 3})));
    }

    #[test]
    fn text_blocks_are_joined() {
        let result = CallToolResult {
            content: vec![ContentBlock::text("a"), ContentBlock::text("b")],
            ..CallToolResult::default()
        };
        assert_eq!(normalize_result(result), Ok(json!("a\nb")));
        assert_eq!(normalize_result(CallToolResult::default()), Ok(Value::Null));
    }

    #[test]
    fn error_flag_becomes_fault() {
        let result = CallToolResult {
            is_error: true,
            content: vec![ContentBlock::text("bad input")],
            ..CallToolResult::default()
        };
        let fault = normalize_result(result).expect_err("fault");
        assert_eq!(fault.kind, REMOTE_ERROR_KIND);
        assert_eq!(fault.message, "bad input");
    }

    #[test]
    fn names_and_descriptions() {
        assert_eq!(scoped_name(Some("fs"), "read"), "fs_read");
        assert_eq!(scoped_name(Some(""), "read"), "read");
        assert_eq!(scoped_name(None, "read"), "read");

        let connector: Arc<dyn Connector> = Arc::new(crate::transport::DefaultConnector);
        let connection = Arc::new(ServerConnection::stdio("fs", "unused"));
        let tool = McpTool {
            name: "read".to_string(),
            description: None,
            input_schema: json!({"properties": {"path": {"type": "string"}}, "required": ["path"]}),
        };
        let contract = remote_contract(&tool, Arc::clone(&connector), Arc::clone(&connection), Some("fs"))
            .expect("contract");
        assert_eq!(contract.name(), "fs_read");
        assert_eq!(contract.description(), "MCP tool: read");
        assert_eq!(contract.category_tag(), "custom");
        assert!(contract.parameters()["path"].required);

        let nameless = McpTool::default();
        assert!(remote_contract(&nameless, connector, connection, None).is_none());
    }
}
