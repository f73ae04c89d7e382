use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A tool-call request issued by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Request id echoed back on the matching tool message.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Argument map (a JSON object for well-formed requests).
    pub arguments: Value,
}

impl ToolCall {
    /// Creates a tool call with a fresh random id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self::with_id(format!("call_{}", Uuid::new_v4().simple()), name, arguments)
    }

    /// Creates a tool call with a caller-chosen id.
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Wire function description handed to the model:
/// `{name, description, parameters: {type: "object", properties, required}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tool_call_generates_unique_ids() {
        let a = ToolCall::new("echo", serde_json::json!({}));
        let b = ToolCall::new("echo", serde_json::json!({}));
        assert!(a.id.starts_with("call_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_definition_serializes_wire_shape() {
        let def = ToolDefinition::new(
            "add",
            "Adds numbers",
            serde_json::json!({"type": "object", "properties": {}, "required": []}),
        );
        let json = serde_json::to_value(&def).expect("serialize");
        assert_eq!(json["name"], "add");
        assert_eq!(json["description"], "Adds numbers");
        assert_eq!(json["parameters"]["type"], "object");
    }
}
