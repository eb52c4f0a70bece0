use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::ToolError;

/// A tool that can be offered to the model and dispatched to the tool server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema of the arguments the tool accepts
    #[serde(alias = "inputSchema", alias = "input_schema")]
    pub parameters: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, parameters: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names listed under `required` in the parameter schema
    pub fn required_arguments(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// A tool call emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool call, in the shape it is fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub ok: bool,
    pub payload: Value,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            ok: true,
            payload,
        }
    }

    pub fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            ok: false,
            payload: json!({ "error": error.to_string() }),
        }
    }

    /// The payload as the text content of a tool message
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_arguments() {
        let tool = Tool::new(
            "get_dashboard_by_uid",
            "Fetch a dashboard",
            json!({"type": "object", "required": ["uid"], "properties": {"uid": {"type": "string"}}}),
        );
        assert_eq!(tool.required_arguments(), vec!["uid"]);

        let tool = Tool::new("list_datasources", "List", json!({"type": "object"}));
        assert!(tool.required_arguments().is_empty());
    }

    #[test]
    fn test_tool_accepts_mcp_input_schema() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "search_dashboards",
            "description": "Search",
            "inputSchema": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(tool.parameters, json!({"type": "object"}));
    }

    #[test]
    fn test_failure_payload_carries_error_marker() {
        let call = ToolCall::new("call_0", "query_prometheus", Map::new());
        let result = ToolResult::failure(&call, &ToolError::Rpc("datasource not found".into()));
        assert!(!result.ok);
        assert_eq!(
            result.payload,
            json!({"error": "Tool call failed: datasource not found"})
        );
        assert_eq!(
            result.payload_text(),
            r#"{"error":"Tool call failed: datasource not found"}"#
        );
    }
}
