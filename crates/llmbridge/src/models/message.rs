use serde::{Deserialize, Serialize};

use super::role::Role;
use super::tool::{ToolCall, ToolResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message to or from an LLM
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }

    pub fn system<S: Into<String>>(content: S) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// The tool-role message that feeds one result back to the model
    pub fn tool_result(result: &ToolResult) -> Self {
        Message {
            role: Role::Tool,
            content: result.payload_text(),
            tool_calls: Vec::new(),
            tool_name: Some(result.name.clone()),
        }
    }

    /// Attach tool calls to the message
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls.extend(tool_calls);
        self
    }

    pub fn with_tool_name<S: Into<String>>(mut self, name: S) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    /// The last line of the content, ignoring trailing blank lines
    pub fn last_line(&self) -> &str {
        self.content
            .trim_end()
            .lines()
            .last()
            .map(str::trim)
            .unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
