use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};

use super::base::Usage;
use crate::inbound::arguments_map;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

/// Convert internal Message format to the Ollama chat message specification
pub fn messages_to_ollama_spec(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let mut converted = json!({
                "role": message.role,
                "content": message.content,
            });

            if !message.tool_calls.is_empty() {
                let calls: Vec<Value> = message
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments,
                            }
                        })
                    })
                    .collect();
                converted["tool_calls"] = json!(calls);
            }

            if let Some(name) = &message.tool_name {
                converted["tool_name"] = json!(name);
            }

            converted
        })
        .collect()
}

/// Convert internal Tool format to the function-tool specification
pub fn tools_to_ollama_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            }
        }));
    }

    Ok(result)
}

/// Convert an Ollama `/api/chat` response to internal Message format
pub fn ollama_response_to_message(response: &Value) -> Result<Message> {
    if let Some(error) = response.get("error").and_then(Value::as_str) {
        return Err(anyhow!("Backend error: {}", error));
    }

    let original = response
        .get("message")
        .ok_or_else(|| anyhow!("No message in response"))?;

    let content = original
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let mut tool_calls = Vec::new();
    if let Some(calls) = original.get("tool_calls").and_then(Value::as_array) {
        for (index, call) in calls.iter().enumerate() {
            let function_name = call["function"]["name"].as_str().unwrap_or_default();
            if !is_valid_function_name(function_name) {
                tracing::warn!(
                    name = function_name,
                    "Dropping tool call with invalid function name"
                );
                continue;
            }

            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", index));

            tool_calls.push(ToolCall::new(
                id,
                function_name,
                arguments_map(call["function"].get("arguments")),
            ));
        }
    }

    Ok(Message::new(Role::Assistant, content).with_tool_calls(tool_calls))
}

pub fn get_usage(data: &Value) -> Usage {
    let input_tokens = data
        .get("prompt_eval_count")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok());

    let output_tokens = data
        .get("eval_count")
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok());

    let total_tokens = match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => input.checked_add(output),
        _ => None,
    };

    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// One decoded line of a streaming chat response
#[derive(Debug, Default, PartialEq)]
pub struct StreamLine {
    pub content: Option<String>,
    pub done: bool,
}

/// Decode one newline-delimited JSON chunk. Blank lines decode to an empty chunk.
pub fn parse_stream_line(line: &[u8]) -> Result<StreamLine> {
    let text = std::str::from_utf8(line)?.trim();
    if text.is_empty() {
        return Ok(StreamLine::default());
    }

    let chunk: Value = serde_json::from_str(text)?;
    if let Some(error) = chunk.get("error").and_then(Value::as_str) {
        return Err(anyhow!("Backend error: {}", error));
    }

    let content = chunk["message"]["content"]
        .as_str()
        .filter(|c| !c.is_empty())
        .map(String::from);
    let done = chunk.get("done").and_then(Value::as_bool).unwrap_or(false);

    Ok(StreamLine { content, done })
}

fn is_valid_function_name(name: &str) -> bool {
    static VALID_NAME: OnceLock<Regex> = OnceLock::new();
    VALID_NAME
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_.-]+$").expect("valid regex"))
        .is_match(name)
}
