use serde_json::{Map, Value};

use crate::errors::{BridgeError, BridgeResult};
use crate::models::message::Message;
use crate::models::request::{ChatRequest, PromptSource};
use crate::models::role::Role;
use crate::models::tool::ToolCall;

/// Parse an OpenAI-shaped chat-completion body.
///
/// The conversation comes from the first non-empty source, in order: `messages`,
/// `prompt`, `input`, then the whole body serialized back to JSON. Sources further
/// down the chain are ignored even when present.
pub fn parse_inbound(raw: &[u8]) -> BridgeResult<ChatRequest> {
    let body: Value =
        serde_json::from_slice(raw).map_err(|e| BridgeError::Parse(e.to_string()))?;

    let (messages, source) = select_conversation(&body);

    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(String::from);

    Ok(ChatRequest::new(messages, source)
        .with_stream(stream)
        .with_model(model))
}

fn select_conversation(body: &Value) -> (Vec<Message>, PromptSource) {
    if let Some(items) = body.get("messages").and_then(Value::as_array) {
        let messages: Vec<Message> = items.iter().filter_map(convert_message).collect();
        if messages
            .iter()
            .any(|m| !m.content.trim().is_empty() || m.has_tool_calls())
        {
            return (messages, PromptSource::Messages);
        }
    }

    if let Some(prompt) = non_empty_str(body, "prompt") {
        return (vec![Message::user(prompt)], PromptSource::Prompt);
    }

    if let Some(input) = non_empty_str(body, "input") {
        return (vec![Message::user(input)], PromptSource::Input);
    }

    (vec![Message::user(body.to_string())], PromptSource::RawBody)
}

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

// Convert one inbound JSON message to our Message type
fn convert_message(value: &Value) -> Option<Message> {
    let role_name = value.get("role")?.as_str()?;
    let Some(role) = Role::parse(role_name) else {
        tracing::warn!(role = role_name, "Skipping message with unknown role");
        return None;
    };

    let content = match value.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .concat(),
        _ => String::new(),
    };

    let mut message = Message::new(role, content);

    if let Some(calls) = value.get("tool_calls").and_then(Value::as_array) {
        let tool_calls = calls
            .iter()
            .enumerate()
            .filter_map(|(index, call)| convert_tool_call(index, call))
            .collect();
        message = message.with_tool_calls(tool_calls);
    }

    if role == Role::Tool {
        if let Some(name) = value
            .get("tool_name")
            .or_else(|| value.get("name"))
            .and_then(Value::as_str)
        {
            message = message.with_tool_name(name);
        }
    }

    Some(message)
}

fn convert_tool_call(index: usize, call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name")?.as_str()?;
    let id = call
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", index));

    Some(ToolCall::new(id, name, arguments_map(function.get("arguments"))))
}

/// Tool-call arguments arrive either as an object or as a JSON-encoded string
pub(crate) fn arguments_map(arguments: Option<&Value>) -> Map<String, Value> {
    match arguments {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
