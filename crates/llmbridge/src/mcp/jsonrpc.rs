use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ToolCallResult, ToolError};

pub const JSONRPC_VERSION: &str = "2.0";

/// Every request uses the same id; the bridge never pipelines calls on one connection.
pub const REQUEST_ID: u64 = 1;

const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

pub fn encode_tool_rpc(method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: REQUEST_ID,
        method: method.to_string(),
        params,
    }
}

/// Turn an HTTP status and body from the tool server into the RPC `result`.
///
/// A non-2xx status, a JSON-RPC `error`, a `result.error` field and an MCP
/// `result.isError` flag all come back as a [`ToolError`].
pub fn decode_tool_rpc(status: u16, body: &str) -> ToolCallResult<Value> {
    if !(200..300).contains(&status) {
        return Err(ToolError::Http {
            status,
            body: truncate(body.trim()),
        });
    }

    let envelope: Value = serde_json::from_str(unwrap_event_stream(body))
        .map_err(|e| ToolError::Rpc(format!("Invalid JSON-RPC response: {}", e)))?;

    if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
        return Err(ToolError::Rpc(error_message(error)));
    }

    let result = envelope
        .get("result")
        .cloned()
        .ok_or_else(|| ToolError::Rpc("Response has no result".to_string()))?;

    if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
        return Err(ToolError::Rpc(error_message(error)));
    }

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(ToolError::Rpc(content_text(&result)));
    }

    Ok(result)
}

// Streamable-HTTP servers may answer with an SSE body; take the first data line
fn unwrap_event_stream(body: &str) -> &str {
    let trimmed = body.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    trimmed
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .find(|data| !data.is_empty() && *data != "[DONE]")
        .unwrap_or(trimmed)
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

fn content_text(result: &Value) -> String {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        "Tool reported an error".to_string()
    } else {
        texts.join("\n")
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_envelope() {
        let request = encode_tool_rpc("tools/call", json!({"name": "list_datasources", "arguments": {}}));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "list_datasources", "arguments": {}}
            })
        );
    }

    #[test]
    fn test_decode_success() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"search_dashboards"}]}}"#;
        let result = decode_tool_rpc(200, body).unwrap();
        assert_eq!(result["tools"][0]["name"], "search_dashboards");
    }

    #[test]
    fn test_decode_http_failure() {
        let err = decode_tool_rpc(401, "unauthorized").unwrap_err();
        assert_eq!(
            err,
            ToolError::Http {
                status: 401,
                body: "unauthorized".into()
            }
        );
    }

    #[test]
    fn test_decode_jsonrpc_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        assert_eq!(
            decode_tool_rpc(200, body).unwrap_err(),
            ToolError::Rpc("Method not found".into())
        );
    }

    #[test]
    fn test_decode_result_error() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{"error":"datasource not found"}}"#;
        assert_eq!(
            decode_tool_rpc(200, body).unwrap_err(),
            ToolError::Rpc("datasource not found".into())
        );
    }

    #[test]
    fn test_decode_is_error_flag() {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"isError": true, "content": [{"type": "text", "text": "bad PromQL"}]}
        })
        .to_string();
        assert_eq!(
            decode_tool_rpc(200, &body).unwrap_err(),
            ToolError::Rpc("bad PromQL".into())
        );
    }

    #[test]
    fn test_decode_event_stream_body() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n";
        assert_eq!(decode_tool_rpc(200, body).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_tool_rpc(200, "<html>").unwrap_err(),
            ToolError::Rpc(_)
        ));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let body = "x".repeat(2000);
        let err = decode_tool_rpc(500, &body).unwrap_err();
        if let ToolError::Http { body, .. } = err {
            assert_eq!(body.len(), MAX_ERROR_BODY + 3);
        } else {
            panic!("Expected HTTP error");
        }
    }
}
