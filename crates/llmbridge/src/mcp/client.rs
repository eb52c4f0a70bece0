use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use super::jsonrpc::{decode_tool_rpc, encode_tool_rpc};
use super::{ToolServer, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};
use crate::errors::{ToolCallResult, ToolError};

pub const MCP_PATH: &str = "/mcp";

#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Base URL of the tool server; `/mcp` is appended when missing
    pub url: String,
    /// Bearer token used when the request carries no credential of its own
    pub token: Option<String>,
    pub timeout: Duration,
}

/// JSON-RPC over HTTP POST against an MCP server
pub struct McpClient {
    client: Client,
    config: McpClientConfig,
}

impl McpClient {
    pub fn new(config: McpClientConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        let base = self.config.url.trim_end_matches('/');
        if base.ends_with(MCP_PATH) {
            base.to_string()
        } else {
            format!("{}{}", base, MCP_PATH)
        }
    }

    pub async fn list_tools(&self, credential: Option<&str>) -> ToolCallResult<Value> {
        self.rpc(METHOD_TOOLS_LIST, json!({}), credential).await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        credential: Option<&str>,
    ) -> ToolCallResult<Value> {
        self.rpc(
            METHOD_TOOLS_CALL,
            json!({ "name": name, "arguments": arguments }),
            credential,
        )
        .await
    }

    fn transport_error(&self, err: reqwest::Error) -> ToolError {
        if err.is_timeout() {
            ToolError::Timeout(self.config.timeout.as_secs())
        } else {
            ToolError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl ToolServer for McpClient {
    async fn rpc(
        &self,
        method: &str,
        params: Value,
        credential: Option<&str>,
    ) -> ToolCallResult<Value> {
        let request = encode_tool_rpc(method, params);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Accept", "application/json, text/event-stream")
            .json(&request);

        if let Some(token) = credential.or(self.config.token.as_deref()) {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        tracing::debug!(method, status, "Tool server replied");
        decode_tool_rpc(status, &body)
    }
}
