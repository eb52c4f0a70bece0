//! JSON-RPC plumbing for the Model Context Protocol tool server.
pub mod client;
pub mod jsonrpc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ToolCallResult;

pub use client::{McpClient, McpClientConfig};
pub use jsonrpc::{decode_tool_rpc, encode_tool_rpc, JsonRpcRequest};

pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Anything that can answer MCP JSON-RPC calls
#[async_trait]
pub trait ToolServer: Send + Sync {
    /// Issue one RPC and return its `result`. `credential` overrides any configured token.
    async fn rpc(
        &self,
        method: &str,
        params: Value,
        credential: Option<&str>,
    ) -> ToolCallResult<Value>;
}
