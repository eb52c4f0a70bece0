use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures that abort a request, surfaced to the client as a 400/500 or an error chunk.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Invalid request body: {0}")]
    Parse(String),

    #[error("LLM backend error: {0}")]
    UpstreamLlm(String),

    #[error("Tool server error: {0}")]
    UpstreamTool(String),

    #[error("Could not decode analysis reply: {0}")]
    AnalysisDecode(String),
}

impl BridgeError {
    /// Short label used for log fields and failure counters
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Parse(_) => "parse",
            BridgeError::UpstreamLlm(_) => "upstream_llm",
            BridgeError::UpstreamTool(_) => "upstream_tool",
            BridgeError::AnalysisDecode(_) => "analysis_decode",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, BridgeError::Parse(_))
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// A failed tool call. These are captured as data in the conversation, not propagated.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Tool call failed: {0}")]
    Rpc(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool call timed out after {0}s")]
    Timeout(u64),
}

pub type ToolCallResult<T> = Result<T, ToolError>;
