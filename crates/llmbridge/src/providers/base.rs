use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

/// Incremental content segments, in the order the backend produced them
pub type ContentStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Base trait for chat backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next message. Tools are attached only when non-empty.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)>;

    /// Generate the next message as a stream of content segments, without tools
    async fn stream(&self, model: &str, messages: &[Message]) -> Result<ContentStream>;
}
