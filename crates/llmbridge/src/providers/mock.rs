use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream;
use std::sync::Mutex;

use super::base::{ContentStream, Provider, Usage};
use crate::models::message::Message;
use crate::models::tool::Tool;

/// One call the mock received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub streamed: bool,
}

/// A mock provider that returns pre-configured responses for testing
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<Vec<Message>>,
    chunks: Mutex<Vec<String>>,
    failure: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Mutex::new(responses),
            ..Default::default()
        }
    }

    /// Segments yielded by the next streaming call
    pub fn with_chunks(self, chunks: &[&str]) -> Self {
        *self.chunks.lock().unwrap() = chunks.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Every call fails with this message
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, messages: &[Message], tools: &[Tool], streamed: bool) -> Result<()> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            streamed,
        });
        match &self.failure {
            Some(message) => Err(anyhow!(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        _model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        self.record(messages, tools, false)?;
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            // Return empty response if no more pre-configured responses
            Ok((Message::assistant(""), Usage::default()))
        } else {
            Ok((responses.remove(0), Usage::default()))
        }
    }

    async fn stream(&self, _model: &str, messages: &[Message]) -> Result<ContentStream> {
        self.record(messages, &[], true)?;
        let chunks: Vec<Result<String>> = self.chunks.lock().unwrap().drain(..).map(Ok).collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}
