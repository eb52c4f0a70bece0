use anyhow::{anyhow, Result};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};

use super::base::{ContentStream, Provider, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::{
    get_usage, messages_to_ollama_spec, ollama_response_to_message, parse_stream_line,
    tools_to_ollama_spec,
};
use crate::models::message::Message;
use crate::models::tool::Tool;

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder().connect_timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    fn payload(&self, model: &str, messages: &[Message], tools: &[Tool], stream: bool) -> Result<Value> {
        let mut payload = json!({
            "model": model,
            "messages": messages_to_ollama_spec(messages),
            "stream": stream,
        });

        if !tools.is_empty() {
            payload["tools"] = json!(tools_to_ollama_spec(tools)?);
        }

        Ok(payload)
    }

    async fn post(&self, payload: &Value) -> Result<Response> {
        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));

        let mut request = self.client.post(&url).json(payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = tokio::time::timeout(self.config.timeout, request.send())
            .await
            .map_err(|_| anyhow!("Request timed out after {}s", self.config.timeout.as_secs()))??;

        match response.status() {
            status if status.is_success() => Ok(response),
            status if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() >= 500 => {
                Err(anyhow!("Server error: {}", status))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(anyhow!("Request failed: {}: {}", status, body))
            }
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let payload = self.payload(model, messages, tools, false)?;
        let response = self.post(&payload).await?;

        let data: Value = tokio::time::timeout(self.config.timeout, response.json())
            .await
            .map_err(|_| anyhow!("Response timed out after {}s", self.config.timeout.as_secs()))??;

        let message = ollama_response_to_message(&data)?;
        let usage = get_usage(&data);
        tracing::debug!(
            model,
            input_tokens = ?usage.input_tokens,
            output_tokens = ?usage.output_tokens,
            tool_calls = message.tool_calls.len(),
            "Completion received"
        );

        Ok((message, usage))
    }

    async fn stream(&self, model: &str, messages: &[Message]) -> Result<ContentStream> {
        let payload = self.payload(model, messages, &[], true)?;
        let response = self.post(&payload).await?;

        let idle = self.config.timeout;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut done = false;

            while !done {
                let next = tokio::time::timeout(idle, bytes.next())
                    .await
                    .map_err(|_| anyhow!("Stream stalled for more than {}s", idle.as_secs()))?;
                let Some(chunk) = next else { break };
                buffer.extend_from_slice(&chunk.map_err(anyhow::Error::from)?);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let parsed = parse_stream_line(&line)?;
                    if let Some(content) = parsed.content {
                        yield content;
                    }
                    if parsed.done {
                        done = true;
                        break;
                    }
                }
            }

            // A final chunk without a trailing newline
            if !done && !buffer.is_empty() {
                let parsed = parse_stream_line(&buffer)?;
                if let Some(content) = parsed.content {
                    yield content;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
