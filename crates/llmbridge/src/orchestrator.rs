//! The per-request state machine: pick a mode from the last user line, drive at most one
//! tool round, and hand back text or a delta stream for rendering.
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{BridgeError, BridgeResult};
use crate::inbound::arguments_map;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::tool::{ToolCall, ToolResult};
use crate::prompt_template::load_bundled_prompt;
use crate::providers::base::{ContentStream, Provider};
use crate::providers::ollama::OLLAMA_MODEL;
use crate::registry::ToolRegistry;
use crate::telemetry::{with_span, LlmPhase, NoopTelemetry, Telemetry};

pub const TEST_SENTINEL: &str = "#llm:test";
pub const TEST_REPLY: &str = "Lorem ipsum dolor sit amet";
pub const TOOL_SENTINEL: &str = "#mcp:grafana";
pub const LIST_TOOLS_COMMAND: &str = "#mcp:grafana:tools";

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub default_model: String,
    /// Honor the `model` field of inbound requests
    pub allow_model_override: bool,
    pub test_sentinel: String,
    pub test_reply: String,
    pub tool_sentinel: String,
    pub list_tools_command: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_model: OLLAMA_MODEL.to_string(),
            allow_model_override: false,
            test_sentinel: TEST_SENTINEL.to_string(),
            test_reply: TEST_REPLY.to_string(),
            tool_sentinel: TOOL_SENTINEL.to_string(),
            list_tools_command: LIST_TOOLS_COMMAND.to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Only the last line of the last user message is inspected. The list command shares
    /// the tool sentinel's prefix, so it is checked first.
    pub fn select_mode(&self, request: &ChatRequest) -> Mode {
        let Some(line) = request.last_user_message().map(Message::last_line) else {
            return Mode::DirectAnswer;
        };

        let starts = |sentinel: &str| !sentinel.is_empty() && line.starts_with(sentinel);
        if starts(self.test_sentinel.as_str()) {
            Mode::TestShortCircuit
        } else if starts(self.list_tools_command.as_str()) {
            Mode::ListTools
        } else if starts(self.tool_sentinel.as_str()) {
            Mode::McpAnalysis
        } else {
            Mode::DirectAnswer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    TestShortCircuit,
    ListTools,
    DirectAnswer,
    McpAnalysis,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::TestShortCircuit => "test",
            Mode::ListTools => "list_tools",
            Mode::DirectAnswer => "direct",
            Mode::McpAnalysis => "mcp",
        }
    }
}

/// What the pipeline resolved to, before rendering
pub enum Outcome {
    FinalText(String),
    Deltas(ContentStream),
}

impl Outcome {
    /// Drain a delta stream into one string
    pub async fn into_text(self) -> BridgeResult<String> {
        match self {
            Outcome::FinalText(text) => Ok(text),
            Outcome::Deltas(stream) => stream
                .try_collect::<Vec<String>>()
                .await
                .map(|parts| parts.concat())
                .map_err(|e| BridgeError::UpstreamLlm(e.to_string())),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::FinalText(text) => f.debug_tuple("FinalText").field(text).finish(),
            Outcome::Deltas(_) => f.write_str("Deltas(..)"),
        }
    }
}

/// How the model answered the tool-routing question
#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    /// An assistant message carrying at least one call
    ToolCalls(Message),
    /// Plain text; the model chose not to use tools
    Declined(String),
    /// Looked like structured output but could not be decoded
    Undecodable { text: String, reason: String },
}

impl Analysis {
    pub fn label(&self) -> &'static str {
        match self {
            Analysis::ToolCalls(_) => "tool_calls",
            Analysis::Declined(_) => "declined",
            Analysis::Undecodable { .. } => "undecodable",
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StructuredReply {
    Batch { tool_calls: Vec<StructuredCall> },
    List(Vec<StructuredCall>),
    Single(StructuredCall),
}

#[derive(Deserialize)]
struct StructuredCall {
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "args", alias = "parameters")]
    arguments: Value,
}

impl StructuredReply {
    fn into_calls(self) -> Vec<StructuredCall> {
        match self {
            StructuredReply::Batch { tool_calls } => tool_calls,
            StructuredReply::List(calls) => calls,
            StructuredReply::Single(call) => vec![call],
        }
    }
}

/// Classify the opinion reply. Native tool calls win over anything in the text.
pub fn interpret_analysis(reply: Message) -> Analysis {
    if reply.has_tool_calls() {
        return Analysis::ToolCalls(reply);
    }

    let body = strip_code_fence(reply.content.trim());
    if !(body.starts_with('{') || body.starts_with('[')) {
        return Analysis::Declined(reply.content);
    }

    let calls = match serde_json::from_str::<StructuredReply>(body) {
        Ok(structured) => structured.into_calls(),
        Err(e) => {
            return Analysis::Undecodable {
                text: reply.content,
                reason: e.to_string(),
            }
        }
    };

    let calls: Vec<ToolCall> = calls
        .into_iter()
        .filter(|call| !call.name.trim().is_empty())
        .enumerate()
        .map(|(index, call)| {
            ToolCall::new(
                format!("call_{}", index),
                call.name.trim(),
                arguments_map(Some(&call.arguments)),
            )
        })
        .collect();

    if calls.is_empty() {
        return Analysis::Undecodable {
            text: reply.content,
            reason: "structured reply names no tools".to_string(),
        };
    }

    Analysis::ToolCalls(Message::assistant("").with_tool_calls(calls))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line, if any
    let rest = match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with(['{', '[']) => body,
        _ => rest,
    };
    let rest = rest.trim_end();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// The follow-up conversation: client messages, the assistant turn with its calls, one
/// tool message per result in call order, then the follow-up instruction.
pub fn augment_conversation(
    messages: &[Message],
    assistant: Message,
    results: &[ToolResult],
    instruction: &str,
) -> Vec<Message> {
    let mut conversation = Vec::with_capacity(messages.len() + results.len() + 2);
    conversation.extend_from_slice(messages);
    conversation.push(assistant);
    conversation.extend(results.iter().map(Message::tool_result));
    conversation.push(Message::system(instruction));
    conversation
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    registry: Arc<ToolRegistry>,
    telemetry: Arc<dyn Telemetry>,
    config: OrchestratorConfig,
    analysis_prompt: String,
    followup_prompt: String,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Result<Self> {
        let analysis_prompt = load_bundled_prompt("analysis.md", &json!({ "tools": registry.list() }))?;
        let followup_prompt = load_bundled_prompt("followup.md", &json!({}))?;

        Ok(Self {
            provider,
            registry,
            telemetry: Arc::new(NoopTelemetry),
            config,
            analysis_prompt,
            followup_prompt,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The model named in responses and used for every LLM call of the request
    pub fn model_for<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        match &request.model {
            Some(model) if self.config.allow_model_override => model,
            _ => &self.config.default_model,
        }
    }

    pub async fn run(&self, request: &ChatRequest) -> BridgeResult<Outcome> {
        let mode = self.config.select_mode(request);
        self.telemetry.request_started(mode.as_str());
        tracing::info!(
            mode = mode.as_str(),
            stream = request.stream,
            messages = request.messages.len(),
            "Handling chat request"
        );

        let result = with_span("orchestrate", mode.as_str(), async {
            match mode {
                Mode::TestShortCircuit => Ok(Outcome::FinalText(self.config.test_reply.clone())),
                Mode::ListTools => Ok(self.list_tools(request).await),
                Mode::DirectAnswer => {
                    self.answer(LlmPhase::Direct, request, &request.messages).await
                }
                Mode::McpAnalysis => self.analyze(request).await,
            }
        })
        .await;

        if let Err(err) = &result {
            self.telemetry.failure(err.kind());
        }
        result
    }

    async fn list_tools(&self, request: &ChatRequest) -> Outcome {
        let payload = match self
            .registry
            .list_remote(request.api_key_override.as_deref())
            .await
        {
            Ok(result) => result,
            Err(e) => {
                let err = BridgeError::UpstreamTool(e.to_string());
                tracing::warn!(error = %err, "Listing tools failed");
                self.telemetry.failure(err.kind());
                json!({ "error": e.to_string() })
            }
        };
        Outcome::FinalText(payload.to_string())
    }

    async fn analyze(&self, request: &ChatRequest) -> BridgeResult<Outcome> {
        let model = self.model_for(request);
        let mut opinion = Vec::with_capacity(request.messages.len() + 1);
        opinion.push(Message::system(self.analysis_prompt.as_str()));
        opinion.extend(request.messages.iter().cloned());

        let started = Instant::now();
        let reply = self
            .provider
            .complete(model, &opinion, self.registry.list())
            .await;
        self.telemetry
            .llm_call(LlmPhase::Opinion, started.elapsed(), reply.is_ok());
        let (reply, _) = reply.map_err(|e| llm_failure(LlmPhase::Opinion, e))?;

        let analysis = interpret_analysis(reply);
        self.telemetry.analysis_outcome(analysis.label());

        match analysis {
            Analysis::ToolCalls(assistant) => self.execute(request, assistant).await,
            Analysis::Declined(text) => {
                tracing::info!("Model answered without tools");
                Ok(Outcome::FinalText(text))
            }
            Analysis::Undecodable { text, reason } => {
                let err = BridgeError::AnalysisDecode(reason);
                tracing::warn!(error = %err, "Falling back to the raw analysis text");
                self.telemetry.failure(err.kind());
                Ok(Outcome::FinalText(text))
            }
        }
    }

    async fn execute(&self, request: &ChatRequest, assistant: Message) -> BridgeResult<Outcome> {
        let names: Vec<&str> = assistant.tool_calls.iter().map(|c| c.name.as_str()).collect();
        tracing::info!(tools = ?names, "Dispatching tool calls");

        let results = self
            .registry
            .dispatch_batch(&assistant.tool_calls, request.api_key_override.as_deref())
            .await;
        let failed = results.iter().filter(|r| !r.ok).count();
        if failed > 0 {
            tracing::warn!(failed, total = results.len(), "Some tool calls failed");
        }

        let conversation = augment_conversation(
            &request.messages,
            assistant,
            &results,
            &self.followup_prompt,
        );
        self.answer(LlmPhase::FollowUp, request, &conversation).await
    }

    /// One LLM call with no tools attached, streamed when the client asked for a stream
    async fn answer(
        &self,
        phase: LlmPhase,
        request: &ChatRequest,
        messages: &[Message],
    ) -> BridgeResult<Outcome> {
        let model = self.model_for(request);
        let started = Instant::now();
        let result = if request.stream {
            self.provider
                .stream(model, messages)
                .await
                .map(Outcome::Deltas)
        } else {
            self.provider
                .complete(model, messages, &[])
                .await
                .map(|(message, _)| Outcome::FinalText(message.content))
        };
        self.telemetry
            .llm_call(phase, started.elapsed(), result.is_ok());

        result.map_err(|e| llm_failure(phase, e))
    }
}

fn llm_failure(phase: LlmPhase, error: anyhow::Error) -> BridgeError {
    tracing::error!(phase = phase.as_str(), error = %error, "LLM call failed");
    BridgeError::UpstreamLlm(error.to_string())
}
