//! Instrumentation hooks consumed by the orchestrator and registry.
//!
//! The bridge only calls into [`Telemetry`]; the server decides what backs it.
use std::future::Future;
use std::time::Duration;

use tracing::Instrument;

/// Which LLM round-trip a call belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmPhase {
    Direct,
    Opinion,
    FollowUp,
}

impl LlmPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmPhase::Direct => "direct",
            LlmPhase::Opinion => "opinion",
            LlmPhase::FollowUp => "follow_up",
        }
    }
}

/// Counters and timers recorded while handling a request. Implementations must be
/// safe to call concurrently from many requests.
pub trait Telemetry: Send + Sync {
    fn request_started(&self, _mode: &'static str) {}

    fn llm_call(&self, _phase: LlmPhase, _elapsed: Duration, _ok: bool) {}

    fn tool_call(&self, _tool: &str, _elapsed: Duration, _ok: bool) {}

    fn analysis_outcome(&self, _outcome: &'static str) {}

    fn failure(&self, _kind: &'static str) {}
}

/// Telemetry that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

/// Run `work` inside a tracing span, returning its output untouched.
pub async fn with_span<F>(op: &'static str, detail: &str, work: F) -> F::Output
where
    F: Future,
{
    work.instrument(tracing::info_span!("llmbridge", op, detail))
        .await
}
