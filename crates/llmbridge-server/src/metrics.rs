use std::time::Duration;

use llmbridge::telemetry::{LlmPhase, Telemetry};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Prometheus-backed request telemetry
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
    llm_calls: IntCounterVec,
    llm_duration: HistogramVec,
    tool_calls: IntCounterVec,
    tool_duration: HistogramVec,
    analysis: IntCounterVec,
    failures: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("llmbridge_requests_total", "Chat requests by selected mode"),
            &["mode"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let llm_calls = IntCounterVec::new(
            Opts::new("llmbridge_llm_calls_total", "LLM backend calls"),
            &["phase", "outcome"],
        )?;
        registry.register(Box::new(llm_calls.clone()))?;

        let llm_duration = HistogramVec::new(
            HistogramOpts::new(
                "llmbridge_llm_call_duration_seconds",
                "Time until the LLM backend answered",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["phase"],
        )?;
        registry.register(Box::new(llm_duration.clone()))?;

        let tool_calls = IntCounterVec::new(
            Opts::new("llmbridge_tool_calls_total", "Tool server calls"),
            &["tool", "outcome"],
        )?;
        registry.register(Box::new(tool_calls.clone()))?;

        let tool_duration = HistogramVec::new(
            HistogramOpts::new(
                "llmbridge_tool_call_duration_seconds",
                "Tool call duration in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["tool"],
        )?;
        registry.register(Box::new(tool_duration.clone()))?;

        let analysis = IntCounterVec::new(
            Opts::new(
                "llmbridge_analysis_outcomes_total",
                "How the model answered the tool-routing call",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(analysis.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new("llmbridge_failures_total", "Failures by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        Ok(Self {
            registry,
            requests,
            llm_calls,
            llm_duration,
            tool_calls,
            tool_duration,
            analysis,
            failures,
        })
    }

    /// Text exposition format for scraping
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

impl Telemetry for Metrics {
    fn request_started(&self, mode: &'static str) {
        self.requests.with_label_values(&[mode]).inc();
    }

    fn llm_call(&self, phase: LlmPhase, elapsed: Duration, ok: bool) {
        self.llm_calls
            .with_label_values(&[phase.as_str(), outcome(ok)])
            .inc();
        self.llm_duration
            .with_label_values(&[phase.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    fn tool_call(&self, tool: &str, elapsed: Duration, ok: bool) {
        self.tool_calls.with_label_values(&[tool, outcome(ok)]).inc();
        self.tool_duration
            .with_label_values(&[tool])
            .observe(elapsed.as_secs_f64());
    }

    fn analysis_outcome(&self, outcome: &'static str) {
        self.analysis.with_label_values(&[outcome]).inc();
    }

    fn failure(&self, kind: &'static str) {
        self.failures.with_label_values(&[kind]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.request_started("mcp");
        metrics.llm_call(LlmPhase::Opinion, Duration::from_millis(250), true);
        metrics.tool_call("query_prometheus", Duration::from_millis(40), false);
        metrics.analysis_outcome("tool_calls");
        metrics.failure("upstream_llm");

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"llmbridge_requests_total{mode="mcp"} 1"#));
        assert!(text.contains(r#"llmbridge_llm_calls_total{outcome="ok",phase="opinion"} 1"#));
        assert!(text.contains(r#"llmbridge_tool_calls_total{outcome="error",tool="query_prometheus"} 1"#));
        assert!(text.contains(r#"llmbridge_analysis_outcomes_total{outcome="tool_calls"} 1"#));
        assert!(text.contains(r#"llmbridge_failures_total{kind="upstream_llm"} 1"#));
        assert!(text.contains("llmbridge_llm_call_duration_seconds_count{phase=\"opinion\"} 1"));
    }

    #[test]
    fn test_instances_do_not_share_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.request_started("direct");

        assert!(first.encode().unwrap().contains("llmbridge_requests_total"));
        assert!(!second.encode().unwrap().contains("llmbridge_requests_total{"));
    }
}
