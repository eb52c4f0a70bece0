use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};

use crate::errors::{ToolCallResult, ToolError};
use crate::mcp::{ToolServer, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};
use crate::models::tool::{Tool, ToolCall, ToolResult};
use crate::telemetry::{NoopTelemetry, Telemetry};

pub const UNLISTED_TOOL_LABEL: &str = "other";

/// The catalog of tools offered to the model, and the dispatcher that runs them
/// against the tool server. The catalog is fixed once constructed.
pub struct ToolRegistry {
    tools: Vec<Tool>,
    server: Arc<dyn ToolServer>,
    telemetry: Arc<dyn Telemetry>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Tool>, server: Arc<dyn ToolServer>) -> Result<Self> {
        ensure_unique(&tools)?;
        Ok(Self {
            tools,
            server,
            telemetry: Arc::new(NoopTelemetry),
        })
    }

    pub fn with_builtin_catalog(server: Arc<dyn ToolServer>) -> Result<Self> {
        Self::new(builtin_catalog(), server)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn list(&self) -> &[Tool] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name == name)
    }

    /// Ask the tool server for its own catalog
    pub async fn list_remote(&self, credential: Option<&str>) -> ToolCallResult<Value> {
        self.server
            .rpc(METHOD_TOOLS_LIST, json!({}), credential)
            .await
    }

    /// Run one tool call. Failures come back as a failed [`ToolResult`], never as an error.
    pub async fn dispatch(&self, call: &ToolCall, credential: Option<&str>) -> ToolResult {
        let started = Instant::now();
        let outcome = self.execute(call, credential).await;
        self.telemetry
            .tool_call(self.metric_label(&call.name), started.elapsed(), outcome.is_ok());

        match outcome {
            Ok(payload) => {
                tracing::info!(tool = %call.name, call_id = %call.id, "Tool call succeeded");
                ToolResult::success(call, payload)
            }
            Err(err) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %err, "Tool call failed");
                ToolResult::failure(call, &err)
            }
        }
    }

    /// Names outside the catalog come from the model verbatim, so they share one label
    fn metric_label<'a>(&self, name: &'a str) -> &'a str {
        if self.get(name).is_some() {
            name
        } else {
            UNLISTED_TOOL_LABEL
        }
    }

    /// Run calls one after another, returning results in call order
    pub async fn dispatch_batch(
        &self,
        calls: &[ToolCall],
        credential: Option<&str>,
    ) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.dispatch(call, credential).await);
        }
        results
    }

    async fn execute(&self, call: &ToolCall, credential: Option<&str>) -> ToolCallResult<Value> {
        match self.get(&call.name) {
            Some(tool) => {
                let missing: Vec<&str> = tool
                    .required_arguments()
                    .into_iter()
                    .filter(|name| !call.arguments.contains_key(*name))
                    .collect();
                if !missing.is_empty() {
                    return Err(ToolError::InvalidParameters(format!(
                        "{} is missing required arguments: {}",
                        call.name,
                        missing.join(", ")
                    )));
                }
            }
            None => {
                tracing::debug!(tool = %call.name, "Tool not in catalog, passing through to server");
            }
        }

        let params = json!({ "name": call.name, "arguments": call.arguments });
        self.server.rpc(METHOD_TOOLS_CALL, params, credential).await
    }
}

fn ensure_unique(tools: &[Tool]) -> Result<()> {
    let mut names = HashSet::new();
    for tool in tools {
        if !names.insert(tool.name.as_str()) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }
    }
    Ok(())
}

/// Load a catalog from a JSON file holding an array of tool descriptors
pub fn load_catalog(path: &Path) -> Result<Vec<Tool>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tool catalog {}", path.display()))?;
    let tools: Vec<Tool> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid tool catalog {}", path.display()))?;
    ensure_unique(&tools)?;
    Ok(tools)
}

/// Tools exposed by the Grafana MCP server
pub fn builtin_catalog() -> Vec<Tool> {
    vec![
        Tool::new(
            "search_dashboards",
            "Search Grafana dashboards by a query string. Returns matching dashboards with their uid, title and folder.",
            json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "description": "Text to match against dashboard titles"}
                }
            }),
        ),
        Tool::new(
            "get_dashboard_by_uid",
            "Fetch the full JSON model of a dashboard by its uid.",
            json!({
                "type": "object",
                "required": ["uid"],
                "properties": {
                    "uid": {"type": "string", "description": "Dashboard uid"}
                }
            }),
        ),
        Tool::new(
            "list_datasources",
            "List configured datasources, optionally filtered by type (for example prometheus or loki).",
            json!({
                "type": "object",
                "properties": {
                    "type": {"type": "string", "description": "Datasource type to filter by"}
                }
            }),
        ),
        Tool::new(
            "query_prometheus",
            "Run a PromQL query against a Prometheus datasource, as an instant or range query.",
            json!({
                "type": "object",
                "required": ["datasourceUid", "expr"],
                "properties": {
                    "datasourceUid": {"type": "string", "description": "Uid of the Prometheus datasource"},
                    "expr": {"type": "string", "description": "PromQL expression"},
                    "queryType": {"type": "string", "enum": ["instant", "range"], "description": "Defaults to instant"},
                    "startTime": {"type": "string", "description": "RFC3339 time or relative expression such as now-1h"},
                    "endTime": {"type": "string", "description": "RFC3339 time or relative expression such as now"},
                    "stepSeconds": {"type": "integer", "description": "Step for range queries"}
                }
            }),
        ),
        Tool::new(
            "list_prometheus_metric_names",
            "List metric names available in a Prometheus datasource, optionally filtered by a regex.",
            json!({
                "type": "object",
                "required": ["datasourceUid"],
                "properties": {
                    "datasourceUid": {"type": "string", "description": "Uid of the Prometheus datasource"},
                    "regex": {"type": "string", "description": "Regex the metric names must match"},
                    "limit": {"type": "integer", "description": "Maximum number of names to return"}
                }
            }),
        ),
        Tool::new(
            "query_loki_logs",
            "Run a LogQL query against a Loki datasource and return matching log lines.",
            json!({
                "type": "object",
                "required": ["datasourceUid", "logql"],
                "properties": {
                    "datasourceUid": {"type": "string", "description": "Uid of the Loki datasource"},
                    "logql": {"type": "string", "description": "LogQL expression"},
                    "startRfc3339": {"type": "string", "description": "Start of the time range"},
                    "endRfc3339": {"type": "string", "description": "End of the time range"},
                    "limit": {"type": "integer", "description": "Maximum number of lines, defaults to 10"}
                }
            }),
        ),
        Tool::new(
            "list_loki_label_names",
            "List label names present in a Loki datasource.",
            json!({
                "type": "object",
                "required": ["datasourceUid"],
                "properties": {
                    "datasourceUid": {"type": "string", "description": "Uid of the Loki datasource"}
                }
            }),
        ),
        Tool::new(
            "list_alert_rules",
            "List Grafana alert rules with their current state.",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer", "description": "Maximum number of rules to return"}
                }
            }),
        ),
        Tool::new(
            "list_incidents",
            "List incidents, optionally only the active ones.",
            json!({
                "type": "object",
                "properties": {
                    "status": {"type": "string", "enum": ["active", "resolved"]},
                    "limit": {"type": "integer"}
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::Mutex;

    /// Records calls and answers from a queue; an empty queue answers `{}`.
    #[derive(Default)]
    struct RecordingServer {
        calls: Mutex<Vec<(String, Value, Option<String>)>>,
        replies: Mutex<Vec<ToolCallResult<Value>>>,
    }

    #[async_trait]
    impl ToolServer for RecordingServer {
        async fn rpc(
            &self,
            method: &str,
            params: Value,
            credential: Option<&str>,
        ) -> ToolCallResult<Value> {
            self.calls.lock().unwrap().push((
                method.to_string(),
                params,
                credential.map(String::from),
            ));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                Ok(json!({}))
            } else {
                replies.remove(0)
            }
        }
    }

    #[derive(Default)]
    struct LabelRecorder {
        tools: Mutex<Vec<String>>,
    }

    impl Telemetry for LabelRecorder {
        fn tool_call(&self, tool: &str, _elapsed: std::time::Duration, _ok: bool) {
            self.tools.lock().unwrap().push(tool.to_string());
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        let arguments: Map<String, Value> = serde_json::from_value(arguments).unwrap();
        ToolCall::new(id, name, arguments)
    }

    #[test]
    fn test_builtin_catalog_is_unique() {
        let catalog = builtin_catalog();
        assert!(ensure_unique(&catalog).is_ok());
        assert!(catalog.iter().any(|t| t.name == "query_prometheus"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let server: Arc<dyn ToolServer> = Arc::new(RecordingServer::default());
        let tools = vec![
            Tool::new("a", "first", json!({})),
            Tool::new("a", "second", json!({})),
        ];
        let err = ToolRegistry::new(tools, server).err().unwrap();
        assert_eq!(err.to_string(), "Duplicate tool name: a");
    }

    #[test]
    fn test_load_catalog_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"[{"name": "echo", "description": "Echo input", "inputSchema": {"type": "object"}}]"#,
        )
        .unwrap();

        let tools = load_catalog(&path).unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_dispatch_known_tool() {
        let server = Arc::new(RecordingServer::default());
        server
            .replies
            .lock()
            .unwrap()
            .push(Ok(json!({"content": [{"type": "text", "text": "found"}]})));
        let registry = ToolRegistry::with_builtin_catalog(server.clone()).unwrap();

        let result = registry
            .dispatch(&call("c1", "search_dashboards", json!({"query": "nginx"})), Some("token"))
            .await;

        assert!(result.ok);
        assert_eq!(result.call_id, "c1");
        let calls = server.calls.lock().unwrap();
        assert_eq!(calls[0].0, "tools/call");
        assert_eq!(
            calls[0].1,
            json!({"name": "search_dashboards", "arguments": {"query": "nginx"}})
        );
        assert_eq!(calls[0].2.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn test_missing_required_argument_skips_server() {
        let server = Arc::new(RecordingServer::default());
        let registry = ToolRegistry::with_builtin_catalog(server.clone()).unwrap();

        let result = registry
            .dispatch(&call("c1", "query_prometheus", json!({"expr": "up"})), None)
            .await;

        assert!(!result.ok);
        assert_eq!(
            result.payload,
            json!({"error": "Invalid parameters: query_prometheus is missing required arguments: datasourceUid"})
        );
        assert!(server.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_passes_through() {
        let server = Arc::new(RecordingServer::default());
        let registry = ToolRegistry::with_builtin_catalog(server.clone()).unwrap();

        let result = registry
            .dispatch(&call("c1", "get_sift_analysis", json!({"id": "42"})), None)
            .await;

        assert!(result.ok);
        assert_eq!(
            server.calls.lock().unwrap()[0].1,
            json!({"name": "get_sift_analysis", "arguments": {"id": "42"}})
        );
    }

    #[tokio::test]
    async fn test_dispatch_batch_keeps_order_and_captures_failures() {
        let server = Arc::new(RecordingServer::default());
        {
            let mut replies = server.replies.lock().unwrap();
            replies.push(Ok(json!({"first": true})));
            replies.push(Err(ToolError::Rpc("boom".into())));
            replies.push(Ok(json!({"third": true})));
        }
        let registry = ToolRegistry::with_builtin_catalog(server.clone()).unwrap();

        let calls = vec![
            call("a", "list_datasources", json!({})),
            call("b", "list_alert_rules", json!({})),
            call("c", "list_incidents", json!({})),
        ];
        let results = registry.dispatch_batch(&calls, None).await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(results[0].ok);
        assert!(!results[1].ok);
        assert_eq!(results[1].payload, json!({"error": "Tool call failed: boom"}));
        assert_eq!(results[2].payload, json!({"third": true}));
    }

    #[tokio::test]
    async fn test_unlisted_tools_share_a_metric_label() {
        let recorder = Arc::new(LabelRecorder::default());
        let registry = ToolRegistry::with_builtin_catalog(Arc::new(RecordingServer::default()))
            .unwrap()
            .with_telemetry(recorder.clone());

        let calls = vec![
            call("c1", "list_datasources", json!({})),
            call("c2", "made_up_tool_7f3a", json!({})),
            call("c3", "another_invention", json!({})),
        ];
        registry.dispatch_batch(&calls, None).await;

        assert_eq!(
            *recorder.tools.lock().unwrap(),
            vec!["list_datasources", "other", "other"]
        );
    }
}
