use std::sync::Arc;

use llmbridge::mcp::McpClient;
use llmbridge::orchestrator::Orchestrator;
use llmbridge::providers::ollama::OllamaProvider;
use llmbridge::registry::{builtin_catalog, load_catalog, ToolRegistry};
use llmbridge::telemetry::Telemetry;

use crate::configuration::Settings;
use crate::metrics::Metrics;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<ToolRegistry>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(settings: &Settings, metrics: Arc<Metrics>) -> anyhow::Result<Self> {
        let telemetry: Arc<dyn Telemetry> = metrics.clone();

        let tools = match &settings.mcp.catalog_path {
            Some(path) => load_catalog(path)?,
            None => builtin_catalog(),
        };
        let client = McpClient::new(settings.mcp.client_config())?;
        let registry = Arc::new(
            ToolRegistry::new(tools, Arc::new(client))?.with_telemetry(telemetry.clone()),
        );
        tracing::info!(
            tools = registry.list().len(),
            endpoint = %settings.mcp.url,
            "Tool catalog loaded"
        );

        let provider = OllamaProvider::new(settings.llm.provider_config())?;
        let orchestrator = Orchestrator::new(
            Arc::new(provider),
            registry.clone(),
            settings.orchestrator_config(),
        )?
        .with_telemetry(telemetry);

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            registry,
            metrics,
        })
    }
}
