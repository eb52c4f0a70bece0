pub mod errors;
pub mod inbound;
pub mod mcp;
pub mod models;
pub mod orchestrator;
pub mod prompt_template;
pub mod providers;
pub mod registry;
pub mod render;
pub mod telemetry;
