use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use llmbridge::mcp::McpClientConfig;
use llmbridge::orchestrator::{
    OrchestratorConfig, LIST_TOOLS_COMMAND, TEST_REPLY, TEST_SENTINEL, TOOL_SENTINEL,
};
use llmbridge::providers::configs::OllamaProviderConfig;
use llmbridge::providers::ollama;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_host")]
    pub host: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub allow_model_override: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            host: default_llm_host(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout(),
            allow_model_override: false,
        }
    }
}

impl LlmSettings {
    pub fn provider_config(&self) -> OllamaProviderConfig {
        OllamaProviderConfig {
            host: self.host.clone(),
            api_key: self.api_key.clone().filter(|key| !key.is_empty()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct McpSettings {
    /// Required; checked after loading so the error names the env var
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
    /// JSON file replacing the built-in tool catalog
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            timeout_secs: default_mcp_timeout(),
            catalog_path: None,
        }
    }
}

impl McpSettings {
    pub fn client_config(&self) -> McpClientConfig {
        McpClientConfig {
            url: self.url.clone(),
            token: self.token.clone().filter(|token| !token.is_empty()),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModeSettings {
    #[serde(default = "default_test_sentinel")]
    pub test_sentinel: String,
    #[serde(default = "default_test_reply")]
    pub test_reply: String,
    #[serde(default = "default_tool_sentinel")]
    pub tool_sentinel: String,
    #[serde(default = "default_list_tools_command")]
    pub list_tools_command: String,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            test_sentinel: default_test_sentinel(),
            test_reply: default_test_reply(),
            tool_sentinel: default_tool_sentinel(),
            list_tools_command: default_list_tools_command(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub modes: ModeSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_model: self.llm.model.clone(),
            allow_model_override: self.llm.allow_model_override,
            test_sentinel: self.modes.test_sentinel.clone(),
            test_reply: self.modes.test_reply.clone(),
            tool_sentinel: self.modes.tool_sentinel.clone(),
            list_tools_command: self.modes.list_tools_command.clone(),
        }
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("llm.host", default_llm_host())?
            .set_default("llm.model", default_llm_model())?
            // An optional llmbridge.toml in the working directory
            .add_source(File::with_name("llmbridge").required(false))
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("LLMBRIDGE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        let settings = match result {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // "missing field `url`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    });
                } else if let config::ConfigError::NotFound(field) = &err {
                    return Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    });
                }
                return Err(ConfigError::Other(err));
            }
        };

        if settings.mcp.url.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("mcp.url"),
            });
        }

        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_llm_host() -> String {
    ollama::OLLAMA_HOST.to_string()
}

fn default_llm_model() -> String {
    ollama::OLLAMA_MODEL.to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_mcp_timeout() -> u64 {
    30
}

fn default_test_sentinel() -> String {
    TEST_SENTINEL.to_string()
}

fn default_test_reply() -> String {
    TEST_REPLY.to_string()
}

fn default_tool_sentinel() -> String {
    TOOL_SENTINEL.to_string()
}

fn default_list_tools_command() -> String {
    LIST_TOOLS_COMMAND.to_string()
}
