use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OllamaProviderConfig {
    pub host: String,
    /// Sent as a bearer token, for backends behind an authenticating proxy
    pub api_key: Option<String>,
    /// Bound on a single-shot call, and on the gap between two stream chunks
    pub timeout: Duration,
}
