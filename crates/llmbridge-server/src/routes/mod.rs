pub mod completions;
pub mod health;

use crate::state::AppState;
use axum::Router;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(completions::routes(state.clone()))
        .merge(health::routes(state))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use wiremock::MockServer;

    use crate::configuration::Settings;
    use crate::metrics::Metrics;
    use crate::state::AppState;

    /// State wired to mock LLM and tool servers
    pub fn state_for(ollama: &MockServer, mcp: &MockServer) -> AppState {
        let mut settings = Settings::default();
        settings.llm.host = ollama.uri();
        settings.llm.timeout_secs = 5;
        settings.mcp.url = mcp.uri();
        settings.mcp.timeout_secs = 5;
        AppState::new(&settings, Arc::new(Metrics::new().unwrap())).unwrap()
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn body_text(response: axum::response::Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
