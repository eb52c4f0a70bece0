use crate::state::AppState;
use axum::{
    body::Body,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{
    stream::{BoxStream, StreamExt},
    Stream,
};
use http::{header, HeaderMap, HeaderValue, StatusCode};
use llmbridge::{
    inbound::parse_inbound,
    models::request::ChatRequest,
    render::{render_final, ResponseMeta, SseRenderer},
    telemetry::Telemetry,
};
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Server-sent event body fed by the task driving the orchestrator
pub struct SseResponse {
    rx: ReceiverStream<Bytes>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<Bytes>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx).map(|opt| opt.map(Ok))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from_stream(self));
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        response
    }
}

/// The caller's bearer token, forwarded to the tool server in place of the configured one
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let request = match parse_inbound(&body) {
        Ok(request) => request.with_api_key_override(bearer_token(&headers)),
        Err(err) => {
            tracing::warn!(error = %err, "Rejecting malformed request");
            state.metrics.failure(err.kind());
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let meta = ResponseMeta::new(state.orchestrator.model_for(&request));
    if request.stream {
        return stream_reply(state, request, meta).into_response();
    }

    let result = match state.orchestrator.run(&request).await {
        Ok(outcome) => outcome.into_text().await,
        Err(err) => Err(err),
    };
    match result {
        Ok(text) => Json(render_final(&text, &meta)).into_response(),
        Err(err) => {
            tracing::error!(error = %err, kind = err.kind(), "Chat completion failed");
            let status = if err.is_client_error() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            error_response(status, err.to_string())
        }
    }
}

/// The role chunk goes out before the orchestrator starts. Once it resolves, frames are
/// pumped until the stream ends or the client goes away; in-flight tool calls are not
/// cancelled by a disconnect.
fn stream_reply(state: AppState, request: ChatRequest, meta: ResponseMeta) -> SseResponse {
    let (tx, rx) = mpsc::channel(100);
    let renderer = SseRenderer::new(meta);

    tokio::spawn(async move {
        if tx.send(renderer.role_frame()).await.is_err() {
            return;
        }

        let outcome = state.orchestrator.run(&request).await;
        pump_frames(tx, renderer.frames(outcome)).await;
    });

    SseResponse::new(ReceiverStream::new(rx))
}

/// Forward frames to the client. Returns false when the client went away first.
async fn pump_frames(tx: mpsc::Sender<Bytes>, mut frames: BoxStream<'static, Bytes>) -> bool {
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(frame) => {
                    if let Err(e) = tx.send(frame).await {
                        tracing::error!("Error sending frame through channel: {}", e);
                        return false;
                    }
                }
                None => return true,
            },
            _ = tx.closed() => {
                tracing::info!("Client disconnected, abandoning stream");
                return false;
            }
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(handler))
        .with_state(state)
}
