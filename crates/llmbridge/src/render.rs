//! OpenAI-compatible output: one completion object, or a server-sent event stream.
//!
//! A stream is always a role chunk, zero or more content deltas, a finish chunk and the
//! `[DONE]` terminator, in that order, including when the pipeline failed.
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::BridgeResult;
use crate::orchestrator::Outcome;

pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMeta {
    pub id: String,
    pub model: String,
    pub created: i64,
}

impl ResponseMeta {
    pub fn new<S: Into<String>>(model: S) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: model.into(),
            created: Utc::now().timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: CompletionMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Serialize)]
struct ChunkFrame<'a> {
    id: &'a str,
    object: &'static str,
    created: i64,
    model: &'a str,
    choices: [ChunkChoice<'a>; 1],
}

#[derive(Serialize)]
struct ChunkChoice<'a> {
    index: u32,
    delta: Delta<'a>,
    finish_reason: Option<&'static str>,
}

#[derive(Default, Serialize)]
struct Delta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
}

pub fn render_final(text: &str, meta: &ResponseMeta) -> ChatCompletion {
    ChatCompletion {
        id: meta.id.clone(),
        object: "chat.completion",
        created: meta.created,
        model: meta.model.clone(),
        choices: vec![CompletionChoice {
            index: 0,
            message: CompletionMessage {
                role: "assistant",
                content: text.to_string(),
            },
            finish_reason: "stop",
        }],
        usage: Map::new(),
    }
}

/// One SSE frame: the role chunk when `text` is `None`, a content delta otherwise,
/// or the finish chunk followed by the terminator when `done` is set.
pub fn render_chunk(text: Option<&str>, meta: &ResponseMeta, done: bool) -> Bytes {
    if done {
        let mut frame = chunk_frame(meta, Delta::default(), Some("stop"));
        frame.push_str(DONE_FRAME);
        return Bytes::from(frame);
    }

    let delta = match text {
        Some(content) => Delta {
            role: None,
            content: Some(content),
        },
        None => Delta {
            role: Some("assistant"),
            content: None,
        },
    };
    Bytes::from(chunk_frame(meta, delta, None))
}

fn chunk_frame(meta: &ResponseMeta, delta: Delta<'_>, finish_reason: Option<&'static str>) -> String {
    let frame = ChunkFrame {
        id: &meta.id,
        object: "chat.completion.chunk",
        created: meta.created,
        model: &meta.model,
        choices: [ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };
    // Serializing plain structs of strings and integers cannot fail
    let json = serde_json::to_string(&frame).unwrap_or_default();
    format!("data: {}\n\n", json)
}

/// Produces the frames of one streamed reply
#[derive(Debug, Clone)]
pub struct SseRenderer {
    meta: ResponseMeta,
}

impl SseRenderer {
    pub fn new(meta: ResponseMeta) -> Self {
        Self { meta }
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    pub fn role_frame(&self) -> Bytes {
        render_chunk(None, &self.meta, false)
    }

    pub fn delta_frame(&self, text: &str) -> Bytes {
        render_chunk(Some(text), &self.meta, false)
    }

    pub fn finish_frame(&self) -> Bytes {
        render_chunk(None, &self.meta, true)
    }

    /// Everything after the role chunk. A failure, before or during streaming, becomes a
    /// single error delta and the stream still finishes normally.
    pub fn frames(self, outcome: BridgeResult<Outcome>) -> BoxStream<'static, Bytes> {
        let stream = async_stream::stream! {
            match outcome {
                Ok(Outcome::FinalText(text)) => {
                    yield self.delta_frame(&text);
                }
                Ok(Outcome::Deltas(mut deltas)) => {
                    while let Some(delta) = deltas.next().await {
                        match delta {
                            Ok(text) => yield self.delta_frame(&text),
                            Err(err) => {
                                tracing::error!(error = %err, "LLM stream failed");
                                yield self.delta_frame(&format!("Error: {}", err));
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    yield self.delta_frame(&format!("Error: {}", err));
                }
            }
            yield self.finish_frame();
        };
        stream.boxed()
    }
}

/// The complete frame sequence for one reply, role chunk included
pub fn render_stream(meta: ResponseMeta, outcome: BridgeResult<Outcome>) -> BoxStream<'static, Bytes> {
    let renderer = SseRenderer::new(meta);
    let role = renderer.role_frame();
    futures::stream::once(async move { role })
        .chain(renderer.frames(outcome))
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BridgeError;
    use serde_json::json;

    fn meta() -> ResponseMeta {
        ResponseMeta {
            id: "chatcmpl-1".into(),
            model: "qwen2.5".into(),
            created: 1700000000,
        }
    }

    fn frame_json(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let payload = text
            .strip_prefix("data: ")
            .and_then(|t| t.split("\n\n").next())
            .unwrap();
        serde_json::from_str(payload).unwrap()
    }

    async fn collect(stream: BoxStream<'static, Bytes>) -> Vec<Bytes> {
        stream.collect().await
    }

    #[test]
    fn test_render_final_shape() {
        let completion = render_final("Lorem ipsum dolor sit amet", &meta());
        assert_eq!(
            serde_json::to_value(&completion).unwrap(),
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1700000000,
                "model": "qwen2.5",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Lorem ipsum dolor sit amet"},
                    "finish_reason": "stop"
                }],
                "usage": {}
            })
        );
    }

    #[test]
    fn test_role_chunk_bytes() {
        let frame = render_chunk(None, &meta(), false);
        assert_eq!(
            std::str::from_utf8(&frame).unwrap(),
            "data: {\"id\":\"chatcmpl-1\",\"object\":\"chat.completion.chunk\",\"created\":1700000000,\"model\":\"qwen2.5\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n"
        );
    }

    #[test]
    fn test_finish_chunk_is_followed_by_done() {
        let frame = render_chunk(None, &meta(), true);
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.ends_with("\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n"));
        assert_eq!(frame_json(&frame)["choices"][0]["delta"], json!({}));
    }

    #[tokio::test]
    async fn test_stream_sequence_for_deltas() {
        let deltas: crate::providers::base::ContentStream =
            futures::stream::iter(vec![Ok("Hi".to_string()), Ok(" there".to_string())]).boxed();
        let frames = collect(render_stream(meta(), Ok(Outcome::Deltas(deltas)))).await;

        assert_eq!(frames.len(), 4);
        assert_eq!(frame_json(&frames[0])["choices"][0]["delta"], json!({"role": "assistant"}));
        assert_eq!(frame_json(&frames[1])["choices"][0]["delta"], json!({"content": "Hi"}));
        assert_eq!(frame_json(&frames[2])["choices"][0]["delta"], json!({"content": " there"}));
        assert_eq!(frame_json(&frames[3])["choices"][0]["finish_reason"], "stop");
        assert!(frames[3].ends_with(DONE_FRAME.as_bytes()));
    }

    #[tokio::test]
    async fn test_stream_terminates_on_pipeline_error() {
        let frames = collect(render_stream(
            meta(),
            Err(BridgeError::UpstreamLlm("connection refused".into())),
        ))
        .await;

        assert_eq!(frames.len(), 3);
        assert_eq!(
            frame_json(&frames[1])["choices"][0]["delta"]["content"],
            "Error: LLM backend error: connection refused"
        );
        assert!(frames[2].ends_with(DONE_FRAME.as_bytes()));
    }

    #[tokio::test]
    async fn test_stream_terminates_on_mid_stream_error() {
        let deltas: crate::providers::base::ContentStream = futures::stream::iter(vec![
            Ok("partial".to_string()),
            Err(anyhow::anyhow!("Stream stalled for more than 5s")),
            Ok("never sent".to_string()),
        ])
        .boxed();
        let frames = collect(render_stream(meta(), Ok(Outcome::Deltas(deltas)))).await;

        assert_eq!(frames.len(), 4);
        assert_eq!(
            frame_json(&frames[2])["choices"][0]["delta"]["content"],
            "Error: Stream stalled for more than 5s"
        );
        assert!(frames[3].ends_with(DONE_FRAME.as_bytes()));
    }
}
