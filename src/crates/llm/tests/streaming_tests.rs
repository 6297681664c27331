//! Streaming contract tests: adapters over a canned-frame transport.
//!
//! For every adapter: every TEXT_START has a matching TEXT_END with the
//! same ID, concatenated deltas equal the FINISH message content, and
//! FINISH appears exactly once, last.

use async_trait::async_trait;
use futures::StreamExt;
use llm::{
    AnthropicProvider, ChatCompletionsProvider, GeminiProvider, HttpResponse, HttpTransport,
    Message, OpenAiProvider, Provider, ProviderConfig, Request, SseFrame, StreamEvent,
};
use llm::transport::{SseStream, TransportError};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Transport replaying canned SSE frames.
struct FrameTransport {
    frames: Vec<SseFrame>,
}

impl FrameTransport {
    fn new(frames: Vec<(&str, Value)>) -> Arc<Self> {
        Arc::new(Self {
            frames: frames
                .into_iter()
                .map(|(event, data)| SseFrame {
                    event: event.to_string(),
                    data: data.to_string(),
                })
                .collect(),
        })
    }

    fn done(frames: Vec<(&str, Value)>, with_done_sentinel: bool) -> Arc<Self> {
        let mut transport = Self {
            frames: frames
                .into_iter()
                .map(|(event, data)| SseFrame {
                    event: event.to_string(),
                    data: data.to_string(),
                })
                .collect(),
        };
        if with_done_sentinel {
            transport.frames.push(SseFrame {
                event: String::new(),
                data: "[DONE]".to_string(),
            });
        }
        Arc::new(transport)
    }
}

#[async_trait]
impl HttpTransport for FrameTransport {
    async fn post_json(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        _body: Value,
    ) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: 200,
            headers: HashMap::new(),
            body: "{}".to_string(),
        })
    }

    async fn post_sse(
        &self,
        _url: &str,
        _headers: &[(String, String)],
        _body: Value,
    ) -> Result<SseStream, TransportError> {
        let frames: Vec<Result<SseFrame, TransportError>> =
            self.frames.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(frames)))
    }
}

async fn collect(provider: &dyn Provider) -> Vec<StreamEvent> {
    let request = Request::new("m").push_message(Message::user("hi"));
    let mut stream = provider.stream(request).await.unwrap();
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event.unwrap());
    }
    events
}

/// Shared invariant checks.
fn assert_stream_contract(events: &[StreamEvent]) {
    assert!(matches!(events.first(), Some(StreamEvent::StreamStart)));

    // FINISH exactly once and last.
    let finish_positions: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, StreamEvent::Finish { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(finish_positions.len(), 1, "exactly one FINISH");
    assert_eq!(finish_positions[0], events.len() - 1, "FINISH is last");

    // Matched start/end per text ID.
    let starts: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextStart { id } => Some(id),
            _ => None,
        })
        .collect();
    for id in &starts {
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::TextEnd { id: end } if end == *id)),
            "text block {id} not closed"
        );
    }

    // Tool-call start/end matched by call ID.
    let call_starts: Vec<&String> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ToolCallStart { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    for id in &call_starts {
        assert!(
            events
                .iter()
                .any(|e| matches!(e, StreamEvent::ToolCallEnd { id: end } if end == *id)),
            "tool call {id} not closed"
        );
    }
}

fn streamed_text(events: &[StreamEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

fn finish_response(events: &[StreamEvent]) -> &llm::Response {
    match events.last().unwrap() {
        StreamEvent::Finish { response } => response,
        other => panic!("expected finish, got {other:?}"),
    }
}

#[tokio::test]
async fn anthropic_stream_contract() {
    let transport = FrameTransport::new(vec![
        (
            "message_start",
            json!({"type": "message_start", "message": {"id": "msg_1", "usage": {"input_tokens": 3}}}),
        ),
        (
            "content_block_start",
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "str"}}),
        ),
        (
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "eamed"}}),
        ),
        (
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 0}),
        ),
        (
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 2}}),
        ),
        ("message_stop", json!({"type": "message_stop"})),
    ]);
    let provider = AnthropicProvider::with_transport(
        ProviderConfig::new("k", "https://api.anthropic.test"),
        transport,
    );
    let events = collect(&provider).await;

    assert_stream_contract(&events);
    let finish = finish_response(&events);
    assert_eq!(streamed_text(&events), finish.text());
    assert_eq!(finish.text(), "streamed");
    assert_eq!(finish.usage.input_tokens, 3);
    assert_eq!(finish.usage.output_tokens, 2);
}

#[tokio::test]
async fn openai_stream_contract() {
    let transport = FrameTransport::new(vec![
        (
            "response.output_item.added",
            json!({"type": "response.output_item.added", "output_index": 0,
                "item": {"type": "message", "id": "msg_a"}}),
        ),
        (
            "response.output_text.delta",
            json!({"type": "response.output_text.delta", "item_id": "msg_a", "delta": "par"}),
        ),
        (
            "response.output_text.delta",
            json!({"type": "response.output_text.delta", "item_id": "msg_a", "delta": "tial"}),
        ),
        (
            "response.output_item.done",
            json!({"type": "response.output_item.done", "output_index": 0,
                "item": {"type": "message", "id": "msg_a"}}),
        ),
        (
            "response.completed",
            json!({"type": "response.completed", "response": {
                "id": "resp_1", "model": "m", "status": "completed",
                "usage": {"input_tokens": 4, "output_tokens": 6}}}),
        ),
    ]);
    let provider = OpenAiProvider::with_transport(
        ProviderConfig::new("k", "https://api.openai.test"),
        transport,
    );
    let events = collect(&provider).await;

    assert_stream_contract(&events);
    let finish = finish_response(&events);
    assert_eq!(streamed_text(&events), finish.text());
    assert_eq!(finish.text(), "partial");
    assert_eq!(finish.usage.output_tokens, 6);
}

#[tokio::test]
async fn gemini_stream_contract() {
    let transport = FrameTransport::new(vec![
        (
            "",
            json!({"candidates": [{"content": {"parts": [{"text": "chunk one "}]}}]}),
        ),
        (
            "",
            json!({"candidates": [{"content": {"parts": [{"text": "chunk two"}]},
                "finishReason": "STOP"}],
                "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 4}}),
        ),
    ]);
    let provider = GeminiProvider::with_transport(
        ProviderConfig::new("k", "https://gemini.test"),
        transport,
    );
    let events = collect(&provider).await;

    assert_stream_contract(&events);
    let finish = finish_response(&events);
    assert_eq!(streamed_text(&events), finish.text());
    assert_eq!(finish.text(), "chunk one chunk two");
    assert_eq!(finish.usage.input_tokens, 9);
}

#[tokio::test]
async fn chat_stream_contract_with_done_sentinel() {
    let transport = FrameTransport::done(
        vec![
            (
                "",
                json!({"id": "c1", "model": "m", "choices": [{"delta": {"content": "fall"}}]}),
            ),
            (
                "",
                json!({"choices": [{"delta": {"content": "back"}, "finish_reason": "stop"}]}),
            ),
            (
                "",
                json!({"choices": [], "usage": {"prompt_tokens": 2, "completion_tokens": 5}}),
            ),
        ],
        true,
    );
    let provider = ChatCompletionsProvider::with_transport(
        "compat",
        ProviderConfig::new("k", "https://chat.test"),
        transport,
    );
    let events = collect(&provider).await;

    assert_stream_contract(&events);
    let finish = finish_response(&events);
    assert_eq!(streamed_text(&events), finish.text());
    assert_eq!(finish.text(), "fallback");
    assert_eq!(finish.provider, "compat");
    assert_eq!(finish.usage.output_tokens, 5);
}

#[tokio::test]
async fn interrupted_stream_surfaces_error() {
    // No message_stop: the anthropic stream must end with a stream error.
    let transport = FrameTransport::new(vec![(
        "content_block_start",
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text"}}),
    )]);
    let provider = AnthropicProvider::with_transport(
        ProviderConfig::new("k", "https://api.anthropic.test"),
        transport,
    );
    let mut stream = provider
        .stream(Request::new("m").push_message(Message::user("hi")))
        .await
        .unwrap();
    let mut saw_error = false;
    while let Some(event) = stream.next().await {
        if event.is_err() {
            saw_error = true;
        }
    }
    assert!(saw_error, "expected a stream-interruption error");
}
