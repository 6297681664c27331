//! Chat-completions fallback adapter for third-party endpoints.
//!
//! The lowest-common-denominator wire shape: messages stay in a `messages`
//! array with the native `system` role preserved, tools use the non-strict
//! function-definition shape, and `finish_reason` maps one-to-one. This
//! adapter never emits reasoning or instructions fields.

use crate::client::{EventStream, Provider, StructuredOutputMode};
use crate::config::ProviderConfig;
use crate::error::{from_transport, LlmError, Result};
use crate::transport::{HttpTransport, ReqwestTransport, SseFrame};
use crate::types::{
    ContentPart, FinishReason, Message, Request, Response, ResponseFormat, Role, StreamEvent,
    ToolChoice, Usage,
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Chat-completions fallback adapter. The name it registers under is
/// configurable so several third-party endpoints can coexist.
pub struct ChatCompletionsProvider {
    name: String,
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl ChatCompletionsProvider {
    /// Create an adapter with the production transport.
    pub fn new(name: impl Into<String>, config: ProviderConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self::with_transport(name, config, Arc::new(transport)))
    }

    /// Create an adapter over an injected transport (tests).
    pub fn with_transport(
        name: impl Into<String>,
        config: ProviderConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            transport,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.trimmed_base_url()
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![(
            "authorization".to_string(),
            format!("Bearer {}", self.config.api_key),
        )]
    }

    fn model_for(&self, request: &Request) -> String {
        if request.model.is_empty() {
            self.config.default_model.clone().unwrap_or_default()
        } else {
            request.model.clone()
        }
    }

    /// Translate a unified request into the wire body.
    pub(crate) fn build_request(&self, request: &Request, streaming: bool) -> Result<Value> {
        let mut messages: Vec<Value> = Vec::new();
        for message in &request.messages {
            match message.role {
                Role::System | Role::Developer => {
                    messages.push(json!({"role": "system", "content": message.text()}));
                }
                Role::User => {
                    messages.push(json!({"role": "user", "content": message.text()}));
                }
                Role::Assistant => {
                    let mut wire = Map::new();
                    wire.insert("role".into(), json!("assistant"));
                    let text = message.text();
                    wire.insert(
                        "content".into(),
                        if text.is_empty() { Value::Null } else { json!(text) },
                    );
                    let tool_calls: Vec<Value> = message
                        .tool_calls()
                        .into_iter()
                        .map(|(id, name, arguments)| {
                            json!({
                                "id": id,
                                "type": "function",
                                "function": {
                                    "name": name,
                                    "arguments": arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    if !tool_calls.is_empty() {
                        wire.insert("tool_calls".into(), json!(tool_calls));
                    }
                    messages.push(Value::Object(wire));
                }
                Role::Tool => {
                    for part in &message.content {
                        if let ContentPart::ToolResult {
                            call_id, content, ..
                        } = part
                        {
                            let content = match content {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            messages.push(json!({
                                "role": "tool",
                                "tool_call_id": call_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(self.model_for(request)));
        body.insert("messages".into(), json!(messages));
        if streaming {
            body.insert("stream".into(), json!(true));
            body.insert("stream_options".into(), json!({"include_usage": true}));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if !request.stop_sequences.is_empty() {
            body.insert("stop".into(), json!(request.stop_sequences));
        }
        if matches!(request.response_format, Some(ResponseFormat::JsonObject))
            || matches!(
                request.response_format,
                Some(ResponseFormat::JsonSchema { .. })
            )
        {
            body.insert("response_format".into(), json!({"type": "json_object"}));
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body.insert("tools".into(), json!(tools));
            match &request.tool_choice {
                Some(ToolChoice::Auto) | None => {}
                Some(ToolChoice::None) => {
                    body.insert("tool_choice".into(), json!("none"));
                }
                Some(ToolChoice::Required) => {
                    body.insert("tool_choice".into(), json!("required"));
                }
                Some(ToolChoice::Named(name)) => {
                    body.insert(
                        "tool_choice".into(),
                        json!({"type": "function", "function": {"name": name}}),
                    );
                }
            }
        }

        if let Some(Value::Object(extra)) = &request.provider_options {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(body))
    }

    /// Translate a wire response body into the unified response.
    pub(crate) fn parse_response(&self, body: &str) -> Result<Response> {
        let raw: Value = serde_json::from_str(body)?;
        let choice = raw.pointer("/choices/0").cloned().unwrap_or_else(|| json!({}));
        let message = choice.get("message").cloned().unwrap_or_else(|| json!({}));

        let mut parts = Vec::new();
        if let Some(text) = message.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                parts.push(ContentPart::Text {
                    text: text.to_string(),
                });
            }
        }
        for call in message
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| json!({})))
                .unwrap_or_else(|| json!({}));
            parts.push(ContentPart::ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            });
        }

        let raw_finish = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Response {
            id: raw
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: raw
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            provider: self.name.clone(),
            message: Message::with_parts(Role::Assistant, parts),
            finish_reason: map_finish(raw_finish.as_deref()),
            raw_finish_reason: raw_finish,
            usage: parse_usage(raw.get("usage")),
            warnings: Vec::new(),
            rate_limit: None,
            raw_body: Some(raw),
        })
    }
}

/// `finish_reason` maps one-to-one.
fn map_finish(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        None => FinishReason::Other,
        Some(_) => FinishReason::Other,
    }
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let read = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: read("prompt_tokens"),
        output_tokens: read("completion_tokens"),
        reasoning_tokens: 0,
        cache_read_tokens: 0,
        cache_write_tokens: 0,
    }
}

#[async_trait]
impl Provider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: Request) -> Result<Response> {
        let body = self.build_request(&request, false)?;
        let response = self
            .transport
            .post_json(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport(&self.name, e))?;
        self.parse_response(&response.body)
    }

    async fn stream(&self, request: Request) -> Result<EventStream> {
        let body = self.build_request(&request, true)?;
        let mut frames = self
            .transport
            .post_sse(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport(&self.name, e))?;

        let provider_name = self.name.clone();
        let events = stream! {
            yield Ok(StreamEvent::StreamStart);
            let mut assembler = StreamAssembler::new(provider_name);
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => {
                        if frame.data.trim() == "[DONE]" {
                            break;
                        }
                        for event in assembler.handle_frame(&frame) {
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        yield Err(from_transport(&assembler.provider, err));
                        return;
                    }
                }
            }
            for event in assembler.finish() {
                yield Ok(event);
            }
        };
        Ok(Box::pin(events))
    }

    fn structured_output_mode(&self) -> StructuredOutputMode {
        StructuredOutputMode::JsonSchema
    }
}

// ---------------------------------------------------------------------------
// Streaming assembly (single text + index-keyed tool calls)
// ---------------------------------------------------------------------------

struct ToolCallBuilder {
    id: String,
    name: String,
    raw_json: String,
    started: bool,
}

/// SSE → [`StreamEvent`] machine for chat-completions chunks.
pub(crate) struct StreamAssembler {
    provider: String,
    response_id: String,
    model: String,
    text: String,
    text_open: bool,
    tool_calls: BTreeMap<u64, ToolCallBuilder>,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamAssembler {
    pub(crate) fn new(provider: String) -> Self {
        Self {
            provider,
            response_id: String::new(),
            model: String::new(),
            text: String::new(),
            text_open: false,
            tool_calls: BTreeMap::new(),
            finish_reason: None,
            usage: Usage::default(),
        }
    }

    pub(crate) fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamEvent> {
        let data: Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        let mut events = Vec::new();

        if let Some(id) = data.get("id").and_then(Value::as_str) {
            self.response_id = id.to_string();
        }
        if let Some(model) = data.get("model").and_then(Value::as_str) {
            self.model = model.to_string();
        }
        if let Some(usage) = data.get("usage") {
            if !usage.is_null() {
                self.usage = parse_usage(Some(usage));
            }
        }

        let Some(choice) = data.pointer("/choices/0") else {
            return events;
        };
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }
        let Some(delta) = choice.get("delta") else {
            return events;
        };

        if let Some(chunk) = delta.get("content").and_then(Value::as_str) {
            if !chunk.is_empty() {
                if !self.text_open {
                    self.text_open = true;
                    events.push(StreamEvent::TextStart {
                        id: "text_0".to_string(),
                    });
                }
                self.text.push_str(chunk);
                events.push(StreamEvent::TextDelta {
                    id: "text_0".to_string(),
                    delta: chunk.to_string(),
                });
            }
        }

        for call in delta
            .get("tool_calls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
            let builder = self.tool_calls.entry(index).or_insert_with(|| ToolCallBuilder {
                id: String::new(),
                name: String::new(),
                raw_json: String::new(),
                started: false,
            });
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                builder.id = id.to_string();
            }
            if let Some(name) = call.pointer("/function/name").and_then(Value::as_str) {
                builder.name.push_str(name);
            }
            if !builder.started && !builder.id.is_empty() {
                builder.started = true;
                events.push(StreamEvent::ToolCallStart {
                    id: builder.id.clone(),
                    name: builder.name.clone(),
                });
            }
            if let Some(chunk) = call.pointer("/function/arguments").and_then(Value::as_str) {
                if !chunk.is_empty() {
                    builder.raw_json.push_str(chunk);
                    events.push(StreamEvent::ToolCallDelta {
                        id: builder.id.clone(),
                        arguments_delta: chunk.to_string(),
                    });
                }
            }
        }
        events
    }

    /// Close open blocks and emit the terminal FINISH.
    pub(crate) fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.text_open {
            events.push(StreamEvent::TextEnd {
                id: "text_0".to_string(),
            });
        }
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(ContentPart::Text {
                text: std::mem::take(&mut self.text),
            });
        }
        for (_, builder) in std::mem::take(&mut self.tool_calls) {
            events.push(StreamEvent::ToolCallEnd {
                id: builder.id.clone(),
            });
            let arguments =
                serde_json::from_str(&builder.raw_json).unwrap_or_else(|_| json!({}));
            parts.push(ContentPart::ToolCall {
                id: builder.id,
                name: builder.name,
                arguments,
            });
        }
        events.push(StreamEvent::Finish {
            response: Box::new(Response {
                id: self.response_id.clone(),
                model: self.model.clone(),
                provider: self.provider.clone(),
                message: Message::with_parts(Role::Assistant, parts),
                finish_reason: map_finish(self.finish_reason.as_deref()),
                raw_finish_reason: self.finish_reason.clone(),
                usage: self.usage,
                warnings: Vec::new(),
                rate_limit: None,
                raw_body: None,
            }),
        });
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tool;

    fn provider() -> ChatCompletionsProvider {
        ChatCompletionsProvider::with_transport(
            "openrouter",
            ProviderConfig::new("k", "https://chat.test"),
            Arc::new(super::super::test_support::PanicTransport),
        )
    }

    #[test]
    fn test_system_role_preserved_and_no_reasoning_fields() {
        let request = Request::new("m")
            .with_messages(vec![Message::system("S"), Message::user("U")])
            .with_reasoning_effort("high");
        let body = provider().build_request(&request, false).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], json!("system"));
        assert_eq!(messages[0]["content"], json!("S"));
        // Never emitted by the fallback adapter.
        assert!(body.get("reasoning").is_none());
        assert!(body.get("instructions").is_none());
    }

    #[test]
    fn test_tools_use_non_strict_function_shape() {
        let request = Request::new("m")
            .with_messages(vec![Message::user("hi")])
            .with_tools(vec![Tool::new("f", "d", json!({"type": "object"}))])
            .with_tool_choice(ToolChoice::Named("f".into()));
        let body = provider().build_request(&request, false).unwrap();
        let tool = &body["tools"][0];
        assert_eq!(tool["type"], json!("function"));
        assert_eq!(tool["function"]["name"], json!("f"));
        assert!(tool["function"].get("strict").is_none());
        assert!(tool.get("strict").is_none());
        assert_eq!(
            body["tool_choice"],
            json!({"type": "function", "function": {"name": "f"}})
        );
    }

    #[test]
    fn test_assistant_tool_calls_and_tool_role() {
        let request = Request::new("m").with_messages(vec![
            Message::user("go"),
            Message::with_parts(
                Role::Assistant,
                vec![ContentPart::ToolCall {
                    id: "call_7".into(),
                    name: "run".into(),
                    arguments: json!({"k": true}),
                }],
            ),
            Message::tool_result("call_7", json!("output text"), false),
        ]);
        let body = provider().build_request(&request, false).unwrap();
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(
            messages[1]["tool_calls"][0]["function"]["arguments"],
            json!("{\"k\":true}")
        );
        assert_eq!(messages[2]["role"], json!("tool"));
        assert_eq!(messages[2]["tool_call_id"], json!("call_7"));
    }

    #[test]
    fn test_finish_reason_maps_one_to_one() {
        for (wire, expected) in [
            ("stop", FinishReason::Stop),
            ("length", FinishReason::Length),
            ("tool_calls", FinishReason::ToolCalls),
            ("content_filter", FinishReason::ContentFilter),
            ("weird", FinishReason::Other),
        ] {
            let body = json!({
                "id": "c1", "model": "m",
                "choices": [{"message": {"content": "x"}, "finish_reason": wire}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 2},
            })
            .to_string();
            let response = provider().parse_response(&body).unwrap();
            assert_eq!(response.finish_reason, expected, "for {wire}");
        }
    }

    fn frame(data: Value) -> SseFrame {
        SseFrame {
            event: String::new(),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_stream_assembly_with_usage_chunk() {
        let mut assembler = StreamAssembler::new("openrouter".into());
        let frames = vec![
            frame(json!({"id": "c1", "model": "m",
                "choices": [{"delta": {"content": "Hi "}}]})),
            frame(json!({"choices": [{"delta": {"content": "there"}}]})),
            frame(json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "call_1",
                "function": {"name": "run", "arguments": "{\"z\":"}}]}}]})),
            frame(json!({"choices": [{"delta": {"tool_calls": [{"index": 0,
                "function": {"arguments": "9}"}}]}, "finish_reason": "tool_calls"}]})),
            frame(json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 3}})),
        ];
        let mut events = Vec::new();
        for f in &frames {
            events.extend(assembler.handle_frame(f));
        }
        events.extend(assembler.finish());

        let text: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { delta, .. } => Some(delta.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Hi there");

        let finish = match events.last().unwrap() {
            StreamEvent::Finish { response } => response,
            other => panic!("expected finish, got {other:?}"),
        };
        assert_eq!(finish.finish_reason, FinishReason::ToolCalls);
        assert_eq!(finish.tool_calls()[0].2, &json!({"z": 9}));
        assert_eq!(finish.usage.input_tokens, 7);
        assert_eq!(finish.usage.output_tokens, 3);
    }
}
