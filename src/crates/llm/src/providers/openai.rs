//! Responses-style adapter (OpenAI Responses API family).
//!
//! Wire contract highlights:
//! - `system`/`developer` text joins into a flat `instructions` string.
//! - Other messages become ordered input items: `message` items carrying
//!   `input_text`/`output_text` parts, standalone `function_call` items for
//!   tool calls, and `function_call_output` items keyed by call ID.
//! - Tool declarations set `strict: true`.
//! - Finish reason derives from status plus tool-call presence:
//!   tool_calls > (completed → stop) > (incomplete → length) > other.
//! - Reasoning and cached-input token counts surface from nested usage
//!   details into the unified usage.

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
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Responses-style provider adapter.
pub struct OpenAiProvider {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl OpenAiProvider {
    /// Create an adapter with the production transport.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout)
            .map_err(|e| LlmError::Config(e.to_string()))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create an adapter over an injected transport (tests).
    pub fn with_transport(config: ProviderConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    fn url(&self) -> String {
        format!("{}/v1/responses", self.config.trimmed_base_url())
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![(
            "authorization".to_string(),
            format!("Bearer {}", self.config.api_key),
        )];
        if let Some(org) = &self.config.organization {
            headers.push(("openai-organization".to_string(), org.clone()));
        }
        headers
    }

    fn model_for(&self, request: &Request) -> String {
        if request.model.is_empty() {
            self.config.default_model.clone().unwrap_or_default()
        } else {
            request.model.clone()
        }
    }

    /// Translate a unified request into the wire body.
    pub(crate) fn build_request(&self, request: &Request) -> Result<Value> {
        let mut instructions: Vec<String> = Vec::new();
        let mut input: Vec<Value> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System | Role::Developer => {
                    let text = message.text();
                    if !text.is_empty() {
                        instructions.push(text);
                    }
                }
                Role::User => {
                    input.push(json!({
                        "type": "message",
                        "role": "user",
                        "content": user_parts(&message.content)?,
                    }));
                }
                Role::Assistant => {
                    let mut text_parts: Vec<Value> = Vec::new();
                    for part in &message.content {
                        match part {
                            ContentPart::Text { text } => {
                                text_parts.push(json!({"type": "output_text", "text": text}));
                            }
                            ContentPart::ToolCall {
                                id,
                                name,
                                arguments,
                            } => {
                                input.push(json!({
                                    "type": "function_call",
                                    "call_id": id,
                                    "name": name,
                                    "arguments": arguments.to_string(),
                                }));
                            }
                            // Reasoning is not replayed to this API family.
                            ContentPart::Thinking { .. }
                            | ContentPart::RedactedThinking { .. } => {}
                            other => {
                                tracing::warn!(?other, "dropping unsupported assistant part");
                            }
                        }
                    }
                    if !text_parts.is_empty() {
                        input.push(json!({
                            "type": "message",
                            "role": "assistant",
                            "content": text_parts,
                        }));
                    }
                }
                Role::Tool => {
                    for part in &message.content {
                        if let ContentPart::ToolResult {
                            call_id, content, ..
                        } = part
                        {
                            let output = match content {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            input.push(json!({
                                "type": "function_call_output",
                                "call_id": call_id,
                                "output": output,
                            }));
                        }
                    }
                }
            }
        }

        let mut body = Map::new();
        body.insert("model".into(), json!(self.model_for(request)));
        body.insert("input".into(), json!(input));
        if !instructions.is_empty() {
            body.insert("instructions".into(), json!(instructions.join("\n")));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_output_tokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if let Some(effort) = request.reasoning_effort.as_deref() {
            body.insert("reasoning".into(), json!({"effort": effort}));
        }
        if let Some(ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        }) = &request.response_format
        {
            body.insert(
                "text".into(),
                json!({"format": {
                    "type": "json_schema",
                    "name": name,
                    "schema": schema,
                    "strict": strict,
                }}),
            );
        } else if let Some(ResponseFormat::JsonObject) = &request.response_format {
            body.insert("text".into(), json!({"format": {"type": "json_object"}}));
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                        "strict": true,
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
                        json!({"type": "function", "name": name}),
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
        let mut parts: Vec<ContentPart> = Vec::new();

        for item in raw.get("output").and_then(Value::as_array).into_iter().flatten() {
            match item.get("type").and_then(Value::as_str) {
                Some("message") => {
                    for part in item.get("content").and_then(Value::as_array).into_iter().flatten()
                    {
                        if part.get("type").and_then(Value::as_str) == Some("output_text") {
                            if let Some(text) = part.get("text").and_then(Value::as_str) {
                                parts.push(ContentPart::Text {
                                    text: text.to_string(),
                                });
                            }
                        }
                    }
                }
                Some("function_call") => {
                    let arguments = item
                        .get("arguments")
                        .and_then(Value::as_str)
                        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| json!({})))
                        .unwrap_or_else(|| json!({}));
                    parts.push(ContentPart::ToolCall {
                        id: item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        arguments,
                    });
                }
                _ => {}
            }
        }

        let status = raw.get("status").and_then(Value::as_str);
        let has_tool_calls = parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolCall { .. }));
        let finish_reason = derive_finish(status, has_tool_calls);
        let usage = parse_usage(raw.get("usage"));

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
            provider: "openai".to_string(),
            message: Message::with_parts(Role::Assistant, parts),
            finish_reason,
            raw_finish_reason: status.map(str::to_string),
            usage,
            warnings: Vec::new(),
            rate_limit: None,
            raw_body: Some(raw),
        })
    }
}

fn user_parts(parts: &[ContentPart]) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => out.push(json!({"type": "input_text", "text": text})),
            ContentPart::Image { url: Some(url), .. } => {
                out.push(json!({"type": "input_image", "image_url": url}));
            }
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => {
                let media_type = media_type.as_deref().unwrap_or("image/png");
                out.push(json!({
                    "type": "input_image",
                    "image_url": format!("data:{media_type};base64,{data}"),
                }));
            }
            other => {
                tracing::warn!(?other, "dropping unsupported user part");
            }
        }
    }
    Ok(out)
}

/// tool_calls > (completed → stop) > (incomplete → length) > other.
fn derive_finish(status: Option<&str>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match status {
        Some("completed") => FinishReason::Stop,
        Some("incomplete") => FinishReason::Length,
        _ => FinishReason::Other,
    }
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    Usage {
        input_tokens: usage
            .get("input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .get("output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        reasoning_tokens: usage
            .pointer("/output_tokens_details/reasoning_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cache_read_tokens: usage
            .pointer("/input_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        cache_write_tokens: 0,
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: Request) -> Result<Response> {
        let body = self.build_request(&request)?;
        let response = self
            .transport
            .post_json(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport("openai", e))?;
        self.parse_response(&response.body)
    }

    async fn stream(&self, request: Request) -> Result<EventStream> {
        let mut body = self.build_request(&request)?;
        body["stream"] = json!(true);
        let mut frames = self
            .transport
            .post_sse(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport("openai", e))?;

        let events = stream! {
            yield Ok(StreamEvent::StreamStart);
            let mut assembler = StreamAssembler::new();
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => {
                        for event in assembler.handle_frame(&frame) {
                            yield Ok(event);
                        }
                        if assembler.finished {
                            return;
                        }
                    }
                    Err(err) => {
                        yield Err(from_transport("openai", err));
                        return;
                    }
                }
            }
            if !assembler.finished {
                yield Err(LlmError::Stream {
                    provider: "openai".into(),
                    message: "stream ended before response.completed".into(),
                });
            }
        };
        Ok(Box::pin(events))
    }

    fn structured_output_mode(&self) -> StructuredOutputMode {
        StructuredOutputMode::JsonSchemaStrict
    }
}

// ---------------------------------------------------------------------------
// Streaming assembly (item-ID keyed)
// ---------------------------------------------------------------------------

enum ItemBuilder {
    Text { text: String },
    FunctionCall { call_id: String, raw_json: String },
}

/// SSE → [`StreamEvent`] state machine for the responses-style wire format.
pub(crate) struct StreamAssembler {
    items: HashMap<String, ItemBuilder>,
    parts: BTreeMap<u64, ContentPart>,
    pub(crate) finished: bool,
}

impl StreamAssembler {
    pub(crate) fn new() -> Self {
        Self {
            items: HashMap::new(),
            parts: BTreeMap::new(),
            finished: false,
        }
    }

    pub(crate) fn handle_frame(&mut self, frame: &SseFrame) -> Vec<StreamEvent> {
        let data: Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(_) => return Vec::new(),
        };
        let event_type = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(frame.event.as_str());

        match event_type {
            "response.output_item.added" => {
                let index = data.get("output_index").and_then(Value::as_u64).unwrap_or(0);
                let item = match data.get("item") {
                    Some(item) => item,
                    None => return Vec::new(),
                };
                let item_id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match item.get("type").and_then(Value::as_str) {
                    Some("message") => {
                        self.items
                            .insert(item_id.clone(), ItemBuilder::Text { text: String::new() });
                        // Reserve ordering for the eventual part.
                        self.parts.entry(index).or_insert(ContentPart::Text {
                            text: String::new(),
                        });
                        vec![StreamEvent::TextStart { id: item_id }]
                    }
                    Some("function_call") => {
                        let call_id = item
                            .get("call_id")
                            .and_then(Value::as_str)
                            .unwrap_or(item_id.as_str())
                            .to_string();
                        let name = item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        self.items.insert(
                            item_id,
                            ItemBuilder::FunctionCall {
                                call_id: call_id.clone(),
                                raw_json: String::new(),
                            },
                        );
                        self.parts.insert(
                            index,
                            ContentPart::ToolCall {
                                id: call_id.clone(),
                                name,
                                arguments: json!({}),
                            },
                        );
                        vec![StreamEvent::ToolCallStart { id: call_id, name: item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string() }]
                    }
                    _ => Vec::new(),
                }
            }
            "response.output_text.delta" => {
                let item_id = data
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let delta = data
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(ItemBuilder::Text { text }) = self.items.get_mut(&item_id) {
                    text.push_str(&delta);
                    return vec![StreamEvent::TextDelta { id: item_id, delta }];
                }
                Vec::new()
            }
            "response.function_call_arguments.delta" => {
                let item_id = data
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let delta = data
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(ItemBuilder::FunctionCall { call_id, raw_json }) =
                    self.items.get_mut(&item_id)
                {
                    raw_json.push_str(&delta);
                    return vec![StreamEvent::ToolCallDelta {
                        id: call_id.clone(),
                        arguments_delta: delta,
                    }];
                }
                Vec::new()
            }
            "response.output_item.done" => {
                let index = data.get("output_index").and_then(Value::as_u64).unwrap_or(0);
                let item = match data.get("item") {
                    Some(item) => item,
                    None => return Vec::new(),
                };
                let item_id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                match self.items.remove(&item_id) {
                    Some(ItemBuilder::Text { text }) => {
                        self.parts.insert(index, ContentPart::Text { text });
                        vec![StreamEvent::TextEnd { id: item_id }]
                    }
                    Some(ItemBuilder::FunctionCall { call_id, raw_json }) => {
                        let arguments =
                            serde_json::from_str(&raw_json).unwrap_or_else(|_| json!({}));
                        let name = item
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        self.parts.insert(
                            index,
                            ContentPart::ToolCall {
                                id: call_id.clone(),
                                name,
                                arguments,
                            },
                        );
                        vec![StreamEvent::ToolCallEnd { id: call_id }]
                    }
                    None => Vec::new(),
                }
            }
            "response.completed" => {
                self.finished = true;
                let raw_response = data.get("response").cloned().unwrap_or_else(|| json!({}));
                let parts: Vec<ContentPart> =
                    std::mem::take(&mut self.parts).into_values().collect();
                let has_tool_calls = parts
                    .iter()
                    .any(|p| matches!(p, ContentPart::ToolCall { .. }));
                let status = raw_response.get("status").and_then(Value::as_str);
                let response = Response {
                    id: raw_response
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    model: raw_response
                        .get("model")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    provider: "openai".to_string(),
                    message: Message::with_parts(Role::Assistant, parts),
                    finish_reason: derive_finish(status.or(Some("completed")), has_tool_calls),
                    raw_finish_reason: status.map(str::to_string),
                    usage: parse_usage(raw_response.get("usage")),
                    warnings: Vec::new(),
                    rate_limit: None,
                    raw_body: Some(raw_response),
                };
                vec![StreamEvent::Finish {
                    response: Box::new(response),
                }]
            }
            "response.failed" | "error" => {
                let message = data
                    .pointer("/response/error/message")
                    .or_else(|| data.pointer("/error/message"))
                    .and_then(Value::as_str)
                    .unwrap_or("provider stream error")
                    .to_string();
                vec![StreamEvent::Error { message }]
            }
            _ => Vec::new(),
        }
    }
}
