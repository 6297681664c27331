//! Messages-style adapter (Anthropic API family).
//!
//! Wire contract highlights:
//! - `system`/`developer` messages leave the message list and become the
//!   separate `system` parameter, with a cache hint on the last block.
//! - Remaining messages must alternate user/assistant; consecutive
//!   same-role messages are merged by concatenating their content blocks.
//! - `tool` role messages become `user` messages carrying `tool_result`
//!   blocks keyed by the original tool-call ID.
//! - `tool_use`, `thinking`, and `redacted_thinking` round-trip as native
//!   block types; redacted payloads are re-sent verbatim.
//! - A max-tokens value is always set (4096 when the caller omits it).

use crate::client::{EventStream, Provider, StructuredOutputMode};
use crate::config::ProviderConfig;
use crate::error::{from_transport, LlmError, Result};
use crate::transport::{HttpTransport, ReqwestTransport, SseFrame};
use crate::types::{
    ContentPart, FinishReason, Message, Request, Response, Role, StreamEvent, ToolChoice, Usage,
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages-style provider adapter.
pub struct AnthropicProvider {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl AnthropicProvider {
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
        format!("{}/v1/messages", self.config.trimmed_base_url())
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![
            ("x-api-key".to_string(), self.config.api_key.clone()),
            (
                "anthropic-version".to_string(),
                ANTHROPIC_VERSION.to_string(),
            ),
        ]
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
        let mut system_blocks: Vec<Value> = Vec::new();
        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System | Role::Developer => {
                    let text = message.text();
                    if !text.is_empty() {
                        system_blocks.push(json!({"type": "text", "text": text}));
                    }
                }
                Role::User => turns.push(("user", content_blocks(&message.content)?)),
                Role::Assistant => turns.push(("assistant", content_blocks(&message.content)?)),
                Role::Tool => {
                    // Tool results ride in a user turn.
                    turns.push(("user", content_blocks(&message.content)?));
                }
            }
        }

        // Strict alternation: merge consecutive same-role turns, preserving
        // block order.
        let mut merged: Vec<(&'static str, Vec<Value>)> = Vec::new();
        for (role, blocks) in turns {
            match merged.last_mut() {
                Some((last_role, last_blocks)) if *last_role == role => {
                    last_blocks.extend(blocks);
                }
                _ => merged.push((role, blocks)),
            }
        }

        if let Some(last) = system_blocks.last_mut() {
            attach_cache_hint(last);
        }

        let messages: Vec<Value> = merged
            .into_iter()
            .map(|(role, content)| json!({"role": role, "content": content}))
            .collect();

        let mut body = Map::new();
        body.insert("model".into(), json!(self.model_for(request)));
        body.insert(
            "max_tokens".into(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        body.insert("messages".into(), json!(messages));
        if !system_blocks.is_empty() {
            body.insert("system".into(), json!(system_blocks));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            body.insert("top_p".into(), json!(top_p));
        }
        if !request.stop_sequences.is_empty() {
            body.insert("stop_sequences".into(), json!(request.stop_sequences));
        }
        if let Some(effort) = request.reasoning_effort.as_deref() {
            body.insert("thinking".into(), thinking_config(effort));
        }

        // ToolChoice::None omits the tools array entirely.
        let omit_tools = matches!(request.tool_choice, Some(ToolChoice::None));
        if !request.tools.is_empty() && !omit_tools {
            let mut tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "input_schema": tool.parameters,
                    })
                })
                .collect();
            if let Some(last) = tools.last_mut() {
                attach_cache_hint(last);
            }
            body.insert("tools".into(), json!(tools));
            match &request.tool_choice {
                Some(ToolChoice::Auto) => {
                    body.insert("tool_choice".into(), json!({"type": "auto"}));
                }
                Some(ToolChoice::Required) => {
                    body.insert("tool_choice".into(), json!({"type": "any"}));
                }
                Some(ToolChoice::Named(name)) => {
                    body.insert("tool_choice".into(), json!({"type": "tool", "name": name}));
                }
                Some(ToolChoice::None) | None => {}
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
    pub(crate) fn parse_response(
        &self,
        body: &str,
        rate_limit: Option<HashMap<String, String>>,
    ) -> Result<Response> {
        let raw: Value = serde_json::from_str(body)?;
        let wire: WireResponse =
            serde_json::from_str(body).map_err(|e| LlmError::Serialization(e.to_string()))?;

        let mut parts = Vec::new();
        for block in wire.content {
            if let Some(part) = block.into_part() {
                parts.push(part);
            }
        }

        let finish_reason = map_stop_reason(wire.stop_reason.as_deref());
        Ok(Response {
            id: wire.id,
            model: wire.model,
            provider: "anthropic".to_string(),
            message: Message::with_parts(Role::Assistant, parts),
            finish_reason,
            raw_finish_reason: wire.stop_reason,
            usage: wire.usage.into_usage(),
            warnings: Vec::new(),
            rate_limit,
            raw_body: Some(raw),
        })
    }
}

fn attach_cache_hint(block: &mut Value) {
    if let Some(obj) = block.as_object_mut() {
        obj.insert("cache_control".into(), json!({"type": "ephemeral"}));
    }
}

fn thinking_config(effort: &str) -> Value {
    let budget = match effort {
        "low" => 1024,
        "medium" => 4096,
        _ => 16_384,
    };
    json!({"type": "enabled", "budget_tokens": budget})
}

fn content_blocks(parts: &[ContentPart]) -> Result<Vec<Value>> {
    let mut blocks = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => blocks.push(json!({"type": "text", "text": text})),
            ContentPart::Image {
                url: Some(url), ..
            } => blocks.push(json!({
                "type": "image",
                "source": {"type": "url", "url": url},
            })),
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => blocks.push(json!({
                "type": "image",
                "source": {
                    "type": "base64",
                    "media_type": media_type.as_deref().unwrap_or("image/png"),
                    "data": data,
                },
            })),
            ContentPart::Image { .. } => {
                return Err(LlmError::Config(
                    "image part has neither url nor data".into(),
                ))
            }
            ContentPart::Document {
                data,
                media_type,
                name,
            } => {
                let mut block = json!({
                    "type": "document",
                    "source": {"type": "base64", "media_type": media_type, "data": data},
                });
                if let Some(name) = name {
                    block["title"] = json!(name);
                }
                blocks.push(block);
            }
            ContentPart::Audio { .. } => {
                tracing::warn!("dropping audio part: unsupported by messages-style API");
            }
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => blocks.push(json!({
                "type": "tool_use",
                "id": id,
                "name": name,
                "input": arguments,
            })),
            ContentPart::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                let content = match content {
                    Value::String(s) => json!(s),
                    other => json!([{"type": "text", "text": other.to_string()}]),
                };
                blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": content,
                    "is_error": is_error,
                }));
            }
            ContentPart::Thinking { text, signature } => {
                blocks.push(json!({
                    "type": "thinking",
                    "thinking": text,
                    "signature": signature.as_deref().unwrap_or(""),
                }));
            }
            // Verbatim: the payload string is inserted untouched.
            ContentPart::RedactedThinking { data } => {
                blocks.push(json!({"type": "redacted_thinking", "data": data}));
            }
        }
    }
    Ok(blocks)
}

fn map_stop_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        None => FinishReason::Other,
        Some(_) => FinishReason::Other,
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: Request) -> Result<Response> {
        let body = self.build_request(&request)?;
        let response = self
            .transport
            .post_json(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport("anthropic", e))?;
        let rate_limit = rate_limit_snapshot(&response.headers);
        self.parse_response(&response.body, rate_limit)
    }

    async fn stream(&self, request: Request) -> Result<EventStream> {
        let mut body = self.build_request(&request)?;
        body["stream"] = json!(true);
        let mut frames = self
            .transport
            .post_sse(&self.url(), &self.headers(), body)
            .await
            .map_err(|e| from_transport("anthropic", e))?;

        let model = self.model_for(&request);
        let events = stream! {
            yield Ok(StreamEvent::StreamStart);
            let mut assembler = StreamAssembler::new(model);
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
                        yield Err(from_transport("anthropic", err));
                        return;
                    }
                }
            }
            if !assembler.finished {
                yield Err(LlmError::Stream {
                    provider: "anthropic".into(),
                    message: "stream ended before message_stop".into(),
                });
            }
        };
        Ok(Box::pin(events))
    }

    fn structured_output_mode(&self) -> StructuredOutputMode {
        StructuredOutputMode::ToolCall
    }
}

fn rate_limit_snapshot(headers: &HashMap<String, String>) -> Option<HashMap<String, String>> {
    let snapshot: HashMap<String, String> = headers
        .iter()
        .filter(|(name, _)| name.to_lowercase().contains("ratelimit"))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if snapshot.is_empty() {
        None
    } else {
        Some(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Streaming assembly
// ---------------------------------------------------------------------------

/// Per-block builder state, keyed by block index.
enum BlockBuilder {
    Text {
        id: String,
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        raw_json: String,
    },
    Thinking {
        id: String,
        text: String,
        signature: String,
    },
    Redacted {
        data: String,
    },
}

/// SSE → [`StreamEvent`] state machine for the messages-style wire format.
pub(crate) struct StreamAssembler {
    model: String,
    message_id: String,
    blocks: HashMap<u64, BlockBuilder>,
    parts: BTreeMap<u64, ContentPart>,
    usage: Usage,
    stop_reason: Option<String>,
    pub(crate) finished: bool,
}

impl StreamAssembler {
    pub(crate) fn new(model: String) -> Self {
        Self {
            model,
            message_id: String::new(),
            blocks: HashMap::new(),
            parts: BTreeMap::new(),
            usage: Usage::default(),
            stop_reason: None,
            finished: false,
        }
    }

    /// Consume one SSE frame. Malformed frames are skipped; unknown events
    /// are dropped silently.
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
            "message_start" => {
                if let Some(message) = data.get("message") {
                    self.message_id = message
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    if let Some(usage) = message.get("usage") {
                        self.merge_usage(usage);
                    }
                }
                Vec::new()
            }
            "content_block_start" => self.block_start(&data),
            "content_block_delta" => self.block_delta(&data),
            "content_block_stop" => self.block_stop(&data),
            "message_delta" => {
                if let Some(reason) = data
                    .pointer("/delta/stop_reason")
                    .and_then(Value::as_str)
                {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(usage) = data.get("usage") {
                    self.merge_usage(usage);
                }
                Vec::new()
            }
            "message_stop" => {
                self.finished = true;
                vec![StreamEvent::Finish {
                    response: Box::new(self.build_response()),
                }]
            }
            "error" => {
                let message = data
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("provider stream error")
                    .to_string();
                vec![StreamEvent::Error { message }]
            }
            "ping" => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn block_start(&mut self, data: &Value) -> Vec<StreamEvent> {
        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        let block = match data.get("content_block") {
            Some(block) => block,
            None => return Vec::new(),
        };
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                let id = format!("text_{index}");
                self.blocks.insert(
                    index,
                    BlockBuilder::Text {
                        id: id.clone(),
                        text: String::new(),
                    },
                );
                vec![StreamEvent::TextStart { id }]
            }
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = block
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.blocks.insert(
                    index,
                    BlockBuilder::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        raw_json: String::new(),
                    },
                );
                vec![StreamEvent::ToolCallStart { id, name }]
            }
            Some("thinking") => {
                let id = format!("reasoning_{index}");
                self.blocks.insert(
                    index,
                    BlockBuilder::Thinking {
                        id: id.clone(),
                        text: String::new(),
                        signature: String::new(),
                    },
                );
                vec![StreamEvent::ReasoningStart { id }]
            }
            Some("redacted_thinking") => {
                let data = block
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.blocks.insert(index, BlockBuilder::Redacted { data });
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn block_delta(&mut self, data: &Value) -> Vec<StreamEvent> {
        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        let delta = match data.get("delta") {
            Some(delta) => delta,
            None => return Vec::new(),
        };
        let builder = match self.blocks.get_mut(&index) {
            Some(builder) => builder,
            None => return Vec::new(),
        };
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                let chunk = delta.get("text").and_then(Value::as_str).unwrap_or("");
                if let BlockBuilder::Text { id, text } = builder {
                    text.push_str(chunk);
                    return vec![StreamEvent::TextDelta {
                        id: id.clone(),
                        delta: chunk.to_string(),
                    }];
                }
                Vec::new()
            }
            Some("input_json_delta") => {
                let chunk = delta
                    .get("partial_json")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if let BlockBuilder::ToolUse { id, raw_json, .. } = builder {
                    raw_json.push_str(chunk);
                    return vec![StreamEvent::ToolCallDelta {
                        id: id.clone(),
                        arguments_delta: chunk.to_string(),
                    }];
                }
                Vec::new()
            }
            Some("thinking_delta") => {
                let chunk = delta.get("thinking").and_then(Value::as_str).unwrap_or("");
                if let BlockBuilder::Thinking { id, text, .. } = builder {
                    text.push_str(chunk);
                    return vec![StreamEvent::ReasoningDelta {
                        id: id.clone(),
                        delta: chunk.to_string(),
                    }];
                }
                Vec::new()
            }
            Some("signature_delta") => {
                let chunk = delta.get("signature").and_then(Value::as_str).unwrap_or("");
                if let BlockBuilder::Thinking { signature, .. } = builder {
                    signature.push_str(chunk);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn block_stop(&mut self, data: &Value) -> Vec<StreamEvent> {
        let index = data.get("index").and_then(Value::as_u64).unwrap_or(0);
        let builder = match self.blocks.remove(&index) {
            Some(builder) => builder,
            None => return Vec::new(),
        };
        match builder {
            BlockBuilder::Text { id, text } => {
                self.parts.insert(index, ContentPart::Text { text });
                vec![StreamEvent::TextEnd { id }]
            }
            BlockBuilder::ToolUse { id, name, raw_json } => {
                // Unparseable accumulated arguments become an empty mapping.
                let arguments: Value =
                    serde_json::from_str(&raw_json).unwrap_or_else(|_| json!({}));
                self.parts.insert(
                    index,
                    ContentPart::ToolCall {
                        id: id.clone(),
                        name,
                        arguments,
                    },
                );
                vec![StreamEvent::ToolCallEnd { id }]
            }
            BlockBuilder::Thinking {
                id,
                text,
                signature,
            } => {
                self.parts.insert(
                    index,
                    ContentPart::Thinking {
                        text,
                        signature: if signature.is_empty() {
                            None
                        } else {
                            Some(signature)
                        },
                    },
                );
                vec![StreamEvent::ReasoningEnd { id }]
            }
            BlockBuilder::Redacted { data } => {
                self.parts.insert(index, ContentPart::RedactedThinking { data });
                Vec::new()
            }
        }
    }

    fn merge_usage(&mut self, usage: &Value) {
        let read = |key: &str| usage.get(key).and_then(Value::as_u64);
        if let Some(n) = read("input_tokens") {
            self.usage.input_tokens = n;
        }
        if let Some(n) = read("output_tokens") {
            self.usage.output_tokens = n;
        }
        if let Some(n) = read("cache_read_input_tokens") {
            self.usage.cache_read_tokens = n;
        }
        if let Some(n) = read("cache_creation_input_tokens") {
            self.usage.cache_write_tokens = n;
        }
    }

    fn build_response(&mut self) -> Response {
        let parts: Vec<ContentPart> = std::mem::take(&mut self.parts).into_values().collect();
        Response {
            id: self.message_id.clone(),
            model: self.model.clone(),
            provider: "anthropic".to_string(),
            message: Message::with_parts(Role::Assistant, parts),
            finish_reason: map_stop_reason(self.stop_reason.as_deref()),
            raw_finish_reason: self.stop_reason.clone(),
            usage: self.usage,
            warnings: Vec::new(),
            rate_limit: None,
            raw_body: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "thinking")]
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    #[serde(rename = "redacted_thinking")]
    RedactedThinking { data: String },
    #[serde(other)]
    Unknown,
}

impl WireBlock {
    fn into_part(self) -> Option<ContentPart> {
        match self {
            WireBlock::Text { text } => Some(ContentPart::Text { text }),
            WireBlock::ToolUse { id, name, input } => Some(ContentPart::ToolCall {
                id,
                name,
                arguments: input,
            }),
            WireBlock::Thinking {
                thinking,
                signature,
            } => Some(ContentPart::Thinking {
                text: thinking,
                signature,
            }),
            WireBlock::RedactedThinking { data } => {
                Some(ContentPart::RedactedThinking { data })
            }
            WireBlock::Unknown => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

impl WireUsage {
    fn into_usage(self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            reasoning_tokens: 0,
            cache_read_tokens: self.cache_read_input_tokens.unwrap_or(0),
            cache_write_tokens: self.cache_creation_input_tokens.unwrap_or(0),
        }
    }
}
