//! Content-parts-style adapter (Gemini API family).
//!
//! Wire contract highlights:
//! - System/developer text moves to a dedicated `systemInstruction` object.
//! - The assistant role label is `model`; every other non-tool role maps to
//!   `user`.
//! - Tool calls and results correlate by function NAME, not ID. A
//!   per-request synthetic-ID ↔ name map bridges the unified model: tool
//!   calls register their ID, tool results look the name up by ID and fail
//!   closed to `"unknown"` when missing.
//! - Max tokens map to `maxOutputTokens`; tool choice maps to
//!   AUTO/NONE/ANY plus `allowedFunctionNames`.

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
use std::collections::HashMap;
use std::sync::Arc;

/// Content-parts-style provider adapter.
pub struct GeminiProvider {
    config: ProviderConfig,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiProvider {
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

    fn model_for(&self, request: &Request) -> String {
        if request.model.is_empty() {
            self.config.default_model.clone().unwrap_or_default()
        } else {
            request.model.clone()
        }
    }

    fn url(&self, request: &Request, streaming: bool) -> String {
        let verb = if streaming {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!(
            "{}/v1beta/models/{}:{verb}",
            self.config.trimmed_base_url(),
            self.model_for(request),
        )
    }

    fn headers(&self) -> Vec<(String, String)> {
        vec![("x-goog-api-key".to_string(), self.config.api_key.clone())]
    }

    /// Translate a unified request into the wire body.
    pub(crate) fn build_request(&self, request: &Request) -> Result<Value> {
        // Synthetic-ID → function-name map, scoped to this request.
        let mut call_names: HashMap<String, String> = HashMap::new();
        let mut system_texts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System | Role::Developer => {
                    let text = message.text();
                    if !text.is_empty() {
                        system_texts.push(text);
                    }
                    continue;
                }
                _ => {}
            }
            let role = match message.role {
                Role::Assistant => "model",
                _ => "user",
            };
            let parts = wire_parts(&message.content, &mut call_names);
            if !parts.is_empty() {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }

        let mut body = Map::new();
        body.insert("contents".into(), json!(contents));
        if !system_texts.is_empty() {
            body.insert(
                "systemInstruction".into(),
                json!({"parts": [{"text": system_texts.join("\n")}]}),
            );
        }

        let mut generation = Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".into(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".into(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            generation.insert("topP".into(), json!(top_p));
        }
        if !request.stop_sequences.is_empty() {
            generation.insert("stopSequences".into(), json!(request.stop_sequences));
        }
        match &request.response_format {
            Some(ResponseFormat::JsonSchema { schema, .. }) => {
                generation.insert("responseMimeType".into(), json!("application/json"));
                generation.insert("responseSchema".into(), schema.clone());
            }
            Some(ResponseFormat::JsonObject) => {
                generation.insert("responseMimeType".into(), json!("application/json"));
            }
            _ => {}
        }
        if !generation.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation));
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{"functionDeclarations": declarations}]),
            );
            let config = match &request.tool_choice {
                Some(ToolChoice::None) => json!({"mode": "NONE"}),
                Some(ToolChoice::Required) => json!({"mode": "ANY"}),
                Some(ToolChoice::Named(name)) => {
                    json!({"mode": "ANY", "allowedFunctionNames": [name]})
                }
                Some(ToolChoice::Auto) | None => json!({"mode": "AUTO"}),
            };
            body.insert(
                "toolConfig".into(),
                json!({"functionCallingConfig": config}),
            );
        }

        if let Some(Value::Object(extra)) = &request.provider_options {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }
        Ok(Value::Object(body))
    }

    /// Translate a wire response body into the unified response.
    pub(crate) fn parse_response(&self, body: &str, model: &str) -> Result<Response> {
        let raw: Value = serde_json::from_str(body)?;
        let mut minted = 0usize;
        let mut parts: Vec<ContentPart> = Vec::new();

        for part in raw
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                parts.push(ContentPart::Text {
                    text: text.to_string(),
                });
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id = format!("fc_{minted}");
                minted += 1;
                parts.push(ContentPart::ToolCall {
                    id,
                    name,
                    arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                });
            }
        }

        let raw_finish = raw
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .map(str::to_string);
        let has_tool_calls = parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolCall { .. }));
        Ok(Response {
            id: raw
                .get("responseId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            model: model.to_string(),
            provider: "gemini".to_string(),
            message: Message::with_parts(Role::Assistant, parts),
            finish_reason: map_finish(raw_finish.as_deref(), has_tool_calls),
            raw_finish_reason: raw_finish,
            usage: parse_usage(raw.get("usageMetadata")),
            warnings: Vec::new(),
            rate_limit: None,
            raw_body: Some(raw),
        })
    }
}

/// Translate message parts, maintaining the synthetic-ID map: calls
/// register `id → name`; results look the name up and fail closed.
fn wire_parts(parts: &[ContentPart], call_names: &mut HashMap<String, String>) -> Vec<Value> {
    let mut out = Vec::new();
    for part in parts {
        match part {
            ContentPart::Text { text } => out.push(json!({"text": text})),
            ContentPart::Image {
                data: Some(data),
                media_type,
                ..
            } => out.push(json!({
                "inlineData": {
                    "mimeType": media_type.as_deref().unwrap_or("image/png"),
                    "data": data,
                }
            })),
            ContentPart::Image { url: Some(url), .. } => out.push(json!({
                "fileData": {"fileUri": url}
            })),
            ContentPart::ToolCall {
                id,
                name,
                arguments,
            } => {
                call_names.insert(id.clone(), name.clone());
                out.push(json!({
                    "functionCall": {"name": name, "args": arguments}
                }));
            }
            ContentPart::ToolResult {
                call_id, content, ..
            } => {
                let name = call_names
                    .get(call_id)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                let response = match content {
                    Value::Object(_) => content.clone(),
                    other => json!({"content": other}),
                };
                out.push(json!({
                    "functionResponse": {"name": name, "response": response}
                }));
            }
            other => {
                tracing::warn!(?other, "dropping unsupported part");
            }
        }
    }
    out
}

fn map_finish(raw: Option<&str>, has_tool_calls: bool) -> FinishReason {
    if has_tool_calls {
        return FinishReason::ToolCalls;
    }
    match raw {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") => {
            FinishReason::ContentFilter
        }
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
        input_tokens: read("promptTokenCount"),
        output_tokens: read("candidatesTokenCount"),
        reasoning_tokens: read("thoughtsTokenCount"),
        cache_read_tokens: read("cachedContentTokenCount"),
        cache_write_tokens: 0,
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: Request) -> Result<Response> {
        let body = self.build_request(&request)?;
        let model = self.model_for(&request);
        let response = self
            .transport
            .post_json(&self.url(&request, false), &self.headers(), body)
            .await
            .map_err(|e| from_transport("gemini", e))?;
        self.parse_response(&response.body, &model)
    }

    async fn stream(&self, request: Request) -> Result<EventStream> {
        let body = self.build_request(&request)?;
        let model = self.model_for(&request);
        let mut frames = self
            .transport
            .post_sse(&self.url(&request, true), &self.headers(), body)
            .await
            .map_err(|e| from_transport("gemini", e))?;

        let events = stream! {
            yield Ok(StreamEvent::StreamStart);
            let mut assembler = StreamAssembler::new(model);
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(frame) => {
                        for event in assembler.handle_frame(&frame) {
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        yield Err(from_transport("gemini", err));
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
// Streaming assembly
// ---------------------------------------------------------------------------

/// SSE → [`StreamEvent`] machine for the content-parts wire format.
///
/// Chunks carry whole parts: text fragments accumulate into a single text
/// block; function calls arrive complete in one chunk and emit their
/// start/delta/end trio immediately. The terminal FINISH is produced when
/// the frame stream ends.
pub(crate) struct StreamAssembler {
    model: String,
    response_id: String,
    text: String,
    text_open: bool,
    tool_parts: Vec<ContentPart>,
    minted: usize,
    finish_reason: Option<String>,
    usage: Usage,
}

impl StreamAssembler {
    pub(crate) fn new(model: String) -> Self {
        Self {
            model,
            response_id: String::new(),
            text: String::new(),
            text_open: false,
            tool_parts: Vec::new(),
            minted: 0,
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

        if let Some(id) = data.get("responseId").and_then(Value::as_str) {
            self.response_id = id.to_string();
        }
        if let Some(reason) = data
            .pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = data.get("usageMetadata") {
            // Later usage snapshots replace earlier partials.
            self.usage = parse_usage(Some(usage));
        }

        for part in data
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            if let Some(chunk) = part.get("text").and_then(Value::as_str) {
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
            } else if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let arguments = call.get("args").cloned().unwrap_or_else(|| json!({}));
                let id = format!("fc_{}", self.minted);
                self.minted += 1;
                events.push(StreamEvent::ToolCallStart {
                    id: id.clone(),
                    name: name.clone(),
                });
                events.push(StreamEvent::ToolCallDelta {
                    id: id.clone(),
                    arguments_delta: arguments.to_string(),
                });
                events.push(StreamEvent::ToolCallEnd { id: id.clone() });
                self.tool_parts.push(ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                });
            }
        }
        events
    }

    /// Close the text block (if open) and emit the terminal FINISH.
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
        parts.append(&mut self.tool_parts);
        let has_tool_calls = parts
            .iter()
            .any(|p| matches!(p, ContentPart::ToolCall { .. }));
        events.push(StreamEvent::Finish {
            response: Box::new(Response {
                id: self.response_id.clone(),
                model: self.model.clone(),
                provider: "gemini".to_string(),
                message: Message::with_parts(Role::Assistant, parts),
                finish_reason: map_finish(self.finish_reason.as_deref(), has_tool_calls),
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
