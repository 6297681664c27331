//! The unified request/response/stream model.
//!
//! Three incompatible upstream API families (messages-style,
//! responses-style, content-parts-style) translate to and from the types in
//! this module. Messages carry ordered [`ContentPart`]s under a five-role
//! model; responses carry a final assistant message plus normalized usage;
//! streams are a flat sequence of [`StreamEvent`]s with matched start/end
//! markers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Developer,
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Plain text.
    Text { text: String },

    /// Image by URL or inline base64 bytes.
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },

    /// Inline audio.
    Audio { data: String, media_type: String },

    /// Inline document (PDF and similar).
    Document {
        data: String,
        media_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// A tool invocation requested by the model.
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },

    /// The result of executing a tool call.
    ToolResult {
        call_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// Extended reasoning text.
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    /// Opaque redacted reasoning. The payload must round-trip to the
    /// provider byte-for-byte; nothing may re-encode it.
    RedactedThinking { data: String },
}

impl ContentPart {
    /// Plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// A message: role plus ordered content parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
    /// Participant name, for providers that accept one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Tool call this message answers (role `Tool`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Message with a single text part.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self::with_parts(role, vec![ContentPart::text(text)])
    }

    /// Message from explicit parts.
    pub fn with_parts(role: Role, content: Vec<ContentPart>) -> Self {
        Self {
            role,
            content,
            name: None,
            tool_call_id: None,
        }
    }

    /// System message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Developer message.
    pub fn developer(text: impl Into<String>) -> Self {
        Self::new(Role::Developer, text)
    }

    /// User message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Tool-result message answering `call_id`.
    pub fn tool_result(call_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        let call_id = call_id.into();
        let mut message = Self::with_parts(
            Role::Tool,
            vec![ContentPart::ToolResult {
                call_id: call_id.clone(),
                content,
                is_error,
            }],
        );
        message.tool_call_id = Some(call_id);
        message
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text of all `Thinking` parts.
    pub fn reasoning_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Thinking { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All tool-call parts, in order.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some((id.as_str(), name.as_str(), arguments)),
                _ => None,
            })
            .collect()
    }
}

/// Executes a locally-registered tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run the tool. Errors come back as strings; the generate driver turns
    /// them into error tool-results rather than failures.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, String>;
}

/// A tool the model may call.
#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped parameter schema.
    pub parameters: Value,
    /// Local handler; tools without one are declared but never executed
    /// client-side.
    pub execute: Option<Arc<dyn ToolExecutor>>,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            execute: None,
        }
    }

    /// Attach a local executor.
    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.execute = Some(executor);
        self
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("has_executor", &self.execute.is_some())
            .finish()
    }
}

/// Tool-choice modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    Required,
    Named(String),
}

/// Response-format hints for structured output.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
    JsonSchema {
        name: String,
        schema: Value,
        strict: bool,
    },
}

/// A unified completion request.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    pub tool_choice: Option<ToolChoice>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub stop_sequences: Vec<String>,
    /// Reasoning effort tag (`low` | `medium` | `high`).
    pub reasoning_effort: Option<String>,
    pub response_format: Option<ResponseFormat>,
    /// Provider name override; the client falls back to its default.
    pub provider: Option<String>,
    /// Provider-specific passthrough options, merged into the wire request.
    pub provider_options: Option<Value>,
    pub metadata: HashMap<String, String>,
}

impl Request {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn push_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = Some(choice);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_reasoning_effort(mut self, effort: impl Into<String>) -> Self {
        self.reasoning_effort = Some(effort.into());
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

/// Normalized token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

impl Usage {
    /// Accumulate another usage record.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.reasoning_tokens = self.reasoning_tokens.saturating_add(other.reasoning_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.cache_write_tokens = self
            .cache_write_tokens
            .saturating_add(other.cache_write_tokens);
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// A unified completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub provider: String,
    /// The final assistant message.
    pub message: Message,
    pub finish_reason: FinishReason,
    /// Provider's raw stop/finish tag, before normalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_finish_reason: Option<String>,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Rate-limit headers snapshot, when the transport surfaced them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<HashMap<String, String>>,
    /// Raw response body, kept for debugging.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<Value>,
}

impl Response {
    /// Concatenated assistant text.
    pub fn text(&self) -> String {
        self.message.text()
    }

    /// Tool calls in the final message.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &Value)> {
        self.message.tool_calls()
    }
}

/// Normalized streaming events.
///
/// Invariants: every `TextStart` has a matching `TextEnd` with the same ID
/// (same for reasoning and tool calls); `Finish` appears exactly once per
/// successful stream and is last; the concatenation of `ToolCallDelta`
/// argument fragments equals the raw arguments carried by `Finish`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    StreamStart,
    TextStart { id: String },
    TextDelta { id: String, delta: String },
    TextEnd { id: String },
    ReasoningStart { id: String },
    ReasoningDelta { id: String, delta: String },
    ReasoningEnd { id: String },
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments_delta: String },
    ToolCallEnd { id: String },
    /// Terminal event carrying the assembled response.
    Finish { response: Box<Response> },
    Error { message: String },
    /// Raw provider event passed through unmodified.
    Provider { raw: Value },
}
