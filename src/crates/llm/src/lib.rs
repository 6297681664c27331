//! Provider-agnostic LLM client for Cascade.
//!
//! One request/response/stream contract over three incompatible upstream
//! API families, plus a chat-completions fallback for third-party
//! endpoints:
//!
//! - **Messages-style** ([`AnthropicProvider`]) — system as a separate
//!   parameter, strict user/assistant alternation, native tool-use and
//!   thinking blocks.
//! - **Responses-style** ([`OpenAiProvider`]) — system as `instructions`,
//!   ordered input items, strict tool declarations.
//! - **Content-parts-style** ([`GeminiProvider`]) — `systemInstruction`,
//!   model/user roles, name-correlated tools bridged by synthetic IDs.
//! - **Chat-style** ([`ChatCompletionsProvider`]) — the plain
//!   chat-completions shape.
//!
//! On top of the adapters sit an agentic [`generate`] driver (bounded tool
//! rounds, concurrent tool execution, aggregated usage), a structured
//! output layer ([`generate_object`]), typed error mapping with
//! retryability, and retry with exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{Client, ProviderConfig, Request, Message};
//! use llm::providers::AnthropicProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> llm::Result<()> {
//!     let config = ProviderConfig::from_env("ANTHROPIC_API_KEY", "https://api.anthropic.com")?;
//!     let client = Client::new().with_provider(Arc::new(AnthropicProvider::new(config)?));
//!
//!     let response = client
//!         .complete(Request::new("claude-sonnet-4-5").push_message(Message::user("Hello!")))
//!         .await?;
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod providers;
pub mod retry;
pub mod structured;
pub mod transport;
pub mod types;

pub use backend::LlmCodergenBackend;
pub use client::{Client, EventStream, Provider, StructuredOutputMode};
pub use config::ProviderConfig;
pub use error::{from_transport, map_http_error, LlmError, Result};
pub use generate::{
    generate, GenerateOptions, GenerateResult, GenerateStep, StopCondition, ToolResultRecord,
};
pub use providers::{
    AnthropicProvider, ChatCompletionsProvider, GeminiProvider, OpenAiProvider,
};
pub use retry::{retry_with_backoff, RetryConfig};
pub use structured::{generate_object, ObjectOptions};
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, SseFrame, SseStream};
pub use types::{
    ContentPart, FinishReason, Message, Request, Response, ResponseFormat, Role, StreamEvent,
    Tool, ToolChoice, ToolExecutor, Usage,
};
