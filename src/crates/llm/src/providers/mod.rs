//! Provider adapters: one per upstream API family.
//!
//! - [`AnthropicProvider`] — messages-style (system-as-parameter, strict
//!   role alternation, native thinking blocks).
//! - [`OpenAiProvider`] — responses-style (instructions + input items).
//! - [`GeminiProvider`] — content-parts-style (name-correlated tools).
//! - [`ChatCompletionsProvider`] — chat-completions fallback for
//!   third-party endpoints.

mod anthropic;
mod chat;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use chat::ChatCompletionsProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
