//! The provider-routing client.
//!
//! A [`Client`] holds a map from provider name to adapter and routes each
//! request by its `provider` field (or the configured default). The client
//! never parses provider responses itself; adapters own translation.

use crate::error::{LlmError, Result};
use crate::types::{Request, Response, StreamEvent, ToolChoice};
use async_trait::async_trait;
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Stream of normalized events from one `stream` call. Lazy, finite,
/// single-consumer, not restartable.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// How a provider family extracts structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredOutputMode {
    /// JSON-schema response format with strict enforcement.
    JsonSchemaStrict,
    /// JSON-schema response format without strict enforcement.
    JsonSchema,
    /// A single forced tool call whose arguments are the object.
    ToolCall,
}

/// A provider adapter: one upstream API family behind the unified contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used for routing (`anthropic`, `openai`, …).
    fn name(&self) -> &str;

    /// Issue a request and return the complete response.
    async fn complete(&self, request: Request) -> Result<Response>;

    /// Issue a request and stream normalized events.
    async fn stream(&self, request: Request) -> Result<EventStream>;

    /// Whether the adapter can express this tool-choice mode.
    fn supports_tool_choice(&self, _choice: &ToolChoice) -> bool {
        true
    }

    /// The structured-output strategy for this provider family.
    fn structured_output_mode(&self) -> StructuredOutputMode {
        StructuredOutputMode::JsonSchema
    }

    /// Release any held resources.
    async fn close(&self) {}
}

/// Routes requests to registered provider adapters.
#[derive(Default)]
pub struct Client {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: Option<String>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name. The first registration also
    /// becomes the default provider.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        let name = provider.name().to_string();
        if self.default_provider.is_none() {
            self.default_provider = Some(name.clone());
        }
        self.providers.insert(name, provider);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.register(provider);
        self
    }

    /// Set the default provider by name.
    pub fn with_default_provider(mut self, name: impl Into<String>) -> Self {
        self.default_provider = Some(name.into());
        self
    }

    /// Resolve the adapter a request routes to.
    pub fn provider_for(&self, request: &Request) -> Result<Arc<dyn Provider>> {
        let name = request
            .provider
            .as_deref()
            .or(self.default_provider.as_deref())
            .ok_or_else(|| {
                LlmError::Config("no provider named in request and no default configured".into())
            })?;
        self.providers.get(name).cloned().ok_or_else(|| {
            LlmError::Config(format!("no provider registered under name '{name}'"))
        })
    }

    /// Route a completion request.
    pub async fn complete(&self, request: Request) -> Result<Response> {
        let provider = self.provider_for(&request)?;
        if let Some(choice) = &request.tool_choice {
            if !provider.supports_tool_choice(choice) {
                return Err(LlmError::Config(format!(
                    "provider '{}' does not support tool choice {choice:?}",
                    provider.name()
                )));
            }
        }
        tracing::debug!(provider = provider.name(), model = %request.model, "routing complete");
        provider.complete(request).await
    }

    /// Route a streaming request.
    pub async fn stream(&self, request: Request) -> Result<EventStream> {
        let provider = self.provider_for(&request)?;
        tracing::debug!(provider = provider.name(), model = %request.model, "routing stream");
        provider.stream(request).await
    }

    /// Close every registered adapter.
    pub async fn close(&self) {
        for provider in self.providers.values() {
            provider.close().await;
        }
    }
}
