//! Codergen backend bridge: pipeline stages over the unified client.
//!
//! Implements `cascade_core`'s `CodergenBackend` so codergen nodes route
//! through a [`Client`]. Node-level `llm_model`, `llm_provider`, and
//! `reasoning_effort` attributes override the configured defaults.

use crate::client::Client;
use crate::generate::{generate, GenerateOptions};
use async_trait::async_trait;
use cascade_core::context::Context;
use cascade_core::error::{PipelineError, Result as CoreResult};
use cascade_core::graph::Node;
use cascade_core::handlers::CodergenBackend;
use std::sync::Arc;

/// LLM-backed codergen backend.
pub struct LlmCodergenBackend {
    client: Arc<Client>,
    default_model: String,
}

impl LlmCodergenBackend {
    pub fn new(client: Arc<Client>, default_model: impl Into<String>) -> Self {
        Self {
            client,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl CodergenBackend for LlmCodergenBackend {
    async fn run_task(&self, node: &Node, prompt: &str, context: &Context) -> CoreResult<String> {
        let model = node
            .llm_model()
            .map(str::to_string)
            .unwrap_or_else(|| self.default_model.clone());

        let mut options = GenerateOptions::new(model).with_prompt(prompt);
        if let Some(provider) = node.llm_provider() {
            options = options.with_provider(provider);
        }
        if let Some(effort) = node.reasoning_effort() {
            options.reasoning_effort = Some(effort.to_string());
        }
        // Prior-stage history rendered by the fidelity resolver rides along
        // as the system prompt.
        if let Some(history) = context.get_str("history.block").filter(|h| !h.is_empty()) {
            options = options.with_system(format!("Prior pipeline stages:\n{history}"));
        }

        let result = generate(&self.client, options)
            .await
            .map_err(|e| PipelineError::Handler {
                handler: "codergen".to_string(),
                node: node.id.clone(),
                message: e.to_string(),
            })?;
        Ok(result.text)
    }
}
