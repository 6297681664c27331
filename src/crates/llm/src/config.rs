//! Provider configuration.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for one provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    ///
    /// Examples:
    /// - Anthropic: "https://api.anthropic.com"
    /// - OpenAI: "https://api.openai.com"
    /// - Gemini: "https://generativelanguage.googleapis.com"
    pub base_url: String,

    /// Model used when a request does not name one.
    pub default_model: Option<String>,

    /// Request timeout duration.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Organization ID (for providers that support it).
    pub organization: Option<String>,
}

impl ProviderConfig {
    /// Create a new provider configuration.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: None,
            timeout: default_timeout(),
            organization: None,
        }
    }

    /// Create configuration with the key read from an environment variable.
    pub fn from_env(env_var: &str, base_url: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(env_var).map_err(|_| {
            LlmError::Config(format!("environment variable {env_var} is not set"))
        })?;
        Ok(Self::new(api_key, base_url))
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the organization ID.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Base URL with any trailing slash removed.
    pub fn trimmed_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ProviderConfig::new("key", "https://api.example.com/")
            .with_default_model("model-1")
            .with_timeout(Duration::from_secs(30))
            .with_organization("org-9");

        assert_eq!(config.api_key, "key");
        assert_eq!(config.trimmed_base_url(), "https://api.example.com");
        assert_eq!(config.default_model.as_deref(), Some("model-1"));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.organization.as_deref(), Some("org-9"));
    }

    #[test]
    fn test_from_env_missing_is_config_error() {
        let err = ProviderConfig::from_env("CASCADE_TEST_MISSING_KEY", "x").unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }
}
