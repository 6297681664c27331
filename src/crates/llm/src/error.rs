//! Typed error taxonomy and HTTP error mapping.
//!
//! Every upstream failure funnels through [`map_http_error`], which turns a
//! raw status + body + headers into one of the typed classes below with the
//! right retryability. Ambiguous statuses (400/413/422 and anything unknown)
//! are reclassified by scanning the extracted message against fixed
//! patterns.

use crate::transport::TransportError;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when working with LLM providers.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Request was malformed or rejected by validation (400/422).
    #[error("[{provider}] invalid request: {message}")]
    InvalidRequest {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Authentication failed (401).
    #[error("[{provider}] authentication failed: {message}")]
    Authentication {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Access denied (403).
    #[error("[{provider}] access denied: {message}")]
    AccessDenied {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Model or resource not found (404).
    #[error("[{provider}] not found: {message}")]
    NotFound {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Request timed out upstream (408).
    #[error("[{provider}] request timeout: {message}")]
    RequestTimeout {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Prompt exceeded the model's context window (413, or reclassified).
    #[error("[{provider}] context length exceeded: {message}")]
    ContextLength {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Content blocked by a safety system (reclassified).
    #[error("[{provider}] content filtered: {message}")]
    ContentFilter {
        provider: String,
        message: String,
        code: Option<String>,
    },

    /// Rate limit exceeded (429), with the server's retry hint when given.
    #[error("[{provider}] rate limited: {message}")]
    RateLimit {
        provider: String,
        message: String,
        code: Option<String>,
        retry_after: Option<u64>,
    },

    /// Upstream server error (5xx).
    #[error("[{provider}] server error ({status}): {message}")]
    Server {
        provider: String,
        message: String,
        status: u16,
        code: Option<String>,
    },

    /// Provider error not covered by another class. Retryable by default.
    #[error("[{provider}] provider error: {message}")]
    Provider {
        provider: String,
        message: String,
        status: Option<u16>,
        code: Option<String>,
        retryable: bool,
    },

    /// Transport-level failure: DNS, TLS, connection reset.
    #[error("network error: {0}")]
    Network(String),

    /// A stream ended before its terminal event.
    #[error("[{provider}] stream interrupted: {message}")]
    Stream { provider: String, message: String },

    /// Response body could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Client-side configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller-initiated cancellation.
    #[error("request aborted")]
    Abort,

    /// Structured-output extraction produced nothing usable.
    #[error("[{provider}] no object generated: {message}")]
    NoObjectGenerated { provider: String, message: String },
}

impl LlmError {
    /// Whether retrying the request may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RequestTimeout { .. }
            | LlmError::RateLimit { .. }
            | LlmError::Server { .. }
            | LlmError::Network(_)
            | LlmError::Stream { .. } => true,
            LlmError::Provider { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Server-provided retry hint, in seconds.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            LlmError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

/// Fold a transport failure into the typed taxonomy.
pub fn from_transport(provider: &str, err: TransportError) -> LlmError {
    match err {
        TransportError::Status {
            status,
            body,
            headers,
        } => map_http_error(provider, status, &body, &headers),
        TransportError::Network(message) => LlmError::Network(message),
    }
}

/// Map an HTTP failure to a typed error.
///
/// Message extraction order: `body.error.message` → `body.message` →
/// `body.error` (string) → stringified body → raw body text. The error code
/// is `body.error.code` or `body.error.type`. A `retry-after` header is
/// parsed as integer seconds.
pub fn map_http_error(
    provider: &str,
    status: u16,
    body: &str,
    headers: &HashMap<String, String>,
) -> LlmError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = extract_message(parsed.as_ref(), body);
    let code = parsed.as_ref().and_then(extract_code);
    let retry_after = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
        .and_then(|(_, value)| value.trim().parse::<u64>().ok());
    let provider = provider.to_string();

    match status {
        400 => reclassify(provider, message, code).unwrap_or_else(invalid_request),
        401 => LlmError::Authentication {
            provider,
            message,
            code,
        },
        403 => LlmError::AccessDenied {
            provider,
            message,
            code,
        },
        404 => LlmError::NotFound {
            provider,
            message,
            code,
        },
        408 => LlmError::RequestTimeout {
            provider,
            message,
            code,
        },
        413 => reclassify(provider.clone(), message.clone(), code.clone()).unwrap_or(
            LlmError::ContextLength {
                provider,
                message,
                code,
            },
        ),
        422 => reclassify(provider, message, code).unwrap_or_else(invalid_request),
        429 => LlmError::RateLimit {
            provider,
            message,
            code,
            retry_after,
        },
        500 | 502 | 503 | 504 => LlmError::Server {
            provider,
            message,
            status,
            code,
        },
        other => {
            reclassify(provider.clone(), message.clone(), code.clone()).unwrap_or(
                LlmError::Provider {
                    provider,
                    message,
                    status: Some(other),
                    code,
                    retryable: true,
                },
            )
        }
    }
}

fn invalid_request((provider, message, code): (String, String, Option<String>)) -> LlmError {
    LlmError::InvalidRequest {
        provider,
        message,
        code,
    }
}

/// Scan the message against the fixed reclassification patterns. Returns the
/// untouched inputs on no match so callers can build their default class.
fn reclassify(
    provider: String,
    message: String,
    code: Option<String>,
) -> std::result::Result<LlmError, (String, String, Option<String>)> {
    let lower = message.to_lowercase();
    if lower.contains("not found") || lower.contains("does not exist") {
        return Ok(LlmError::NotFound {
            provider,
            message,
            code,
        });
    }
    if lower.contains("unauthorized") || lower.contains("invalid key") {
        return Ok(LlmError::Authentication {
            provider,
            message,
            code,
        });
    }
    if lower.contains("context length") || lower.contains("too many tokens") {
        return Ok(LlmError::ContextLength {
            provider,
            message,
            code,
        });
    }
    if lower.contains("content filter") || lower.contains("safety") {
        return Ok(LlmError::ContentFilter {
            provider,
            message,
            code,
        });
    }
    Err((provider, message, code))
}

fn extract_message(parsed: Option<&Value>, raw: &str) -> String {
    if let Some(value) = parsed {
        if let Some(message) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return message.to_string();
        }
        return value.to_string();
    }
    raw.to_string()
}

fn extract_code(parsed: &Value) -> Option<String> {
    let error = parsed.get("error")?;
    error
        .get("code")
        .and_then(Value::as_str)
        .or_else(|| error.get("type").and_then(Value::as_str))
        .map(str::to_string)
}
