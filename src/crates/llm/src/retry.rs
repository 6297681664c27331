//! Retry with exponential backoff for retryable error classes.
//!
//! Wraps an async operation and retries only when the resulting
//! [`LlmError`] reports itself retryable. Server-sent `retry-after` hints
//! take precedence over the computed backoff delay.

use crate::error::{LlmError, Result};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration for client-side retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    /// When false, delays are computed but not slept (tests).
    pub sleep_enabled: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            sleep_enabled: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_sleep_enabled(mut self, enabled: bool) -> Self {
        self.sleep_enabled = enabled;
        self
    }

    /// Delay before retry number `retry` (1-based).
    fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(retry.saturating_sub(1) as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter {
            0.5 + rand::random::<f64>()
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).floor() as u64)
    }
}

/// Run `operation`, retrying retryable errors under `config`.
pub async fn retry_with_backoff<T, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                let delay = err
                    .retry_after()
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| config.delay_for_retry(attempt));
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying LLM request"
                );
                if config.sleep_enabled && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::default()
            .with_jitter(false)
            .with_sleep_enabled(false)
    }

    fn server_error() -> LlmError {
        LlmError::Server {
            provider: "t".into(),
            message: "boom".into(),
            status: 503,
            code: None,
        }
    }

    fn auth_error() -> LlmError {
        LlmError::Authentication {
            provider: "t".into(),
            message: "bad key".into(),
            code: None,
        }
    }

    #[tokio::test]
    async fn test_retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast().with_max_attempts(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(server_error())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff(&fast().with_max_attempts(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(auth_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = retry_with_backoff(&fast().with_max_attempts(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Server { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_schedule() {
        let config = fast();
        assert_eq!(config.delay_for_retry(1), Duration::from_millis(500));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(1000));
        assert_eq!(config.delay_for_retry(3), Duration::from_millis(2000));
    }
}
