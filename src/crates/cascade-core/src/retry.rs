//! Retry policies — exponential backoff for stage execution.
//!
//! Every stage runs under a [`BackoffPolicy`]: a max attempt count, an
//! exponential delay schedule with optional jitter, and a classifier that
//! decides whether a raised error is worth another attempt. Handlers signal
//! a deliberate retry by returning [`StageStatus::Retry`]; raised errors are
//! classified by message (network/timeout/rate-limit patterns retry,
//! auth/validation/config errors do not, unknown errors do not).

use crate::error::PipelineError;
use crate::events::{EventEmitter, PipelineEventKind};
use crate::graph::{Graph, Node};
use crate::outcome::{Outcome, StageStatus};
use std::future::Future;
use std::time::Duration;

/// Backoff configuration for one node's attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: f64,
    /// Delay ceiling.
    pub max_delay: Duration,
    /// Randomize delays by a factor in [0.5, 1.5).
    pub jitter: bool,
    /// When false, delays are computed but not slept (tests).
    pub sleep_enabled: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl BackoffPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            jitter: false,
            sleep_enabled: true,
        }
    }

    /// 5 attempts, 200ms doubling.
    pub fn standard() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
            sleep_enabled: true,
        }
    }

    /// 5 attempts, 500ms doubling.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            sleep_enabled: true,
        }
    }

    /// 3 attempts, constant 500ms.
    pub fn linear() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: false,
            sleep_enabled: true,
        }
    }

    /// 3 attempts, 2s tripling.
    pub fn patient() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 3.0,
            max_delay: Duration::from_secs(120),
            jitter: true,
            sleep_enabled: true,
        }
    }

    /// Set the attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Enable or disable actual sleeping.
    pub fn with_sleep_enabled(mut self, enabled: bool) -> Self {
        self.sleep_enabled = enabled;
        self
    }

    /// Delay before attempt `n` (1-based; the first attempt has no delay).
    ///
    /// `min(cap, initial × multiplier^(n-1))`, multiplied by a jitter factor
    /// in [0.5, 1.5) when enabled, floored to milliseconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).saturating_sub(1);
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);
        let factor = if self.jitter {
            0.5 + rand::random::<f64>()
        } else {
            1.0
        };
        Duration::from_millis((capped * factor).floor() as u64)
    }

    async fn sleep_before(&self, attempt: u32) -> u64 {
        let delay = self.delay_for_attempt(attempt);
        if self.sleep_enabled && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay.as_millis() as u64
    }
}

/// Classification of a raised error for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Worth another attempt.
    Transient,
    /// Retrying cannot help.
    Permanent,
    /// Not recognized; treated as permanent.
    Unknown,
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "429",
    "rate limit",
    "too many requests",
    "500",
    "502",
    "503",
    "504",
    "econnreset",
    "connection reset",
    "connection refused",
    "temporarily unavailable",
    "service unavailable",
    "overloaded",
];

const PERMANENT_PATTERNS: &[&str] = &[
    "401",
    "403",
    "400",
    "unauthorized",
    "forbidden",
    "authentication",
    "invalid api key",
    "validation",
    "invalid request",
    "config",
    "not found",
];

/// Classify an error message against the fixed pattern tables.
pub fn classify_error(message: &str) -> RetryClass {
    let lower = message.to_lowercase();
    if PERMANENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return RetryClass::Permanent;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return RetryClass::Transient;
    }
    RetryClass::Unknown
}

/// Effective policy for a node over a base policy: attempts come from the
/// node's `max_retries` + 1, else the graph default + 1, else 1; delays and
/// toggles come from the base.
pub fn policy_for_node_with_base(node: &Node, graph: &Graph, base: &BackoffPolicy) -> BackoffPolicy {
    let max_attempts = node
        .max_retries()
        .or_else(|| graph.default_max_retries())
        .map(|retries| retries + 1)
        .unwrap_or(1);
    BackoffPolicy {
        max_attempts,
        ..base.clone()
    }
}

/// [`policy_for_node_with_base`] over the standard preset.
pub fn policy_for_node(node: &Node, graph: &Graph) -> BackoffPolicy {
    policy_for_node_with_base(node, graph, &BackoffPolicy::standard())
}

/// Result of driving a stage under a retry policy.
#[derive(Debug)]
pub struct RetryRunResult {
    pub outcome: Outcome,
    /// Attempts actually used (≥ 1).
    pub attempts: u32,
}

/// Run one stage attempt function under the policy.
///
/// `Retry` outcomes and transient errors consume attempts with backoff;
/// `Fail` returns immediately; exhaustion yields `Fail` unless
/// `allow_partial` downgrades it to `PartialSuccess`. Raised errors are
/// converted to `Fail` outcomes, never propagated.
pub async fn run_with_retry<F, Fut>(
    policy: &BackoffPolicy,
    node_id: &str,
    allow_partial: bool,
    emitter: &EventEmitter,
    mut attempt_fn: F,
) -> RetryRunResult
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Outcome, PipelineError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        let result = attempt_fn(attempt).await;
        match result {
            Ok(outcome) => match outcome.status {
                StageStatus::Success
                | StageStatus::PartialSuccess
                | StageStatus::Fail
                | StageStatus::Skipped => {
                    return RetryRunResult { outcome, attempts: attempt };
                }
                StageStatus::Retry => {
                    if attempt >= max_attempts {
                        let exhausted = if allow_partial {
                            let mut downgraded = outcome;
                            downgraded.status = StageStatus::PartialSuccess;
                            downgraded
                        } else {
                            let reason = outcome
                                .failure_reason
                                .unwrap_or_else(|| "retries exhausted".to_string());
                            Outcome::fail(format!(
                                "retries exhausted after {attempt} attempts: {reason}"
                            ))
                        };
                        return RetryRunResult {
                            outcome: exhausted,
                            attempts: attempt,
                        };
                    }
                    attempt += 1;
                    let delay_ms = policy.sleep_before(attempt).await;
                    emitter.emit(PipelineEventKind::StageRetrying {
                        node_id: node_id.to_string(),
                        attempt,
                        delay_ms,
                    });
                }
            },
            Err(err) => {
                let message = err.to_string();
                let transient = classify_error(&message) == RetryClass::Transient;
                if transient && attempt < max_attempts {
                    tracing::warn!(node = node_id, attempt, error = %message, "transient stage error, retrying");
                    attempt += 1;
                    let delay_ms = policy.sleep_before(attempt).await;
                    emitter.emit(PipelineEventKind::StageRetrying {
                        node_id: node_id.to_string(),
                        attempt,
                        delay_ms,
                    });
                } else {
                    return RetryRunResult {
                        outcome: Outcome::fail(message),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
