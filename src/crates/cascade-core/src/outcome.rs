//! Stage outcomes — the result record every handler returns.
//!
//! Handlers never throw for control flow: success, partial success, failure,
//! retry requests, and skips are all expressed as an [`Outcome`] carrying a
//! [`StageStatus`]. The execute loop reads the status to drive retries, edge
//! selection, and goal-gate enforcement.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Terminal status of a single stage (one handler invocation for one node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Fail,
    Retry,
    Skipped,
}

impl StageStatus {
    /// Lowercase string form used in edge conditions and `status.json`.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Fail => "fail",
            StageStatus::Retry => "retry",
            StageStatus::Skipped => "skipped",
        }
    }

    /// Whether this status satisfies a goal gate.
    pub fn is_satisfactory(&self) -> bool {
        matches!(self, StageStatus::Success | StageStatus::PartialSuccess)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result record returned by a handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Stage status.
    pub status: StageStatus,

    /// Human-readable failure reason, set when `status` is `Fail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Free-form notes (summaries, tool output digests, review findings).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Key → value entries the engine merges into the run context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context_updates: HashMap<String, Value>,

    /// Node IDs a human or conditional handler wants visited next,
    /// short-circuiting condition evaluation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_next_ids: Vec<String>,

    /// Label consulted by `preferred_label` clauses in edge conditions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_label: Option<String>,
}

impl Outcome {
    /// Successful outcome with no notes.
    pub fn success() -> Self {
        Self::with_status(StageStatus::Success)
    }

    /// Successful outcome with notes.
    pub fn success_with_notes(notes: impl Into<String>) -> Self {
        let mut outcome = Self::with_status(StageStatus::Success);
        outcome.notes = Some(notes.into());
        outcome
    }

    /// Partially-successful outcome.
    pub fn partial_success() -> Self {
        Self::with_status(StageStatus::PartialSuccess)
    }

    /// Failed outcome with a reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        let mut outcome = Self::with_status(StageStatus::Fail);
        outcome.failure_reason = Some(reason.into());
        outcome
    }

    /// Outcome requesting another attempt under the node's retry policy.
    pub fn retry(reason: impl Into<String>) -> Self {
        let mut outcome = Self::with_status(StageStatus::Retry);
        outcome.failure_reason = Some(reason.into());
        outcome
    }

    /// Skipped outcome.
    pub fn skipped() -> Self {
        Self::with_status(StageStatus::Skipped)
    }

    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            failure_reason: None,
            notes: None,
            context_updates: HashMap::new(),
            suggested_next_ids: Vec::new(),
            preferred_label: None,
        }
    }

    /// Add a context update.
    pub fn with_context_update(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    /// Set the suggested next node IDs.
    pub fn with_suggested_next_ids(mut self, ids: Vec<String>) -> Self {
        self.suggested_next_ids = ids;
        self
    }

    /// Set the preferred label.
    pub fn with_preferred_label(mut self, label: impl Into<String>) -> Self {
        self.preferred_label = Some(label.into());
        self
    }

    /// Set the notes.
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}
