//! Error types for the pipeline engine.

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while parsing, validating, or executing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The graph source could not be tokenized or parsed.
    #[error("parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Validation produced at least one error-severity diagnostic.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A node references a handler type that cannot be resolved.
    #[error("no handler registered for type '{handler_type}' (node '{node}')")]
    UnknownHandler { handler_type: String, node: String },

    /// A handler failed in a way that cannot be expressed as an Outcome.
    #[error("handler '{handler}' failed on node '{node}': {message}")]
    Handler {
        handler: String,
        node: String,
        message: String,
    },

    /// A goal-gated node was left unsatisfied with no retry route.
    #[error("goal gate unsatisfied for node '{node}' and no retry target is reachable")]
    GoalGateUnsatisfied { node: String },

    /// Checkpoint could not be read or written.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Execution was cancelled by the caller.
    #[error("pipeline cancelled")]
    Cancelled,

    /// A stage exceeded its configured timeout.
    #[error("node '{node}' timed out after {timeout_ms}ms")]
    StageTimeout { node: String, timeout_ms: u64 },

    /// Filesystem failure under the logs root.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint or status artifact could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Construct a parse error with a source position.
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        PipelineError::Parse {
            line,
            column,
            message: message.into(),
        }
    }
}
