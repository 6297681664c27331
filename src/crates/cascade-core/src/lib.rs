//! Cascade core — a graph-driven pipeline execution engine.
//!
//! Pipelines are written in a strict directed-graph language: nodes are
//! stages (LLM tasks, tool runs, human gates, parallel fan-outs), edges are
//! conditional transitions. This crate parses that language, rewrites and
//! validates the graph, and drives it to completion with retries,
//! checkpoint-based resumption, goal-gate enforcement, and bounded parallel
//! branches.
//!
//! # Pipeline lifecycle
//!
//! ```text
//! source ──▶ parse ──▶ transform ──▶ validate ──▶ execute ──▶ result
//!              │           │            │            │
//!           lexer.rs   transform.rs  validate.rs  engine.rs
//!           parser.rs  stylesheet.rs              handlers/
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use cascade_core::{load_graph, default_registry, HandlerDeps, PipelineConfig, PipelineExecutor};
//! use cascade_core::events::EventEmitter;
//! use std::sync::Arc;
//!
//! let graph = load_graph(r#"digraph build {
//!     graph [goal="Ship the feature"]
//!     start [shape=entry]
//!     implement [prompt="Implement: $goal"]
//!     done [shape=terminal]
//!     start -> implement -> done
//! }"#)?;
//!
//! let emitter = EventEmitter::default();
//! let registry = default_registry(&HandlerDeps {
//!     backend: my_llm_backend,
//!     interviewer: Arc::new(cascade_core::interview::AutoApproveInterviewer),
//!     session_factory: None,
//!     emitter: emitter.clone(),
//! });
//! let executor = PipelineExecutor::new(registry, emitter);
//! let result = executor.run(&graph, PipelineConfig::new("logs")).await?;
//! ```

pub mod checkpoint;
pub mod condition;
pub mod context;
pub mod edges;
pub mod engine;
pub mod error;
pub mod events;
pub mod fidelity;
pub mod graph;
pub mod handlers;
pub mod interview;
pub mod lexer;
pub mod outcome;
pub mod parser;
pub mod retry;
pub mod session;
pub mod stylesheet;
pub mod transform;
pub mod validate;

pub use checkpoint::{clear_checkpoint, load_checkpoint, save_checkpoint, PipelineCheckpoint};
pub use condition::{evaluate_condition, parse_condition, Clause, ConditionExpr, Operator};
pub use context::Context;
pub use edges::select_edge;
pub use engine::{PipelineConfig, PipelineExecutor, PipelineResult, PipelineStatus};
pub use error::{PipelineError, Result};
pub use events::{EventEmitter, PipelineEvent, PipelineEventKind};
pub use fidelity::{render_context_block, resolve_fidelity, resolve_thread_key};
pub use graph::{AttrValue, Edge, FidelityMode, Graph, Node, Subgraph};
pub use handlers::{
    default_registry, BranchExecutor, CodergenBackend, HandlerDeps, HandlerRegistry, NodeHandler,
};
pub use interview::{Answer, AutoApproveInterviewer, Interviewer, Question, RecordingInterviewer};
pub use outcome::{Outcome, StageStatus};
pub use parser::parse;
pub use retry::{classify_error, BackoffPolicy, RetryClass};
pub use session::{AgentSession, SessionEvent, SessionFactory, SessionResult};
pub use transform::{apply_transforms, builtin_transforms, GraphTransform};
pub use validate::{validate, validate_or_raise, Diagnostic, Severity, ValidationRule};

/// Parse source and run the built-in transforms: the standard way to load a
/// pipeline definition before validation and execution.
pub fn load_graph(source: &str) -> Result<Graph> {
    let graph = parser::parse(source)?;
    transform::apply_transforms(graph, &transform::builtin_transforms())
}
