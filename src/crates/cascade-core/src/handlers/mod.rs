//! Node handlers — the dispatch layer between graph nodes and work.
//!
//! Every node resolves to a handler through a three-step order: the node's
//! explicit `type` attribute, then a shape-based default, then the
//! registry's default handler type. Handlers receive the node, a read-only
//! context view, the graph, and the logs root; they report results as
//! [`Outcome`]s and must never mutate the graph. The engine writes each
//! stage's `status.json`; handlers may add further artifacts under
//! `<logs_root>/<node_id>/`.

mod agent;
mod basic;
mod codergen;
mod human;
mod parallel;
mod tool;

pub use agent::CodingAgentHandler;
pub use basic::{ConditionalHandler, ExitHandler, StartHandler};
pub use codergen::{CodergenBackend, CodergenHandler};
pub use human::WaitHumanHandler;
pub use parallel::{BranchExecutor, FanInHandler, ParallelHandler};
pub use tool::ToolHandler;

use crate::context::Context;
use crate::error::Result;
use crate::events::EventEmitter;
use crate::graph::{Graph, Node};
use crate::interview::Interviewer;
use crate::outcome::Outcome;
use crate::session::SessionFactory;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

/// A node handler. Implementations must not mutate the graph.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Type string this handler registers under.
    fn handler_type(&self) -> &str;

    /// Execute one stage.
    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome>;
}

/// Shape → default handler type table.
pub fn shape_to_type(shape: &str) -> Option<&'static str> {
    match shape {
        "entry" | "Mdiamond" => Some("start"),
        "terminal" | "Msquare" => Some("exit"),
        "diamond" => Some("conditional"),
        "hexagon" | "human" => Some("wait.human"),
        "parallelogram" | "parallel" => Some("parallel"),
        "trapezium" | "fan_in" => Some("parallel.fan_in"),
        "cds" | "tool" => Some("tool"),
        "component" | "agent" => Some("coding_agent"),
        "box" => Some("codergen"),
        _ => None,
    }
}

/// Maps handler type strings to handler implementations. Read-only after
/// construction.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
    default_type: String,
}

impl HandlerRegistry {
    /// Empty registry with `codergen` as the default type.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            default_type: "codergen".to_string(),
        }
    }

    /// Register a handler under its own type string.
    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers
            .insert(handler.handler_type().to_string(), handler);
    }

    /// Set the fallback type used when neither `type` nor shape resolves.
    pub fn set_default_type(&mut self, handler_type: impl Into<String>) {
        self.default_type = handler_type.into();
    }

    /// Look up a handler by type.
    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// True if a handler is registered under this type.
    pub fn has(&self, handler_type: &str) -> bool {
        self.handlers.contains_key(handler_type)
    }

    /// Resolve a node's handler type: explicit `type` > shape default >
    /// registry default. ID-based entry/terminal detection participates the
    /// same way shapes do.
    pub fn resolve_type(&self, node: &Node) -> String {
        if let Some(explicit) = node.handler_type() {
            return explicit.to_string();
        }
        if let Some(shape_type) = shape_to_type(node.shape()) {
            return shape_type.to_string();
        }
        if node.is_entry() {
            return "start".to_string();
        }
        if node.is_terminal() {
            return "exit".to_string();
        }
        self.default_type.clone()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Injected collaborators the default registry wires into its handlers.
pub struct HandlerDeps {
    pub backend: Arc<dyn CodergenBackend>,
    pub interviewer: Arc<dyn Interviewer>,
    pub session_factory: Option<Arc<dyn SessionFactory>>,
    pub emitter: EventEmitter,
}

/// Branch executor handed to the parallel handler; resolves the registry
/// lazily through a weak reference so registry construction stays acyclic.
pub(crate) struct RegistryBranchExecutor {
    pub(crate) registry: OnceLock<Weak<HandlerRegistry>>,
    pub(crate) emitter: EventEmitter,
}

/// Build the registry of built-in handlers, wired to the given deps.
pub fn default_registry(deps: &HandlerDeps) -> Arc<HandlerRegistry> {
    let branch_executor = Arc::new(RegistryBranchExecutor {
        registry: OnceLock::new(),
        emitter: deps.emitter.clone(),
    });

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(StartHandler));
    registry.register(Arc::new(ExitHandler));
    registry.register(Arc::new(ConditionalHandler));
    registry.register(Arc::new(CodergenHandler::new(deps.backend.clone())));
    registry.register(Arc::new(WaitHumanHandler::new(
        deps.interviewer.clone(),
        deps.emitter.clone(),
    )));
    registry.register(Arc::new(ParallelHandler::new(
        branch_executor.clone(),
        deps.emitter.clone(),
    )));
    registry.register(Arc::new(FanInHandler));
    registry.register(Arc::new(ToolHandler));
    registry.register(Arc::new(CodingAgentHandler::new(
        deps.session_factory.clone(),
    )));

    let registry = Arc::new(registry);
    // The weak reference breaks the registry → parallel → executor cycle.
    let _ = branch_executor.registry.set(Arc::downgrade(&registry));
    registry
}
