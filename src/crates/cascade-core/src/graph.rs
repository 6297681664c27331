//! Core graph data structures for pipeline definitions.
//!
//! A pipeline is a directed graph: nodes are stages, edges are transitions.
//! The structures here are produced by the parser, rewritten by transforms,
//! checked by the validator, and finally traversed by the executor.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      Graph                            │
//! │                                                       │
//! │   start ──▶ plan ──▶ implement ──▶ review ──▶ exit    │
//! │   (entry)                │            │    (terminal) │
//! │                          │            │               │
//! │                          ◀── fail ────┘               │
//! │                                                       │
//! │   attrs: { goal, default_fidelity, retry targets }    │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Nodes carry a raw attribute bag plus the set of keys the author wrote
//! explicitly, so scoped defaults and stylesheets can fill gaps without ever
//! clobbering an explicit value. Node insertion order is preserved: edge
//! selection and branch dispatch tie-break on declaration order.

use crate::error::{PipelineError, Result};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A single attribute value in a pipeline definition.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Duration literal (`250ms`, `90s`, `15m`, `2h`, `1d`), normalized.
    Duration(Duration),
}

impl AttrValue {
    /// String form, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer form. Strings holding an integer coerce.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Integer(i) => Some(*i),
            AttrValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Boolean form. String values `"true"`/`"false"` coerce.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Boolean(b) => Some(*b),
            AttrValue::String(s) if s == "true" => Some(true),
            AttrValue::String(s) if s == "false" => Some(false),
            _ => None,
        }
    }

    /// Milliseconds, for durations, bare integers, and quoted duration
    /// strings such as `"90s"`.
    pub fn as_millis(&self) -> Option<u64> {
        match self {
            AttrValue::Duration(d) => Some(d.as_millis() as u64),
            AttrValue::Integer(i) if *i >= 0 => Some(*i as u64),
            AttrValue::String(s) => parse_duration_str(s).map(|d| d.as_millis() as u64),
            _ => None,
        }
    }

    /// Render as display text (used for prompts, labels, conditions).
    pub fn to_text(&self) -> String {
        match self {
            AttrValue::String(s) => s.clone(),
            AttrValue::Integer(i) => i.to_string(),
            AttrValue::Float(f) => f.to_string(),
            AttrValue::Boolean(b) => b.to_string(),
            AttrValue::Duration(d) => format!("{}ms", d.as_millis()),
        }
    }

    /// Convert to a JSON value for context mirroring and checkpoints.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AttrValue::String(s) => serde_json::Value::String(s.clone()),
            AttrValue::Integer(i) => serde_json::json!(*i),
            AttrValue::Float(f) => serde_json::json!(*f),
            AttrValue::Boolean(b) => serde_json::Value::Bool(*b),
            AttrValue::Duration(d) => serde_json::json!(d.as_millis() as u64),
        }
    }
}

/// Parse a duration literal: integer count plus one of `ms`, `s`, `m`, `h`,
/// `d`. Returns `None` for anything else.
pub fn parse_duration_str(text: &str) -> Option<Duration> {
    let digits_end = text.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let count: u64 = text[..digits_end].parse().ok()?;
    match &text[digits_end..] {
        "ms" => Some(Duration::from_millis(count)),
        "s" => Some(Duration::from_secs(count)),
        "m" => Some(Duration::from_secs(count * 60)),
        "h" => Some(Duration::from_secs(count * 3600)),
        "d" => Some(Duration::from_secs(count * 86_400)),
        _ => None,
    }
}

/// How much ancestor context is presented to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FidelityMode {
    Full,
    Truncate,
    #[default]
    Compact,
    SummaryLow,
    SummaryMedium,
    SummaryHigh,
}

impl FidelityMode {
    /// Parse a fidelity tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "full" => Some(FidelityMode::Full),
            "truncate" => Some(FidelityMode::Truncate),
            "compact" => Some(FidelityMode::Compact),
            "summary:low" => Some(FidelityMode::SummaryLow),
            "summary:medium" => Some(FidelityMode::SummaryMedium),
            "summary:high" => Some(FidelityMode::SummaryHigh),
            _ => None,
        }
    }

    /// Canonical tag string.
    pub fn as_str(&self) -> &'static str {
        match self {
            FidelityMode::Full => "full",
            FidelityMode::Truncate => "truncate",
            FidelityMode::Compact => "compact",
            FidelityMode::SummaryLow => "summary:low",
            FidelityMode::SummaryMedium => "summary:medium",
            FidelityMode::SummaryHigh => "summary:high",
        }
    }

    /// All tags accepted by the validator.
    pub fn allowed_tags() -> &'static [&'static str] {
        &[
            "full",
            "truncate",
            "compact",
            "summary:low",
            "summary:medium",
            "summary:high",
        ]
    }
}

/// One stage in the pipeline.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Unique node ID.
    pub id: String,
    /// Attribute bag: scoped defaults merged with explicit attributes.
    pub attrs: HashMap<String, AttrValue>,
    /// Keys the author wrote explicitly on this node. Defaults and
    /// stylesheets never overwrite these.
    pub explicit_keys: HashSet<String>,
}

impl Node {
    /// Create a node with the given ID and no attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    /// Display label; defaults to the node ID.
    pub fn label(&self) -> &str {
        self.attr_str("label").unwrap_or(&self.id)
    }

    /// Semantic shape tag, empty when unset.
    pub fn shape(&self) -> &str {
        self.attr_str("shape").unwrap_or("")
    }

    /// Explicit handler type, if declared.
    pub fn handler_type(&self) -> Option<&str> {
        self.attr_str("type")
    }

    /// Prompt text, if declared.
    pub fn prompt(&self) -> Option<&str> {
        self.attr_str("prompt")
    }

    /// Per-node retry count override.
    pub fn max_retries(&self) -> Option<u32> {
        self.attrs
            .get("max_retries")
            .and_then(AttrValue::as_int)
            .map(|i| i.max(0) as u32)
    }

    /// True when this node gates successful termination.
    pub fn goal_gate(&self) -> bool {
        self.attrs
            .get("goal_gate")
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Remediation target consulted when this node's goal gate fails.
    pub fn retry_target(&self) -> Option<&str> {
        self.attr_str("retry_target")
    }

    /// Secondary remediation target.
    pub fn fallback_retry_target(&self) -> Option<&str> {
        self.attr_str("fallback_retry_target")
    }

    /// Node-level fidelity mode, if declared and valid.
    pub fn fidelity(&self) -> Option<FidelityMode> {
        self.attr_str("fidelity").and_then(FidelityMode::parse)
    }

    /// Thread-key override for history scoping.
    pub fn thread_id(&self) -> Option<&str> {
        self.attr_str("thread_id")
    }

    /// Class tag (from the author or the enclosing subgraph label).
    pub fn class(&self) -> Option<&str> {
        self.attr_str("class")
    }

    /// Stage timeout, if declared.
    pub fn timeout(&self) -> Option<Duration> {
        self.attrs
            .get("timeout")
            .and_then(AttrValue::as_millis)
            .map(Duration::from_millis)
    }

    /// Model override for LLM-backed handlers.
    pub fn llm_model(&self) -> Option<&str> {
        self.attr_str("llm_model")
    }

    /// Provider override for LLM-backed handlers.
    pub fn llm_provider(&self) -> Option<&str> {
        self.attr_str("llm_provider")
    }

    /// Reasoning-effort override for LLM-backed handlers.
    pub fn reasoning_effort(&self) -> Option<&str> {
        self.attr_str("reasoning_effort")
    }

    /// Whether the handler may infer status from its output.
    pub fn auto_status(&self) -> bool {
        self.attrs
            .get("auto_status")
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Whether retry exhaustion downgrades to partial success.
    pub fn allow_partial(&self) -> bool {
        self.attrs
            .get("allow_partial")
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// True when this node is the pipeline entry.
    pub fn is_entry(&self) -> bool {
        matches!(self.shape(), "entry" | "Mdiamond") || self.id == "start" || self.id == "Start"
    }

    /// True when this node terminates the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self.shape(), "terminal" | "Msquare") || self.id == "exit" || self.id == "end"
    }

    /// Set an attribute without marking it explicit (defaults, stylesheets).
    pub fn set_default_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        if !self.explicit_keys.contains(&key) {
            self.attrs.insert(key, value);
        }
    }

    /// Set an attribute the author wrote explicitly.
    pub fn set_explicit_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        self.attrs.insert(key.clone(), value);
        self.explicit_keys.insert(key);
    }
}

/// A transition between two stages.
#[derive(Debug, Clone, Default)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Attribute bag: edge defaults merged with explicit attributes.
    pub attrs: HashMap<String, AttrValue>,
    /// Keys written explicitly on this edge.
    pub explicit_keys: HashSet<String>,
}

impl Edge {
    /// Create a bare edge.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    /// Edge label, if any.
    pub fn label(&self) -> Option<&str> {
        self.attr_str("label")
    }

    /// Condition expression source; empty means always true.
    pub fn condition(&self) -> &str {
        self.attr_str("condition").unwrap_or("")
    }

    /// Integer weight for tie-breaking; defaults to 0.
    pub fn weight(&self) -> i64 {
        self.attrs
            .get("weight")
            .and_then(AttrValue::as_int)
            .unwrap_or(0)
    }

    /// Edge-level fidelity override.
    pub fn fidelity(&self) -> Option<FidelityMode> {
        self.attr_str("fidelity").and_then(FidelityMode::parse)
    }

    /// Edge-level thread key.
    pub fn thread_id(&self) -> Option<&str> {
        self.attr_str("thread_id")
    }

    /// Whether traversing this edge marks a loop restart.
    pub fn loop_restart(&self) -> bool {
        self.attrs
            .get("loop_restart")
            .and_then(AttrValue::as_bool)
            .unwrap_or(false)
    }

    /// Set an attribute without marking it explicit.
    pub fn set_default_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        if !self.explicit_keys.contains(&key) {
            self.attrs.insert(key, value);
        }
    }

    /// Set an explicit attribute.
    pub fn set_explicit_attr(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        self.attrs.insert(key.clone(), value);
        self.explicit_keys.insert(key);
    }
}

/// A named cluster of nodes with scoped defaults.
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub id: String,
    pub label: Option<String>,
    /// Subgraph-scope attributes other than `label`.
    pub attrs: HashMap<String, AttrValue>,
    /// Node-default frame active inside this subgraph.
    pub node_defaults: HashMap<String, AttrValue>,
    /// Edge-default frame active inside this subgraph.
    pub edge_defaults: HashMap<String, AttrValue>,
    /// IDs of nodes declared inside this subgraph.
    pub node_ids: Vec<String>,
}

impl Subgraph {
    /// Class name derived from the label: lowercased, spaces to `-`,
    /// other non-alphanumerics dropped.
    pub fn derived_class(&self) -> Option<String> {
        let label = self.label.as_deref()?;
        let mut class = String::with_capacity(label.len());
        for ch in label.chars() {
            if ch.is_ascii_alphanumeric() {
                class.push(ch.to_ascii_lowercase());
            } else if ch == ' ' {
                class.push('-');
            }
        }
        if class.is_empty() {
            None
        } else {
            Some(class)
        }
    }
}

/// A parsed pipeline definition.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Graph identifier from the `digraph <id>` header.
    pub id: String,
    /// Graph-level attributes (goal, label, defaults, retry targets,
    /// stylesheet source).
    pub attrs: HashMap<String, AttrValue>,
    /// Edges in declaration order.
    pub edges: Vec<Edge>,
    /// Subgraphs in declaration order.
    pub subgraphs: Vec<Subgraph>,
    nodes: HashMap<String, Node>,
    node_order: Vec<String>,
}

impl Graph {
    /// Create an empty graph with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Insert a node, preserving declaration order. Re-inserting an existing
    /// ID replaces the node but keeps its original position.
    pub fn add_node(&mut self, node: Node) {
        if !self.nodes.contains_key(&node.id) {
            self.node_order.push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
    }

    /// Look up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutable node lookup.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// True if a node with this ID exists.
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in declaration order.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &Node> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Node IDs in declaration order.
    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Append an edge.
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    /// Incoming edges of a node, in declaration order.
    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.to == node_id).collect()
    }

    /// The unique entry node, if present.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes_in_order().find(|n| n.is_entry())
    }

    /// All terminal nodes, in declaration order.
    pub fn terminal_nodes(&self) -> Vec<&Node> {
        self.nodes_in_order().filter(|n| n.is_terminal()).collect()
    }

    /// Entry node or a validation error.
    pub fn require_start_node(&self) -> Result<&Node> {
        self.start_node()
            .ok_or_else(|| PipelineError::Validation("graph has no start node".to_string()))
    }

    fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(AttrValue::as_str)
    }

    /// Graph goal, substituted into prompts as `$goal`.
    pub fn goal(&self) -> Option<&str> {
        self.attr_str("goal")
    }

    /// Graph-wide default retry count.
    pub fn default_max_retries(&self) -> Option<u32> {
        self.attrs
            .get("default_max_retries")
            .and_then(AttrValue::as_int)
            .map(|i| i.max(0) as u32)
    }

    /// Graph-wide default fidelity.
    pub fn default_fidelity(&self) -> Option<FidelityMode> {
        self.attr_str("default_fidelity")
            .and_then(FidelityMode::parse)
    }

    /// Graph-level goal-gate retry target.
    pub fn retry_target(&self) -> Option<&str> {
        self.attr_str("retry_target")
    }

    /// Graph-level fallback retry target.
    pub fn fallback_retry_target(&self) -> Option<&str> {
        self.attr_str("fallback_retry_target")
    }

    /// Stylesheet source, if declared.
    pub fn model_stylesheet(&self) -> Option<&str> {
        self.attr_str("model_stylesheet")
    }

    /// Subgraph enclosing a node, if any. When subgraphs nest, the innermost
    /// (latest-declared) wins.
    pub fn enclosing_subgraph(&self, node_id: &str) -> Option<&Subgraph> {
        self.subgraphs
            .iter()
            .rev()
            .find(|sg| sg.node_ids.iter().any(|id| id == node_id))
    }
}
