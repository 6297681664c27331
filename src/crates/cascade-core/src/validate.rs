//! Graph validation — lint rules producing diagnostics.
//!
//! A fixed rule set runs over every graph before execution; callers may
//! append extra rules. Error-severity diagnostics abort via
//! [`validate_or_raise`]; warnings and info flow through for reporting.

use crate::condition::parse_condition;
use crate::error::{PipelineError, Result};
use crate::graph::{FidelityMode, Graph};
use crate::stylesheet::parse_stylesheet;
use std::collections::HashSet;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One validation finding.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Stable rule tag (`reachability`, `edge_integrity`, …).
    pub rule: String,
    pub message: String,
    /// Offending node, when the finding is node-scoped.
    pub node_id: Option<String>,
}

impl Diagnostic {
    fn error(rule: &str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self::new(Severity::Error, rule, message, node_id)
    }

    fn warning(rule: &str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self::new(Severity::Warning, rule, message, node_id)
    }

    fn new(severity: Severity, rule: &str, message: impl Into<String>, node_id: Option<&str>) -> Self {
        Self {
            severity,
            rule: rule.to_string(),
            message: message.into(),
            node_id: node_id.map(str::to_string),
        }
    }
}

/// A caller-supplied validation rule.
pub type ValidationRule = Box<dyn Fn(&Graph) -> Vec<Diagnostic> + Send + Sync>;

/// Handler type strings the default registry knows.
pub const KNOWN_HANDLER_TYPES: &[&str] = &[
    "start",
    "exit",
    "codergen",
    "wait.human",
    "conditional",
    "parallel",
    "parallel.fan_in",
    "tool",
    "coding_agent",
];

/// Run the built-in rule set plus any extras.
pub fn validate(graph: &Graph, extra_rules: &[ValidationRule]) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_start_terminal(graph, &mut diagnostics);
    check_edge_integrity(graph, &mut diagnostics);
    check_reachability(graph, &mut diagnostics);
    check_conditions(graph, &mut diagnostics);
    check_stylesheet(graph, &mut diagnostics);
    check_retry_targets(graph, &mut diagnostics);
    check_goal_gates(graph, &mut diagnostics);
    check_fidelity_tags(graph, &mut diagnostics);
    check_handler_types(graph, &mut diagnostics);
    check_llm_nodes(graph, &mut diagnostics);
    check_unknown_keys(graph, &mut diagnostics);
    for rule in extra_rules {
        diagnostics.extend(rule(graph));
    }
    diagnostics
}

/// Validate and fail on the first error-severity diagnostic batch.
pub fn validate_or_raise(graph: &Graph, extra_rules: &[ValidationRule]) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph, extra_rules);
    let errors: Vec<&Diagnostic> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if errors.is_empty() {
        for diag in diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
        {
            tracing::warn!(rule = %diag.rule, "{}", diag.message);
        }
        Ok(diagnostics)
    } else {
        let joined = errors
            .iter()
            .map(|d| format!("[{}] {}", d.rule, d.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(PipelineError::Validation(joined))
    }
}

fn check_start_terminal(graph: &Graph, out: &mut Vec<Diagnostic>) {
    let starts: Vec<&str> = graph
        .nodes_in_order()
        .filter(|n| n.is_entry())
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        0 => out.push(Diagnostic::error(
            "start_node",
            "graph has no start node (shape=entry or id 'start')",
            None,
        )),
        1 => {}
        _ => out.push(Diagnostic::error(
            "start_node",
            format!("graph has multiple start nodes: {}", starts.join(", ")),
            None,
        )),
    }

    let terminals = graph.terminal_nodes();
    if terminals.is_empty() {
        out.push(Diagnostic::error(
            "terminal_node",
            "graph has no terminal node (shape=terminal or id 'exit'/'end')",
            None,
        ));
    }

    for start in &starts {
        if !graph.incoming_edges(start).is_empty() {
            out.push(Diagnostic::error(
                "start_degree",
                format!("start node '{start}' must have no incoming edges"),
                Some(start),
            ));
        }
    }
    for terminal in terminals {
        if !graph.outgoing_edges(&terminal.id).is_empty() {
            out.push(Diagnostic::error(
                "terminal_degree",
                format!("terminal node '{}' must have no outgoing edges", terminal.id),
                Some(&terminal.id),
            ));
        }
    }
}

fn check_edge_integrity(graph: &Graph, out: &mut Vec<Diagnostic>) {
    for edge in &graph.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !graph.has_node(endpoint) {
                out.push(Diagnostic::error(
                    "edge_integrity",
                    format!(
                        "edge '{}' -> '{}' references unknown node '{endpoint}'",
                        edge.from, edge.to
                    ),
                    Some(endpoint),
                ));
            }
        }
    }
}

/// BFS from the start node; every node must be reachable.
fn check_reachability(graph: &Graph, out: &mut Vec<Diagnostic>) {
    let Some(start) = graph.start_node() else {
        return; // Reported by the cardinality rule.
    };
    let reachable = reachable_from(graph, &start.id);
    for node in graph.nodes_in_order() {
        if !reachable.contains(node.id.as_str()) {
            out.push(Diagnostic::error(
                "reachability",
                format!("node '{}' is not reachable from start", node.id),
                Some(&node.id),
            ));
        }
    }
}

pub(crate) fn reachable_from<'g>(graph: &'g Graph, from: &str) -> HashSet<&'g str> {
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: Vec<&str> = Vec::new();
    if let Some(node) = graph.node(from) {
        reachable.insert(node.id.as_str());
        queue.push(node.id.as_str());
    }
    while let Some(current) = queue.pop() {
        for edge in graph.outgoing_edges(current) {
            if let Some(target) = graph.node(&edge.to) {
                if reachable.insert(target.id.as_str()) {
                    queue.push(target.id.as_str());
                }
            }
        }
    }
    reachable
}

fn check_conditions(graph: &Graph, out: &mut Vec<Diagnostic>) {
    for edge in &graph.edges {
        if let Err(err) = parse_condition(edge.condition()) {
            out.push(Diagnostic::error(
                "condition_syntax",
                format!("edge '{}' -> '{}': {err}", edge.from, edge.to),
                None,
            ));
        }
    }
}

fn check_stylesheet(graph: &Graph, out: &mut Vec<Diagnostic>) {
    if let Some(source) = graph.model_stylesheet() {
        if let Err(err) = parse_stylesheet(source) {
            out.push(Diagnostic::error("stylesheet_syntax", err.to_string(), None));
        }
    }
}

fn check_retry_targets(graph: &Graph, out: &mut Vec<Diagnostic>) {
    let mut check = |target: Option<&str>, owner: &str, kind: &str| {
        if let Some(target) = target {
            if !graph.has_node(target) {
                out.push(Diagnostic::error(
                    "retry_target",
                    format!("{kind} '{target}' on '{owner}' references unknown node"),
                    Some(owner),
                ));
            }
        }
    };
    check(graph.retry_target(), "graph", "retry_target");
    check(graph.fallback_retry_target(), "graph", "fallback_retry_target");
    let node_targets: Vec<(String, Option<String>, Option<String>)> = graph
        .nodes_in_order()
        .map(|n| {
            (
                n.id.clone(),
                n.retry_target().map(str::to_string),
                n.fallback_retry_target().map(str::to_string),
            )
        })
        .collect();
    for (id, target, fallback) in node_targets {
        check(target.as_deref(), &id, "retry_target");
        check(fallback.as_deref(), &id, "fallback_retry_target");
    }
}

fn check_goal_gates(graph: &Graph, out: &mut Vec<Diagnostic>) {
    let reachable = graph
        .start_node()
        .map(|s| reachable_from(graph, &s.id))
        .unwrap_or_default();
    for node in graph.nodes_in_order() {
        if !node.goal_gate() {
            continue;
        }
        let target = node
            .retry_target()
            .or_else(|| node.fallback_retry_target())
            .or_else(|| graph.retry_target())
            .or_else(|| graph.fallback_retry_target());
        match target {
            None => out.push(Diagnostic::error(
                "goal_gate",
                format!(
                    "goal-gated node '{}' has no node-level or graph-level retry target",
                    node.id
                ),
                Some(&node.id),
            )),
            Some(target) if graph.has_node(target) && !reachable.contains(target) => {
                out.push(Diagnostic::error(
                    "goal_gate",
                    format!(
                        "goal-gated node '{}' retry target '{target}' is unreachable",
                        node.id
                    ),
                    Some(&node.id),
                ));
            }
            Some(_) => {} // Missing targets are reported by retry_target.
        }
    }
}

fn check_fidelity_tags(graph: &Graph, out: &mut Vec<Diagnostic>) {
    let mut check = |tag: Option<&str>, owner: String| {
        if let Some(tag) = tag {
            if FidelityMode::parse(tag).is_none() {
                out.push(Diagnostic::error(
                    "fidelity_tag",
                    format!(
                        "{owner}: unknown fidelity '{tag}' (allowed: {})",
                        FidelityMode::allowed_tags().join(", ")
                    ),
                    None,
                ));
            }
        }
    };
    check(
        graph.attrs.get("default_fidelity").and_then(|v| v.as_str()),
        "graph".to_string(),
    );
    for node in graph.nodes_in_order() {
        check(
            node.attrs.get("fidelity").and_then(|v| v.as_str()),
            format!("node '{}'", node.id),
        );
    }
    for edge in &graph.edges {
        check(
            edge.attrs.get("fidelity").and_then(|v| v.as_str()),
            format!("edge '{}' -> '{}'", edge.from, edge.to),
        );
    }
}

fn check_handler_types(graph: &Graph, out: &mut Vec<Diagnostic>) {
    for node in graph.nodes_in_order() {
        if let Some(handler_type) = node.handler_type() {
            if !KNOWN_HANDLER_TYPES.contains(&handler_type) {
                out.push(Diagnostic::warning(
                    "handler_type",
                    format!("node '{}' declares unknown type '{handler_type}'", node.id),
                    Some(&node.id),
                ));
            }
        }
    }
}

/// Well-known node attribute keys. Anything else is reported at info
/// severity: free-form keys are allowed for extensibility, but a typo in a
/// well-known key would otherwise be silently ignored.
const KNOWN_NODE_KEYS: &[&str] = &[
    "label",
    "shape",
    "type",
    "prompt",
    "max_retries",
    "goal_gate",
    "retry_target",
    "fallback_retry_target",
    "fidelity",
    "thread_id",
    "class",
    "timeout",
    "llm_model",
    "llm_provider",
    "reasoning_effort",
    "auto_status",
    "allow_partial",
    "on_fail",
    "command",
    "output_key",
    "default_choice",
    "join_policy",
    "error_policy",
    "max_parallel",
];

fn check_unknown_keys(graph: &Graph, out: &mut Vec<Diagnostic>) {
    for node in graph.nodes_in_order() {
        for key in node.attrs.keys() {
            if !KNOWN_NODE_KEYS.contains(&key.as_str()) {
                out.push(Diagnostic::new(
                    Severity::Info,
                    "unknown_key",
                    format!("node '{}' has unrecognized attribute '{key}'", node.id),
                    Some(&node.id),
                ));
            }
        }
    }
}

/// LLM-backed nodes should carry a prompt or a meaningful label.
fn check_llm_nodes(graph: &Graph, out: &mut Vec<Diagnostic>) {
    for node in graph.nodes_in_order() {
        let is_llm = node.handler_type() == Some("codergen")
            || (node.handler_type().is_none()
                && !node.is_entry()
                && !node.is_terminal()
                && node.shape().is_empty());
        if is_llm && node.prompt().is_none() && node.label() == node.id {
            out.push(Diagnostic::warning(
                "llm_prompt",
                format!("LLM node '{}' has neither prompt nor label", node.id),
                Some(&node.id),
            ));
        }
    }
}
