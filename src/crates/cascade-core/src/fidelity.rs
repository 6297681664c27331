//! Fidelity resolution — how much history a handler sees.
//!
//! Each stage receives a rendered block of prior outcomes. The fidelity mode
//! controls how many entries appear and how much of their notes survive;
//! precedence is edge > node > graph default > `compact`. A separate thread
//! key scopes which history belongs together: node override > edge override
//! > the enclosing subgraph's derived class > the previous node's ID.

use crate::graph::{Edge, FidelityMode, Graph, Node};
use crate::outcome::Outcome;

/// One prior stage, as presented to later handlers.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub node_id: String,
    pub status: String,
    pub notes: Option<String>,
}

impl HistoryEntry {
    /// Build an entry from a recorded outcome.
    pub fn from_outcome(node_id: &str, outcome: &Outcome) -> Self {
        Self {
            node_id: node_id.to_string(),
            status: outcome.status.as_str().to_string(),
            notes: outcome.notes.clone(),
        }
    }
}

/// Resolve the effective fidelity for a stage.
pub fn resolve_fidelity(edge: Option<&Edge>, node: &Node, graph: &Graph) -> FidelityMode {
    edge.and_then(Edge::fidelity)
        .or_else(|| node.fidelity())
        .or_else(|| graph.default_fidelity())
        .unwrap_or_default()
}

/// Resolve the thread key scoping a stage's history.
pub fn resolve_thread_key(
    node: &Node,
    edge: Option<&Edge>,
    graph: &Graph,
    previous_node: Option<&str>,
) -> Option<String> {
    if let Some(key) = node.thread_id() {
        return Some(key.to_string());
    }
    if let Some(key) = edge.and_then(Edge::thread_id) {
        return Some(key.to_string());
    }
    if let Some(class) = graph
        .enclosing_subgraph(&node.id)
        .and_then(|sg| sg.derived_class())
    {
        return Some(class);
    }
    previous_node.map(str::to_string)
}

/// Per-mode bounds: (max entries, max note chars, include notes).
fn mode_bounds(mode: FidelityMode) -> (usize, usize, bool) {
    match mode {
        FidelityMode::Full => (usize::MAX, usize::MAX, true),
        FidelityMode::Truncate => (10, 500, true),
        FidelityMode::Compact => (5, 0, false),
        FidelityMode::SummaryLow => (3, 0, false),
        FidelityMode::SummaryMedium => (5, 200, true),
        FidelityMode::SummaryHigh => (10, 400, true),
    }
}

/// Render the context block handed to a handler.
pub fn render_context_block(mode: FidelityMode, history: &[HistoryEntry]) -> String {
    let (max_entries, max_note_chars, include_notes) = mode_bounds(mode);
    let start = history.len().saturating_sub(max_entries.min(history.len()));
    let mut block = String::new();
    for entry in &history[start..] {
        block.push_str(&format!("- {}: {}", entry.node_id, entry.status));
        if include_notes {
            if let Some(notes) = &entry.notes {
                let clipped: String = notes.chars().take(max_note_chars).collect();
                if !clipped.is_empty() {
                    block.push_str(" — ");
                    block.push_str(&clipped);
                    if notes.chars().count() > max_note_chars {
                        block.push('…');
                    }
                }
            }
        }
        block.push('\n');
    }
    block
}
