//! Edge selection — choosing the next stage after an outcome.
//!
//! Selection is deterministic: suggested next IDs short-circuit everything;
//! otherwise conditions are evaluated over the outcome and context in edge
//! declaration order, and the winner among passing edges is the highest
//! weight with declaration order breaking ties.

use crate::condition::{evaluate_condition, parse_condition};
use crate::context::Context;
use crate::graph::{Edge, Graph};
use crate::outcome::Outcome;

/// Select the next edge out of `node_id`, or `None` when nothing matches.
pub fn select_edge<'g>(
    graph: &'g Graph,
    node_id: &str,
    outcome: &Outcome,
    context: &Context,
) -> Option<&'g Edge> {
    let outgoing = graph.outgoing_edges(node_id);
    if outgoing.is_empty() {
        return None;
    }

    // Handler-suggested successors win outright, first declaration-order
    // match among the suggestions.
    if !outcome.suggested_next_ids.is_empty() {
        for edge in &outgoing {
            if outcome.suggested_next_ids.iter().any(|id| id == &edge.to) {
                return Some(edge);
            }
        }
    }

    let resolve = |key: &str| resolve_key(key, outcome, context);
    let mut best: Option<&Edge> = None;
    for edge in outgoing {
        let expr = match parse_condition(edge.condition()) {
            Ok(expr) => expr,
            Err(err) => {
                // Validation catches this before execution; a malformed
                // condition reached at runtime simply never matches.
                tracing::warn!(
                    from = %edge.from,
                    to = %edge.to,
                    error = %err,
                    "skipping edge with malformed condition"
                );
                continue;
            }
        };
        if !evaluate_condition(&expr, resolve) {
            continue;
        }
        match best {
            // Strictly-greater keeps the earliest declared edge on ties.
            Some(current) if edge.weight() <= current.weight() => {}
            _ => best = Some(edge),
        }
    }
    best
}

/// Key resolution for edge conditions: `outcome`, `preferred_label`,
/// `context.X` (falling back to the unqualified key), anything else straight
/// from the context.
fn resolve_key(key: &str, outcome: &Outcome, context: &Context) -> Option<String> {
    match key {
        "outcome" => Some(outcome.status.as_str().to_string()),
        "preferred_label" => Some(outcome.preferred_label.clone().unwrap_or_default()),
        _ => {
            if let Some(stripped) = key.strip_prefix("context.") {
                context
                    .get_str(stripped)
                    .or_else(|| context.get_str(key))
            } else {
                context.get_str(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::parser::parse;
    use serde_json::json;

    #[test]
    fn test_declaration_order_when_weights_tie() {
        let graph = parse(
            r#"digraph X {
                a -> b
                a -> c
            }"#,
        )
        .unwrap();
        let edge = select_edge(&graph, "a", &Outcome::success(), &Context::new()).unwrap();
        assert_eq!(edge.to, "b");
    }

    #[test]
    fn test_weight_beats_declaration_order() {
        let graph = parse(
            r#"digraph X {
                a -> b [weight=1]
                a -> c [weight=5]
            }"#,
        )
        .unwrap();
        let edge = select_edge(&graph, "a", &Outcome::success(), &Context::new()).unwrap();
        assert_eq!(edge.to, "c");
    }

    #[test]
    fn test_condition_filters_candidates() {
        let graph = parse(
            r#"digraph X {
                a -> b [condition="outcome=success", weight=1]
                a -> c [condition="outcome=fail", weight=5]
            }"#,
        )
        .unwrap();
        let edge = select_edge(&graph, "a", &Outcome::success(), &Context::new()).unwrap();
        assert_eq!(edge.to, "b");
        let edge = select_edge(&graph, "a", &Outcome::fail("x"), &Context::new()).unwrap();
        assert_eq!(edge.to, "c");
    }

    #[test]
    fn test_suggested_ids_short_circuit() {
        let graph = parse(
            r#"digraph X {
                a -> b [weight=9]
                a -> c
            }"#,
        )
        .unwrap();
        let outcome = Outcome::success().with_suggested_next_ids(vec!["c".to_string()]);
        let edge = select_edge(&graph, "a", &outcome, &Context::new()).unwrap();
        assert_eq!(edge.to, "c");

        // Suggestion without a matching edge falls back to conditions.
        let outcome = Outcome::success().with_suggested_next_ids(vec!["ghost".to_string()]);
        let edge = select_edge(&graph, "a", &outcome, &Context::new()).unwrap();
        assert_eq!(edge.to, "b");
    }

    #[test]
    fn test_context_key_resolution() {
        let graph = parse(
            r#"digraph X {
                a -> b [condition="context.approved=true"]
                a -> c
            }"#,
        )
        .unwrap();
        let mut context = Context::new();
        context.set("approved", json!(true));
        let edge = select_edge(&graph, "a", &Outcome::success(), &context).unwrap();
        assert_eq!(edge.to, "b");

        let edge = select_edge(&graph, "a", &Outcome::success(), &Context::new()).unwrap();
        assert_eq!(edge.to, "c");
    }

    #[test]
    fn test_preferred_label_resolution() {
        let graph = parse(
            r#"digraph X {
                a -> b [condition="preferred_label=retry"]
                a -> c
            }"#,
        )
        .unwrap();
        let outcome = Outcome::success().with_preferred_label("retry");
        assert_eq!(select_edge(&graph, "a", &outcome, &Context::new()).unwrap().to, "b");
        assert_eq!(
            select_edge(&graph, "a", &Outcome::success(), &Context::new())
                .unwrap()
                .to,
            "c"
        );
    }

    #[test]
    fn test_no_match_returns_none() {
        let graph = parse(
            r#"digraph X {
                a -> b [condition="outcome=fail"]
            }"#,
        )
        .unwrap();
        assert!(select_edge(&graph, "a", &Outcome::success(), &Context::new()).is_none());
        assert!(select_edge(&graph, "b", &Outcome::success(), &Context::new()).is_none());
    }

    #[test]
    fn test_determinism_over_repeated_invocations() {
        let graph = parse(
            r#"digraph X {
                a -> b [weight=2]
                a -> c [weight=2]
                a -> d [weight=1]
            }"#,
        )
        .unwrap();
        let outcome = Outcome::success();
        let context = Context::new();
        let first = select_edge(&graph, "a", &outcome, &context).unwrap().to.clone();
        for _ in 0..1000 {
            let next = select_edge(&graph, "a", &outcome, &context).unwrap();
            assert_eq!(next.to, first);
        }
        assert_eq!(first, "b");
    }
}
