//! Property-style checks over the parser and retry schedule.

use cascade_core::graph::AttrValue;
use cascade_core::parser::parse;
use cascade_core::retry::BackoffPolicy;
use proptest::prelude::*;
use std::time::Duration;

fn ident_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_filter("keywords are reserved", |s| {
        !matches!(s.as_str(), "digraph" | "subgraph" | "node" | "edge" | "graph" | "true" | "false")
    })
}

proptest! {
    /// Parsed graphs reproduce the source surface: every declared node ID
    /// exists with its explicit attributes, and nothing extra appears.
    #[test]
    fn parser_round_trips_node_surface(
        ids in proptest::collection::hash_set(ident_strategy(), 1..8),
        weight in -1000i64..1000,
        prompt in "[ -~&&[^\"\\\\\\[\\]]]{0,40}",
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let mut source = String::from("digraph G {\n");
        for id in &ids {
            source.push_str(&format!("  {id} [prompt=\"{prompt}\", weight={weight}]\n"));
        }
        source.push('}');

        let graph = parse(&source).unwrap();
        prop_assert_eq!(graph.node_count(), ids.len());
        for id in &ids {
            let node = graph.node(id).unwrap();
            prop_assert_eq!(node.prompt(), Some(prompt.as_str()));
            prop_assert_eq!(node.attrs.get("weight"), Some(&AttrValue::Integer(weight)));
            // Exactly the two explicit keys, no phantom attributes.
            prop_assert_eq!(node.explicit_keys.len(), 2);
            prop_assert_eq!(node.attrs.len(), 2);
        }
    }

    /// Without jitter, the delay schedule never shrinks and pins to the cap
    /// once reached.
    #[test]
    fn backoff_delays_are_monotone(
        initial_ms in 1u64..2000,
        multiplier in 1.0f64..4.0,
        cap_ms in 1000u64..60_000,
    ) {
        let policy = BackoffPolicy {
            max_attempts: 24,
            initial_delay: Duration::from_millis(initial_ms),
            multiplier,
            max_delay: Duration::from_millis(cap_ms),
            jitter: false,
            sleep_enabled: false,
        };
        let mut previous = Duration::ZERO;
        let mut at_cap = false;
        for attempt in 2..24 {
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_delay);
            if at_cap {
                prop_assert_eq!(delay, policy.max_delay);
            }
            at_cap = delay == policy.max_delay;
            previous = delay;
        }
    }

    /// Edge chains produce one edge per hop in declaration order.
    #[test]
    fn edge_chains_expand_in_order(ids in proptest::collection::vec(ident_strategy(), 2..6)) {
        let source = format!("digraph G {{ {} }}", ids.join(" -> "));
        let graph = parse(&source).unwrap();
        prop_assert_eq!(graph.edges.len(), ids.len() - 1);
        for (i, edge) in graph.edges.iter().enumerate() {
            prop_assert_eq!(&edge.from, &ids[i]);
            prop_assert_eq!(&edge.to, &ids[i + 1]);
        }
    }
}
