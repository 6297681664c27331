//! Parallel fan-out and fan-in handlers.
//!
//! The fan-out handler dispatches one branch per outgoing edge through a
//! [`BranchExecutor`] callback supplied at registry construction (the
//! callback resolves handlers through a weak registry reference, which keeps
//! the modules acyclic). Branches run in batches of `max_parallel`, each on
//! an isolated context clone. Results land in the `parallel.results` context
//! key for the downstream fan-in handler.
//!
//! Policies (node attributes):
//! - `join_policy`: `wait_all` (default) | `first_success` | `any`
//! - `error_policy`: `continue` (default) | `fail_fast`
//! - `max_parallel`: batch width, default 4

use super::{NodeHandler, RegistryBranchExecutor};
use crate::checkpoint::save_status;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::events::{EventEmitter, PipelineEventKind};
use crate::graph::{Edge, Graph, Node};
use crate::outcome::{Outcome, StageStatus};
use crate::retry::{policy_for_node, run_with_retry};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

/// Executes a single parallel branch. The engine's registry wiring provides
/// the production implementation; tests may inject their own.
#[async_trait]
pub trait BranchExecutor: Send + Sync {
    async fn execute_branch(
        &self,
        branch_id: &str,
        target_node_id: &str,
        context: Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome>;
}

#[async_trait]
impl BranchExecutor for RegistryBranchExecutor {
    async fn execute_branch(
        &self,
        branch_id: &str,
        target_node_id: &str,
        context: Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let registry = self
            .registry
            .get()
            .and_then(std::sync::Weak::upgrade)
            .ok_or_else(|| PipelineError::Other("handler registry dropped".to_string()))?;
        let node = graph.node(target_node_id).ok_or_else(|| {
            PipelineError::Other(format!("branch target '{target_node_id}' not found"))
        })?;
        let handler_type = registry.resolve_type(node);
        let handler = registry
            .get(&handler_type)
            .ok_or_else(|| PipelineError::UnknownHandler {
                handler_type: handler_type.clone(),
                node: node.id.clone(),
            })?;

        tracing::debug!(branch = branch_id, node = %node.id, "executing parallel branch");
        let policy = policy_for_node(node, graph);
        let run = run_with_retry(
            &policy,
            &node.id,
            node.allow_partial(),
            &self.emitter,
            |_| handler.execute(node, &context, graph, logs_root),
        )
        .await;
        save_status(logs_root, &node.id, &run.outcome)?;
        Ok(run.outcome)
    }
}

/// Bounded-concurrency fan-out handler.
pub struct ParallelHandler {
    executor: Arc<dyn BranchExecutor>,
    emitter: EventEmitter,
}

impl ParallelHandler {
    pub fn new(executor: Arc<dyn BranchExecutor>, emitter: EventEmitter) -> Self {
        Self { executor, emitter }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinPolicy {
    WaitAll,
    FirstSuccess,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorPolicy {
    Continue,
    FailFast,
}

fn read_policies(node: &Node) -> (JoinPolicy, ErrorPolicy, usize) {
    let join = match node.attrs.get("join_policy").and_then(|v| v.as_str()) {
        Some("first_success") => JoinPolicy::FirstSuccess,
        Some("any") => JoinPolicy::Any,
        _ => JoinPolicy::WaitAll,
    };
    let error = match node.attrs.get("error_policy").and_then(|v| v.as_str()) {
        Some("fail_fast") => ErrorPolicy::FailFast,
        _ => ErrorPolicy::Continue,
    };
    let max_parallel = node
        .attrs
        .get("max_parallel")
        .and_then(|v| v.as_int())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(4);
    (join, error, max_parallel)
}

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let (join_policy, error_policy, max_parallel) = read_policies(node);
        let edges = graph.outgoing_edges(&node.id);
        // An edge straight to a fan-in node is the join route, not a branch.
        let (join_edges, branch_edges): (Vec<&Edge>, Vec<&Edge>) = edges
            .into_iter()
            .partition(|edge| is_fan_in(graph, &edge.to));
        let branches: Vec<(String, String)> = branch_edges
            .iter()
            .map(|edge| {
                let branch_id = edge
                    .label()
                    .map(str::to_string)
                    .unwrap_or_else(|| edge.to.clone());
                (branch_id, edge.to.clone())
            })
            .collect();

        self.emitter.emit(PipelineEventKind::ParallelStarted {
            node_id: node.id.clone(),
            branch_count: branches.len(),
        });

        let mut results: Vec<(String, Outcome)> = Vec::with_capacity(branches.len());
        let mut aborted = false;
        for batch in branches.chunks(max_parallel) {
            let futures = batch.iter().map(|(branch_id, target)| {
                let branch_context = context.clone();
                let executor = self.executor.clone();
                let emitter = self.emitter.clone();
                let node_id = node.id.clone();
                async move {
                    emitter.emit(PipelineEventKind::BranchStarted {
                        node_id: node_id.clone(),
                        branch_id: branch_id.clone(),
                    });
                    let outcome = match executor
                        .execute_branch(branch_id, target, branch_context, graph, logs_root)
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(err) => Outcome::fail(err.to_string()),
                    };
                    emitter.emit(PipelineEventKind::BranchCompleted {
                        node_id,
                        branch_id: branch_id.clone(),
                        status: outcome.status.as_str().to_string(),
                    });
                    (branch_id.clone(), outcome)
                }
            });
            let batch_results = join_all(futures).await;
            let batch_failed = batch_results
                .iter()
                .any(|(_, outcome)| !outcome.status.is_satisfactory());
            results.extend(batch_results);
            if error_policy == ErrorPolicy::FailFast && batch_failed {
                aborted = true;
                break;
            }
        }

        let success_count = results
            .iter()
            .filter(|(_, o)| o.status.is_satisfactory())
            .count();
        let fail_count = results.len() - success_count;

        self.emitter.emit(PipelineEventKind::ParallelCompleted {
            node_id: node.id.clone(),
            success_count,
            fail_count,
        });

        let serialized: Vec<Value> = results
            .iter()
            .map(|(branch_id, outcome)| {
                json!({
                    "branch_id": branch_id,
                    "status": outcome.status.as_str(),
                    "notes": outcome.notes,
                    "context_updates": outcome.context_updates,
                })
            })
            .collect();

        let status = match join_policy {
            JoinPolicy::WaitAll => {
                if fail_count == 0 && !aborted {
                    StageStatus::Success
                } else {
                    StageStatus::PartialSuccess
                }
            }
            JoinPolicy::FirstSuccess => {
                if success_count >= 1 {
                    StageStatus::Success
                } else {
                    StageStatus::Fail
                }
            }
            JoinPolicy::Any => StageStatus::Success,
        };

        let mut outcome = Outcome {
            status,
            ..Outcome::success()
        };
        if status == StageStatus::Fail {
            outcome.failure_reason = Some("no parallel branch succeeded".to_string());
        }
        outcome
            .context_updates
            .insert("parallel.results".to_string(), Value::Array(serialized));
        outcome
            .context_updates
            .insert("parallel.branch_count".to_string(), json!(results.len()));
        outcome
            .context_updates
            .insert("parallel.success_count".to_string(), json!(success_count));
        outcome
            .context_updates
            .insert("parallel.fail_count".to_string(), json!(fail_count));

        // Route on to the join: a direct fan-in edge wins, else the node the
        // branches converge on. Branch targets already ran here, so letting
        // ordinary edge selection pick one would re-execute it.
        let join_target = join_edges
            .first()
            .map(|edge| edge.to.clone())
            .or_else(|| {
                branch_edges
                    .iter()
                    .flat_map(|edge| graph.outgoing_edges(&edge.to))
                    .map(|edge| edge.to.clone())
                    .find(|target| is_fan_in(graph, target))
            });
        if let Some(join) = join_target {
            outcome.suggested_next_ids = vec![join];
        }
        Ok(outcome)
    }
}

/// True when the node resolves to the fan-in handler.
fn is_fan_in(graph: &Graph, node_id: &str) -> bool {
    graph
        .node(node_id)
        .map(|n| {
            n.handler_type() == Some("parallel.fan_in")
                || matches!(n.shape(), "trapezium" | "fan_in")
        })
        .unwrap_or(false)
}

/// Join handler consuming `parallel.results`.
///
/// Branch context updates are merged into the parent in branch declaration
/// order, so when two branches write the same key the declaration-order-last
/// branch wins (last-writer-wins).
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(
        &self,
        _node: &Node,
        context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let results = match context.get("parallel.results") {
            Some(Value::Array(results)) => results.clone(),
            _ => return Ok(Outcome::fail("no prior parallel stage results in context")),
        };

        let mut merged: Vec<(String, Value)> = Vec::new();
        let mut success_count = 0usize;
        let mut fail_count = 0usize;
        for entry in &results {
            match entry.get("status").and_then(Value::as_str) {
                Some("success") | Some("partial_success") => success_count += 1,
                _ => fail_count += 1,
            }
            if let Some(Value::Object(updates)) = entry.get("context_updates") {
                for (key, value) in updates {
                    merged.push((key.clone(), value.clone()));
                }
            }
        }

        let status = if fail_count == 0 {
            StageStatus::Success
        } else {
            StageStatus::PartialSuccess
        };
        let mut outcome = Outcome {
            status,
            ..Outcome::success()
        };
        outcome.notes = Some(format!(
            "joined {} branches ({success_count} ok, {fail_count} failed)",
            results.len()
        ));
        for (key, value) in merged {
            outcome.context_updates.insert(key, value);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrValue;
    use crate::parser::parse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Branch executor that returns canned outcomes and tracks the maximum
    /// number of branches in flight at once.
    struct TrackingExecutor {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_branches: Vec<String>,
    }

    impl TrackingExecutor {
        fn new(fail_branches: &[&str]) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_branches: fail_branches.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl BranchExecutor for TrackingExecutor {
        async fn execute_branch(
            &self,
            branch_id: &str,
            target: &str,
            mut context: Context,
            _graph: &Graph,
            _logs_root: &Path,
        ) -> Result<Outcome> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            // Branch-local context stays isolated from the parent.
            context.set("branch_scratch", json!(branch_id));

            if self.fail_branches.iter().any(|b| b == branch_id) {
                Ok(Outcome::fail("branch failed"))
            } else {
                Ok(Outcome::success()
                    .with_context_update(format!("{target}.done"), json!(true)))
            }
        }
    }

    fn fan_graph(branch_count: usize) -> Graph {
        let mut source = String::from("digraph X {\n  fan [shape=parallelogram]\n");
        for i in 0..branch_count {
            source.push_str(&format!("  b{i}\n  fan -> b{i}\n"));
        }
        source.push('}');
        parse(&source).unwrap()
    }

    async fn run_fan(
        graph: &Graph,
        executor: Arc<TrackingExecutor>,
        attrs: &[(&str, AttrValue)],
    ) -> Outcome {
        let mut graph = graph.clone();
        for (key, value) in attrs {
            graph
                .node_mut("fan")
                .unwrap()
                .set_explicit_attr(*key, value.clone());
        }
        let handler = ParallelHandler::new(executor, EventEmitter::default());
        let node = graph.node("fan").unwrap().clone();
        handler
            .execute(&node, &Context::new(), &graph, &std::env::temp_dir())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let executor = Arc::new(TrackingExecutor::new(&[]));
        let graph = fan_graph(9);
        let outcome = run_fan(
            &graph,
            executor.clone(),
            &[("max_parallel", AttrValue::Integer(3))],
        )
        .await;

        assert_eq!(outcome.status, StageStatus::Success);
        assert!(executor.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(
            outcome.context_updates.get("parallel.branch_count"),
            Some(&json!(9))
        );
    }

    #[tokio::test]
    async fn test_wait_all_partial_on_failure() {
        let executor = Arc::new(TrackingExecutor::new(&["b1"]));
        let graph = fan_graph(3);
        let outcome = run_fan(&graph, executor, &[]).await;
        assert_eq!(outcome.status, StageStatus::PartialSuccess);
        assert_eq!(
            outcome.context_updates.get("parallel.fail_count"),
            Some(&json!(1))
        );
    }

    #[tokio::test]
    async fn test_first_success_policy() {
        let executor = Arc::new(TrackingExecutor::new(&["b0", "b1"]));
        let graph = fan_graph(3);
        let outcome = run_fan(
            &graph,
            executor,
            &[("join_policy", AttrValue::String("first_success".into()))],
        )
        .await;
        assert_eq!(outcome.status, StageStatus::Success);

        let executor = Arc::new(TrackingExecutor::new(&["b0", "b1", "b2"]));
        let outcome = run_fan(
            &fan_graph(3),
            executor,
            &[("join_policy", AttrValue::String("first_success".into()))],
        )
        .await;
        assert_eq!(outcome.status, StageStatus::Fail);
    }

    #[tokio::test]
    async fn test_fail_fast_skips_later_batches() {
        let executor = Arc::new(TrackingExecutor::new(&["b0"]));
        let graph = fan_graph(6);
        let outcome = run_fan(
            &graph,
            executor,
            &[
                ("max_parallel", AttrValue::Integer(2)),
                ("error_policy", AttrValue::String("fail_fast".into())),
            ],
        )
        .await;
        // Only the first batch of 2 ran.
        assert_eq!(
            outcome.context_updates.get("parallel.branch_count"),
            Some(&json!(2))
        );
        assert_eq!(outcome.status, StageStatus::PartialSuccess);
    }

    #[tokio::test]
    async fn test_fan_in_merges_in_declaration_order() {
        let results = json!([
            {"branch_id": "a", "status": "success",
             "context_updates": {"shared": "from-a", "a.only": 1}},
            {"branch_id": "b", "status": "success",
             "context_updates": {"shared": "from-b", "b.only": 2}},
        ]);
        let mut context = Context::new();
        context.set("parallel.results", results);

        let outcome = FanInHandler
            .execute(
                &Node::new("join"),
                &context,
                &Graph::new("g"),
                &std::env::temp_dir(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        // Distinct keys both survive; the same key takes the last writer.
        assert_eq!(outcome.context_updates.get("a.only"), Some(&json!(1)));
        assert_eq!(outcome.context_updates.get("b.only"), Some(&json!(2)));
        assert_eq!(
            outcome.context_updates.get("shared"),
            Some(&json!("from-b"))
        );
    }

    #[tokio::test]
    async fn test_fan_in_without_parallel_fails() {
        let outcome = FanInHandler
            .execute(
                &Node::new("join"),
                &Context::new(),
                &Graph::new("g"),
                &std::env::temp_dir(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
