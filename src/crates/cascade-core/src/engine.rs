//! The pipeline executor — parse-validate-execute traversal loop.
//!
//! The executor drives exactly one node at a time: resolve the handler, run
//! it under the node's retry policy (with optional stage timeout), record
//! the outcome and `status.json` artifact, checkpoint, then select the next
//! edge. Terminal nodes trigger goal-gate enforcement before the pipeline
//! may finish. Parallelism only ever happens inside the parallel handler;
//! the loop itself is strictly sequential, which is what makes checkpoint
//! resume and edge-selection determinism cheap to guarantee.

use crate::checkpoint::{
    load_checkpoint, replay_outcomes, save_checkpoint, save_status, PipelineCheckpoint,
};
use crate::context::Context;
use crate::edges::select_edge;
use crate::error::{PipelineError, Result};
use crate::events::{EventEmitter, PipelineEventKind};
use crate::fidelity::{render_context_block, resolve_fidelity, resolve_thread_key, HistoryEntry};
use crate::graph::{Edge, Graph, Node};
use crate::handlers::HandlerRegistry;
use crate::outcome::{Outcome, StageStatus};
use crate::retry::{policy_for_node_with_base, run_with_retry, BackoffPolicy};
use crate::validate::{validate_or_raise, ValidationRule};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Final disposition of a run that returned normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Success,
    Failed,
}

/// The result of a completed pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    /// Unique identifier for this run.
    pub run_id: String,
    pub status: PipelineStatus,
    /// Node IDs in completion order (repeats appear on retry loops).
    pub completed_nodes: Vec<String>,
    /// Latest outcome per node.
    pub node_outcomes: HashMap<String, Outcome>,
    /// Final context snapshot.
    pub final_context: HashMap<String, Value>,
}

/// Configuration for one pipeline run.
pub struct PipelineConfig {
    /// Root directory for checkpoints and per-stage artifacts.
    pub logs_root: PathBuf,
    /// Resume from `<logs_root>/checkpoint.json` when present.
    pub resume: bool,
    /// Values seeded into the context before execution.
    pub initial_context: HashMap<String, Value>,
    /// Base backoff settings; per-node attempt counts override.
    pub default_backoff: BackoffPolicy,
    /// Cooperative cancellation; checked between stages.
    pub cancellation: CancellationToken,
}

impl PipelineConfig {
    pub fn new(logs_root: impl Into<PathBuf>) -> Self {
        Self {
            logs_root: logs_root.into(),
            resume: false,
            initial_context: HashMap::new(),
            default_backoff: BackoffPolicy::standard(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_initial_context(mut self, initial: HashMap<String, Value>) -> Self {
        self.initial_context = initial;
        self
    }

    pub fn with_default_backoff(mut self, policy: BackoffPolicy) -> Self {
        self.default_backoff = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Where execution picks up after inspecting resume state.
enum ResumePoint {
    Node(String),
    AlreadyComplete,
}

/// How the loop moves to the next stage.
enum Advance {
    Edge(Edge),
    Jump(String),
}

/// Mutable traversal state carried across stages.
struct RunState {
    run_id: String,
    context: Context,
    completed: Vec<String>,
    outcomes: HashMap<String, Outcome>,
    node_retries: HashMap<String, u32>,
    thread_keys: HashMap<String, String>,
    logs: Vec<String>,
    previous_node: Option<String>,
    entered_via: Option<Edge>,
}

/// The pipeline executor. Owns a handler registry and an event emitter.
pub struct PipelineExecutor {
    registry: Arc<HandlerRegistry>,
    emitter: EventEmitter,
    extra_rules: Vec<ValidationRule>,
}

impl PipelineExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, emitter: EventEmitter) -> Self {
        Self {
            registry,
            emitter,
            extra_rules: Vec::new(),
        }
    }

    /// Append a caller-supplied validation rule.
    pub fn with_validation_rule(mut self, rule: ValidationRule) -> Self {
        self.extra_rules.push(rule);
        self
    }

    /// The emitter this executor publishes lifecycle events through.
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Run a transformed graph to completion.
    pub async fn run(&self, graph: &Graph, config: PipelineConfig) -> Result<PipelineResult> {
        validate_or_raise(graph, &self.extra_rules)?;
        std::fs::create_dir_all(&config.logs_root)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(graph = %graph.id, run_id = %run_id, "pipeline run starting");

        let mut state = RunState {
            run_id,
            context: Context::new(),
            completed: Vec::new(),
            outcomes: HashMap::new(),
            node_retries: HashMap::new(),
            thread_keys: HashMap::new(),
            logs: Vec::new(),
            previous_node: None,
            entered_via: None,
        };
        for (key, value) in &graph.attrs {
            state.context.set(format!("graph.{key}"), value.to_json());
        }
        for (key, value) in &config.initial_context {
            state.context.set(key.clone(), value.clone());
        }

        self.emitter.emit(PipelineEventKind::PipelineStarted {
            graph_id: graph.id.clone(),
        });

        let mut current_id = match self.resume_point(graph, &config, &mut state)? {
            ResumePoint::Node(id) => id,
            ResumePoint::AlreadyComplete => {
                tracing::info!(graph = %graph.id, "checkpoint shows no remaining work");
                self.emitter.emit(PipelineEventKind::PipelineCompleted {
                    graph_id: graph.id.clone(),
                    completed_nodes: state.completed.len(),
                });
                return Ok(self.finish(PipelineStatus::Success, state));
            }
        };

        loop {
            if config.cancellation.is_cancelled() {
                self.emitter.emit(PipelineEventKind::PipelineFailed {
                    graph_id: graph.id.clone(),
                    reason: "cancelled".to_string(),
                });
                return Err(PipelineError::Cancelled);
            }

            let node = graph.node(&current_id).ok_or_else(|| {
                PipelineError::Other(format!("traversal reached unknown node '{current_id}'"))
            })?;

            if node.is_terminal() {
                if let Some(redirect) = self.unsatisfied_gate_route(graph, &state)? {
                    tracing::info!(target_node = %redirect, "goal gate unsatisfied, rerouting");
                    state.previous_node = Some(current_id);
                    state.entered_via = None;
                    current_id = redirect;
                    continue;
                }
                let outcome = self.run_terminal_stage(node, graph, &config, &mut state).await?;
                let status = if outcome.status.is_satisfactory() {
                    PipelineStatus::Success
                } else {
                    PipelineStatus::Failed
                };
                self.emitter.emit(PipelineEventKind::PipelineCompleted {
                    graph_id: graph.id.clone(),
                    completed_nodes: state.completed.len(),
                });
                return Ok(self.finish(status, state));
            }

            let outcome = self.run_stage(node, graph, &config, &mut state).await?;

            // Suggested successors first: a matching outgoing edge wins; a
            // suggested node with no edge is a direct jump (how the parallel
            // handler routes to its join without re-running branch targets).
            let suggested_edge = graph
                .outgoing_edges(&current_id)
                .into_iter()
                .find(|e| outcome.suggested_next_ids.iter().any(|id| id == &e.to))
                .cloned();
            let advance = if let Some(edge) = suggested_edge {
                Some(Advance::Edge(edge))
            } else if let Some(id) = outcome
                .suggested_next_ids
                .iter()
                .find(|id| graph.has_node(id))
            {
                Some(Advance::Jump(id.clone()))
            } else {
                select_edge(graph, &current_id, &outcome, &state.context)
                    .cloned()
                    .map(Advance::Edge)
            };

            match advance {
                Some(Advance::Edge(edge)) => {
                    if edge.loop_restart() {
                        let marker = format!("loop_restart: {} -> {}", edge.from, edge.to);
                        tracing::info!("{marker}");
                        state.logs.push(marker);
                    }
                    state.previous_node = Some(current_id.clone());
                    current_id = edge.to.clone();
                    state.entered_via = Some(edge);
                }
                Some(Advance::Jump(id)) => {
                    state.previous_node = Some(current_id.clone());
                    state.entered_via = None;
                    current_id = id;
                }
                None if outcome.status == StageStatus::Fail => {
                    let failure_route = node
                        .attrs
                        .get("on_fail")
                        .and_then(|v| v.as_str())
                        .or_else(|| graph.attrs.get("on_fail").and_then(|v| v.as_str()))
                        .map(str::to_string);
                    match failure_route.filter(|route| graph.has_node(route)) {
                        Some(route) => {
                            tracing::warn!(node = %current_id, route = %route, "stage failed, taking failure route");
                            state.previous_node = Some(current_id.clone());
                            state.entered_via = None;
                            current_id = route;
                        }
                        None => {
                            let reason = outcome
                                .failure_reason
                                .clone()
                                .unwrap_or_else(|| "stage failed".to_string());
                            self.emitter.emit(PipelineEventKind::PipelineFailed {
                                graph_id: graph.id.clone(),
                                reason: reason.clone(),
                            });
                            return Err(PipelineError::Handler {
                                handler: self.registry.resolve_type(node),
                                node: current_id,
                                message: format!("{reason} (no outgoing edge matched)"),
                            });
                        }
                    }
                }
                None => {
                    // Dead end on a non-failing outcome: the pipeline simply
                    // ends.
                    self.emitter.emit(PipelineEventKind::PipelineCompleted {
                        graph_id: graph.id.clone(),
                        completed_nodes: state.completed.len(),
                    });
                    return Ok(self.finish(PipelineStatus::Success, state));
                }
            }
        }
    }

    /// Execute a terminal node's handler. Terminal stages record an outcome
    /// but never join the completed list: they end the run instead of
    /// advancing it, and resume never replays them.
    async fn run_terminal_stage(
        &self,
        node: &Node,
        graph: &Graph,
        config: &PipelineConfig,
        state: &mut RunState,
    ) -> Result<Outcome> {
        self.emitter.emit(PipelineEventKind::StageStarted {
            node_id: node.id.clone(),
        });
        let handler_type = self.registry.resolve_type(node);
        let handler = self
            .registry
            .get(&handler_type)
            .ok_or_else(|| PipelineError::UnknownHandler {
                handler_type: handler_type.clone(),
                node: node.id.clone(),
            })?;
        let outcome = match handler
            .execute(node, &state.context, graph, &config.logs_root)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => Outcome::fail(err.to_string()),
        };
        save_status(&config.logs_root, &node.id, &outcome)?;
        state.outcomes.insert(node.id.clone(), outcome.clone());
        self.emitter.emit(PipelineEventKind::StageCompleted {
            node_id: node.id.clone(),
            status: outcome.status.as_str().to_string(),
        });
        Ok(outcome)
    }

    /// Execute one stage under retry policy and record all of its effects.
    async fn run_stage(
        &self,
        node: &Node,
        graph: &Graph,
        config: &PipelineConfig,
        state: &mut RunState,
    ) -> Result<Outcome> {
        self.emitter.emit(PipelineEventKind::StageStarted {
            node_id: node.id.clone(),
        });

        let handler_type = self.registry.resolve_type(node);
        let handler = self
            .registry
            .get(&handler_type)
            .ok_or_else(|| PipelineError::UnknownHandler {
                handler_type: handler_type.clone(),
                node: node.id.clone(),
            })?;

        // Present scoped history at the resolved fidelity.
        let fidelity = resolve_fidelity(state.entered_via.as_ref(), node, graph);
        let thread_key =
            resolve_thread_key(node, state.entered_via.as_ref(), graph, state.previous_node.as_deref())
                .unwrap_or_default();
        let history = self.history_for_thread(&thread_key, state);
        let block = render_context_block(fidelity, &history);
        state.context.set("current_node", json!(node.id));
        state.context.set("thread.key", json!(thread_key));
        state.context.set("history.block", json!(block));

        let policy = policy_for_node_with_base(node, graph, &config.default_backoff);
        let stage_timeout = node.timeout();
        let logs_root = config.logs_root.clone();
        let context_ref: &Context = &state.context;
        tracing::info!(node = %node.id, handler = %handler_type, "stage started");

        let run = run_with_retry(
            &policy,
            &node.id,
            node.allow_partial(),
            &self.emitter,
            |_attempt| {
                let handler = handler.clone();
                let logs_root = logs_root.clone();
                async move {
                    let fut = handler.execute(node, context_ref, graph, &logs_root);
                    match stage_timeout {
                        Some(limit) => match tokio::time::timeout(limit, fut).await {
                            Ok(result) => result,
                            Err(_) => Err(PipelineError::StageTimeout {
                                node: node.id.clone(),
                                timeout_ms: limit.as_millis() as u64,
                            }),
                        },
                        None => fut.await,
                    }
                }
            },
        )
        .await;
        let outcome = run.outcome;

        save_status(&config.logs_root, &node.id, &outcome)?;
        state.completed.push(node.id.clone());
        state.outcomes.insert(node.id.clone(), outcome.clone());
        state.thread_keys.insert(node.id.clone(), thread_key);
        let retries = if outcome.status.is_satisfactory() {
            0
        } else {
            run.attempts.saturating_sub(1)
        };
        state.node_retries.insert(node.id.clone(), retries);

        state.context.apply_updates(&outcome.context_updates);
        state.context.set("outcome", json!(outcome.status.as_str()));
        if let Some(label) = &outcome.preferred_label {
            state.context.set("preferred_label", json!(label));
        }

        match outcome.status {
            StageStatus::Fail => {
                tracing::warn!(node = %node.id, "stage failed");
                self.emitter.emit(PipelineEventKind::StageFailed {
                    node_id: node.id.clone(),
                    reason: outcome
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "unspecified".to_string()),
                });
            }
            status => {
                tracing::info!(node = %node.id, status = status.as_str(), "stage completed");
                self.emitter.emit(PipelineEventKind::StageCompleted {
                    node_id: node.id.clone(),
                    status: status.as_str().to_string(),
                });
            }
        }

        let checkpoint = PipelineCheckpoint {
            last_node: node.id.clone(),
            completed_nodes: state.completed.clone(),
            node_retries: state.node_retries.clone(),
            context_values: state.context.snapshot(),
            logs: state.logs.clone(),
            timestamp: Utc::now(),
        };
        save_checkpoint(&config.logs_root, &checkpoint)?;
        self.emitter.emit(PipelineEventKind::CheckpointSaved {
            node_id: node.id.clone(),
        });

        Ok(outcome)
    }

    /// History entries scoped to the current thread key, falling back to the
    /// whole run when the key matches nothing.
    fn history_for_thread(&self, thread_key: &str, state: &RunState) -> Vec<HistoryEntry> {
        let scoped: Vec<HistoryEntry> = state
            .completed
            .iter()
            .filter(|id| state.thread_keys.get(*id).map(String::as_str) == Some(thread_key))
            .filter_map(|id| {
                state
                    .outcomes
                    .get(id)
                    .map(|o| HistoryEntry::from_outcome(id, o))
            })
            .collect();
        if !scoped.is_empty() {
            return scoped;
        }
        state
            .completed
            .iter()
            .filter_map(|id| {
                state
                    .outcomes
                    .get(id)
                    .map(|o| HistoryEntry::from_outcome(id, o))
            })
            .collect()
    }

    /// First unsatisfied goal gate's retry route, if any gate is failing.
    /// A failing gate with no route is a terminal pipeline failure.
    fn unsatisfied_gate_route(&self, graph: &Graph, state: &RunState) -> Result<Option<String>> {
        for gate in graph.nodes_in_order().filter(|n| n.goal_gate()) {
            let satisfied = state
                .outcomes
                .get(&gate.id)
                .map(|o| o.status.is_satisfactory())
                .unwrap_or(false);
            if satisfied {
                continue;
            }
            let target = gate
                .retry_target()
                .or_else(|| gate.fallback_retry_target())
                .or_else(|| graph.retry_target())
                .or_else(|| graph.fallback_retry_target())
                .filter(|t| graph.has_node(t));
            match target {
                Some(target) => return Ok(Some(target.to_string())),
                None => {
                    self.emitter.emit(PipelineEventKind::PipelineFailed {
                        graph_id: graph.id.clone(),
                        reason: format!("goal gate '{}' unsatisfied", gate.id),
                    });
                    return Err(PipelineError::GoalGateUnsatisfied {
                        node: gate.id.clone(),
                    });
                }
            }
        }
        Ok(None)
    }

    /// Decide where execution begins: fresh from the start node, or after
    /// the last checkpointed stage.
    fn resume_point(
        &self,
        graph: &Graph,
        config: &PipelineConfig,
        state: &mut RunState,
    ) -> Result<ResumePoint> {
        if config.resume {
            if let Some(checkpoint) = load_checkpoint(&config.logs_root)? {
                tracing::info!(
                    last_node = %checkpoint.last_node,
                    completed = checkpoint.completed_nodes.len(),
                    "resuming from checkpoint"
                );
                state.outcomes = replay_outcomes(&config.logs_root, &checkpoint)?;
                state.completed = checkpoint.completed_nodes;
                state.node_retries = checkpoint.node_retries;
                state.logs = checkpoint.logs;
                state.context = Context::from_values(checkpoint.context_values);
                state.previous_node = Some(checkpoint.last_node.clone());

                let last_outcome = state
                    .outcomes
                    .get(&checkpoint.last_node)
                    .cloned()
                    .unwrap_or_else(Outcome::success);
                return match select_edge(graph, &checkpoint.last_node, &last_outcome, &state.context)
                {
                    Some(edge) => {
                        state.entered_via = Some(edge.clone());
                        Ok(ResumePoint::Node(edge.to.clone()))
                    }
                    None => Ok(ResumePoint::AlreadyComplete),
                };
            }
        }
        Ok(ResumePoint::Node(graph.require_start_node()?.id.clone()))
    }

    fn finish(&self, status: PipelineStatus, state: RunState) -> PipelineResult {
        PipelineResult {
            run_id: state.run_id,
            status,
            completed_nodes: state.completed,
            node_outcomes: state.outcomes,
            final_context: state.context.snapshot(),
        }
    }
}
