//! The codergen handler — LLM-backed task stages.
//!
//! Resolves the node's prompt (expanding `$goal` from the context, in case
//! the graph-level transform was skipped), invokes the injected backend, and
//! records `prompt.md` / `response.md` artifacts. When a node sets
//! `auto_status=true`, a trailing `STATUS: …` line in the response selects
//! the stage status.

use super::NodeHandler;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, Node};
use crate::outcome::{Outcome, StageStatus};
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Backend invoked for each codergen stage. The `llm` crate provides an
/// implementation routing through the unified client; tests inject mocks.
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    /// Run the task and return the response text.
    async fn run_task(&self, node: &Node, prompt: &str, context: &Context) -> Result<String>;
}

/// LLM task handler.
pub struct CodergenHandler {
    backend: Arc<dyn CodergenBackend>,
}

impl CodergenHandler {
    pub fn new(backend: Arc<dyn CodergenBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let raw_prompt = node
            .prompt()
            .map(str::to_string)
            .unwrap_or_else(|| node.label().to_string());
        let goal = context
            .get_str("graph.goal")
            .or_else(|| graph.goal().map(str::to_string))
            .unwrap_or_default();
        let prompt = raw_prompt.replace("$goal", &goal);

        let stage_dir = logs_root.join(&node.id);
        std::fs::create_dir_all(&stage_dir)?;
        std::fs::write(stage_dir.join("prompt.md"), &prompt)?;

        tracing::debug!(node = %node.id, "dispatching codergen task");
        let response = self
            .backend
            .run_task(node, &prompt, context)
            .await
            .map_err(|e| PipelineError::Handler {
                handler: "codergen".to_string(),
                node: node.id.clone(),
                message: e.to_string(),
            })?;

        std::fs::write(stage_dir.join("response.md"), &response)?;

        let (status, body) = if node.auto_status() {
            split_status_line(&response)
        } else {
            (StageStatus::Success, response.as_str())
        };

        let notes: String = body.chars().take(400).collect();
        let mut outcome = Outcome {
            status,
            ..Outcome::success()
        };
        if status == StageStatus::Fail {
            outcome.failure_reason = Some(notes.clone());
        }
        if !notes.is_empty() {
            outcome.notes = Some(notes);
        }
        outcome
            .context_updates
            .insert(format!("{}.response", node.id), json!(response));
        Ok(outcome)
    }
}

/// Split a trailing `STATUS: <tag>` line off an auto-status response.
fn split_status_line(response: &str) -> (StageStatus, &str) {
    let trimmed = response.trim_end();
    if let Some(idx) = trimmed.rfind('\n') {
        let last_line = trimmed[idx + 1..].trim();
        if let Some(tag) = last_line.strip_prefix("STATUS:") {
            let status = match tag.trim().to_lowercase().as_str() {
                "success" | "ok" => StageStatus::Success,
                "partial" | "partial_success" => StageStatus::PartialSuccess,
                "fail" | "failed" | "error" => StageStatus::Fail,
                "retry" => StageStatus::Retry,
                _ => StageStatus::Success,
            };
            return (status, trimmed[..idx].trim_end());
        }
    }
    (StageStatus::Success, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    struct EchoBackend;

    #[async_trait]
    impl CodergenBackend for EchoBackend {
        async fn run_task(&self, _node: &Node, prompt: &str, _context: &Context) -> Result<String> {
            Ok(format!("echo: {prompt}"))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl CodergenBackend for FailingBackend {
        async fn run_task(&self, _node: &Node, _prompt: &str, _context: &Context) -> Result<String> {
            Err(PipelineError::Other("backend exploded".into()))
        }
    }

    fn graph() -> Graph {
        parse(
            r#"digraph X {
                graph [goal="Ship"]
                t [prompt="Do $goal"]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_prompt_expanded_and_artifacts_written() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph();
        let node = graph.node("t").unwrap();
        let mut context = Context::new();
        context.set("graph.goal", json!("Ship"));

        let handler = CodergenHandler::new(Arc::new(EchoBackend));
        let outcome = handler
            .execute(node, &context, &graph, dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        let prompt = std::fs::read_to_string(dir.path().join("t/prompt.md")).unwrap();
        assert_eq!(prompt, "Do Ship");
        let response = std::fs::read_to_string(dir.path().join("t/response.md")).unwrap();
        assert_eq!(response, "echo: Do Ship");
        assert!(outcome.context_updates.contains_key("t.response"));
    }

    #[tokio::test]
    async fn test_backend_error_propagates_as_handler_error() {
        let dir = tempfile::tempdir().unwrap();
        let graph = graph();
        let node = graph.node("t").unwrap();
        let handler = CodergenHandler::new(Arc::new(FailingBackend));

        let err = handler
            .execute(node, &Context::new(), &graph, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Handler { .. }));
    }

    #[test]
    fn test_split_status_line() {
        let (status, body) = split_status_line("all good\nSTATUS: success");
        assert_eq!(status, StageStatus::Success);
        assert_eq!(body, "all good");

        let (status, _) = split_status_line("broken\nSTATUS: fail");
        assert_eq!(status, StageStatus::Fail);

        let (status, body) = split_status_line("no marker here");
        assert_eq!(status, StageStatus::Success);
        assert_eq!(body, "no marker here");
    }
}
