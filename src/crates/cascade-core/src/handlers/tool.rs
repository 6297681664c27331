//! The tool handler — trusted command execution stages.
//!
//! Runs the node's `command` attribute through the shell, captures stdout
//! into the context (key `tool.<node_id>.stdout`, overridable via
//! `output_key`), and fails on non-zero exit. The command string comes from
//! the pipeline author and is executed as written.

use super::NodeHandler;
use crate::context::Context;
use crate::error::{PipelineError, Result};
use crate::graph::{Graph, Node};
use crate::outcome::Outcome;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub struct ToolHandler;

#[async_trait]
impl NodeHandler for ToolHandler {
    fn handler_type(&self) -> &str {
        "tool"
    }

    async fn execute(
        &self,
        node: &Node,
        _context: &Context,
        _graph: &Graph,
        logs_root: &Path,
    ) -> Result<Outcome> {
        let command = match node.attrs.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return Ok(Outcome::fail(format!(
                    "tool node '{}' has no command attribute",
                    node.id
                )))
            }
        };

        tracing::debug!(node = %node.id, command = %command, "running tool command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = match node.timeout() {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| PipelineError::StageTimeout {
                    node: node.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                })??,
            None => cmd.output().await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let stage_dir = logs_root.join(&node.id);
        std::fs::create_dir_all(&stage_dir)?;
        std::fs::write(stage_dir.join("response.md"), &stdout)?;

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let excerpt: String = stderr.chars().take(400).collect();
            return Ok(Outcome::fail(format!(
                "command exited with status {code}: {excerpt}"
            )));
        }

        let output_key = node
            .attrs
            .get("output_key")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("tool.{}.stdout", node.id));
        let notes: String = stdout.chars().take(400).collect();
        let mut outcome = Outcome::success();
        if !notes.is_empty() {
            outcome.notes = Some(notes);
        }
        outcome.context_updates.insert(output_key, json!(stdout));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttrValue;
    use crate::outcome::StageStatus;

    fn tool_node(command: &str) -> Node {
        let mut node = Node::new("t");
        node.set_explicit_attr("shape", AttrValue::String("tool".into()));
        node.set_explicit_attr("command", AttrValue::String(command.into()));
        node
    }

    #[tokio::test]
    async fn test_stdout_captured_into_context() {
        let dir = tempfile::tempdir().unwrap();
        let node = tool_node("printf hello");
        let outcome = ToolHandler
            .execute(&node, &Context::new(), &Graph::new("g"), dir.path())
            .await
            .unwrap();

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(
            outcome.context_updates.get("tool.t.stdout"),
            Some(&json!("hello"))
        );
        let artifact = std::fs::read_to_string(dir.path().join("t/response.md")).unwrap();
        assert_eq!(artifact, "hello");
    }

    #[tokio::test]
    async fn test_custom_output_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut node = tool_node("printf 42");
        node.set_explicit_attr("output_key", AttrValue::String("answer".into()));
        let outcome = ToolHandler
            .execute(&node, &Context::new(), &Graph::new("g"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.context_updates.get("answer"), Some(&json!("42")));
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let node = tool_node("echo oops >&2; exit 3");
        let outcome = ToolHandler
            .execute(&node, &Context::new(), &Graph::new("g"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        let reason = outcome.failure_reason.unwrap();
        assert!(reason.contains("status 3"));
        assert!(reason.contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new("t");
        let outcome = ToolHandler
            .execute(&node, &Context::new(), &Graph::new("g"), dir.path())
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
