//! Checkpoint persistence for resumable runs.
//!
//! One checkpoint is written after every completed stage at
//! `<logs_root>/checkpoint.json`. On resume the engine re-materializes the
//! checkpoint and replays outcomes by reading each completed node's
//! `status.json` artifact, so the outcome map never has to be serialized
//! twice.

use crate::error::{PipelineError, Result};
use crate::outcome::Outcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Serialized engine state after a completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    /// ID of the most recently completed node.
    pub last_node: String,
    /// Completed node IDs, in completion order.
    pub completed_nodes: Vec<String>,
    /// Retry counters per node.
    pub node_retries: HashMap<String, u32>,
    /// Full context snapshot.
    pub context_values: HashMap<String, Value>,
    /// Append-only log buffer (loop-restart markers and similar).
    pub logs: Vec<String>,
    /// Write time, ISO-8601.
    pub timestamp: DateTime<Utc>,
}

fn checkpoint_path(logs_root: &Path) -> PathBuf {
    logs_root.join("checkpoint.json")
}

fn status_path(logs_root: &Path, node_id: &str) -> PathBuf {
    logs_root.join(node_id).join("status.json")
}

/// Write a checkpoint atomically (temp file + rename).
pub fn save_checkpoint(logs_root: &Path, checkpoint: &PipelineCheckpoint) -> Result<()> {
    std::fs::create_dir_all(logs_root)?;
    let path = checkpoint_path(logs_root);
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(checkpoint)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, &path)?;
    tracing::debug!(node = %checkpoint.last_node, path = %path.display(), "checkpoint saved");
    Ok(())
}

/// Load the checkpoint, if one exists.
pub fn load_checkpoint(logs_root: &Path) -> Result<Option<PipelineCheckpoint>> {
    let path = checkpoint_path(logs_root);
    if !path.exists() {
        return Ok(None);
    }
    let body = std::fs::read_to_string(&path)?;
    let checkpoint = serde_json::from_str(&body)
        .map_err(|e| PipelineError::Checkpoint(format!("corrupt checkpoint {}: {e}", path.display())))?;
    Ok(Some(checkpoint))
}

/// Remove the checkpoint file.
pub fn clear_checkpoint(logs_root: &Path) -> Result<()> {
    let path = checkpoint_path(logs_root);
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Write a node's `status.json` artifact.
pub fn save_status(logs_root: &Path, node_id: &str, outcome: &Outcome) -> Result<()> {
    let dir = logs_root.join(node_id);
    std::fs::create_dir_all(&dir)?;
    let body = serde_json::to_string_pretty(outcome)?;
    std::fs::write(dir.join("status.json"), body)?;
    Ok(())
}

/// Rebuild the outcome map for a checkpoint's completed nodes from their
/// `status.json` artifacts.
pub fn replay_outcomes(
    logs_root: &Path,
    checkpoint: &PipelineCheckpoint,
) -> Result<HashMap<String, Outcome>> {
    let mut outcomes = HashMap::new();
    for node_id in &checkpoint.completed_nodes {
        let path = status_path(logs_root, node_id);
        let body = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::Checkpoint(format!(
                "missing status artifact for completed node '{node_id}': {e}"
            ))
        })?;
        let outcome: Outcome = serde_json::from_str(&body).map_err(|e| {
            PipelineError::Checkpoint(format!("corrupt status artifact for '{node_id}': {e}"))
        })?;
        outcomes.insert(node_id.clone(), outcome);
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Outcome, StageStatus};

    fn sample() -> PipelineCheckpoint {
        PipelineCheckpoint {
            last_node: "t".into(),
            completed_nodes: vec!["s".into(), "t".into()],
            node_retries: HashMap::from([("t".to_string(), 1)]),
            context_values: HashMap::from([("graph.goal".to_string(), serde_json::json!("G"))]),
            logs: vec!["loop_restart: t -> s".into()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = sample();
        save_checkpoint(dir.path(), &checkpoint).unwrap();

        let loaded = load_checkpoint(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.last_node, "t");
        assert_eq!(loaded.completed_nodes, vec!["s", "t"]);
        assert_eq!(loaded.node_retries.get("t"), Some(&1));
        assert_eq!(loaded.logs.len(), 1);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_checkpoint(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        save_checkpoint(dir.path(), &sample()).unwrap();
        clear_checkpoint(dir.path()).unwrap();
        assert!(load_checkpoint(dir.path()).unwrap().is_none());
        // Clearing twice is fine.
        clear_checkpoint(dir.path()).unwrap();
    }

    #[test]
    fn test_replay_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        save_status(dir.path(), "s", &Outcome::success()).unwrap();
        save_status(dir.path(), "t", &Outcome::fail("boom")).unwrap();

        let outcomes = replay_outcomes(dir.path(), &sample()).unwrap();
        assert_eq!(outcomes["s"].status, StageStatus::Success);
        assert_eq!(outcomes["t"].status, StageStatus::Fail);
    }

    #[test]
    fn test_replay_missing_status_is_error() {
        let dir = tempfile::tempdir().unwrap();
        save_status(dir.path(), "s", &Outcome::success()).unwrap();
        let err = replay_outcomes(dir.path(), &sample()).unwrap_err();
        assert!(matches!(err, PipelineError::Checkpoint(_)));
    }
}
