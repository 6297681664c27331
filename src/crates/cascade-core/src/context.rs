//! Run context — the mutable key→value store threaded through a pipeline.
//!
//! The context mirrors graph attributes (`graph.goal`), tracks the current
//! node and last outcome, and accumulates arbitrary handler-written entries.
//! Snapshots are plain value copies; `Clone` produces a deep, isolated copy,
//! which is what parallel branches receive.

use serde_json::Value;
use std::collections::HashMap;

/// String-keyed JSON value store for one pipeline run (or one branch of it).
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, Value>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded from an existing value map.
    pub fn from_values(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Get a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get a string value. Non-string values render via `to_string`,
    /// which is what edge conditions compare against.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(value_to_condition_string)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// True if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Merge a batch of handler-produced updates.
    pub fn apply_updates(&mut self, updates: &HashMap<String, Value>) {
        for (key, value) in updates {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Value copy of the whole store, used for checkpoints.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values.clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no entries are present.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Render a JSON value the way the condition language sees it: strings are
/// unquoted, everything else uses its compact JSON form.
pub fn value_to_condition_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
