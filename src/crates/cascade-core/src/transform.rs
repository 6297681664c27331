//! Graph rewrite passes applied between parsing and validation.
//!
//! Transforms run in a fixed order: the built-ins first (variable expansion,
//! then stylesheet application), then any caller-appended custom passes.
//! Each transform is `Graph → Graph`; failures abort the pipeline before
//! execution begins.

use crate::error::Result;
use crate::graph::{AttrValue, Graph};
use crate::stylesheet::{apply_stylesheet, parse_stylesheet};

/// A single graph rewrite pass.
pub trait GraphTransform: Send + Sync {
    /// Transform name, used in tracing and diagnostics.
    fn name(&self) -> &str;

    /// Apply the rewrite.
    fn apply(&self, graph: Graph) -> Result<Graph>;
}

/// Expands `$goal` in every node prompt using the graph's `goal` attribute.
pub struct VariableExpansion;

impl GraphTransform for VariableExpansion {
    fn name(&self) -> &str {
        "variable_expansion"
    }

    fn apply(&self, mut graph: Graph) -> Result<Graph> {
        let goal = graph.goal().unwrap_or("").to_string();
        let node_ids: Vec<String> = graph.node_ids().to_vec();
        for id in node_ids {
            let node = match graph.node_mut(&id) {
                Some(n) => n,
                None => continue,
            };
            if let Some(prompt) = node.prompt() {
                if prompt.contains("$goal") {
                    let expanded = prompt.replace("$goal", &goal);
                    // Expansion preserves the key's explicitness.
                    node.attrs
                        .insert("prompt".to_string(), AttrValue::String(expanded));
                }
            }
        }
        Ok(graph)
    }
}

/// Applies the graph's `model_stylesheet` attribute, assigning `llm_model`,
/// `llm_provider`, and `reasoning_effort` per selector.
pub struct StylesheetApplication;

impl GraphTransform for StylesheetApplication {
    fn name(&self) -> &str {
        "stylesheet_application"
    }

    fn apply(&self, mut graph: Graph) -> Result<Graph> {
        let source = match graph.model_stylesheet() {
            Some(s) => s.to_string(),
            None => return Ok(graph),
        };
        let stylesheet = parse_stylesheet(&source)?;
        apply_stylesheet(&mut graph, &stylesheet);
        Ok(graph)
    }
}

/// The built-in transform list, in order. Custom transforms may be appended
/// but never reordered before these.
pub fn builtin_transforms() -> Vec<Box<dyn GraphTransform>> {
    vec![Box::new(VariableExpansion), Box::new(StylesheetApplication)]
}

/// Run a transform list over a graph.
pub fn apply_transforms(graph: Graph, transforms: &[Box<dyn GraphTransform>]) -> Result<Graph> {
    let mut graph = graph;
    for transform in transforms {
        tracing::debug!(transform = transform.name(), "applying graph transform");
        graph = transform.apply(graph)?;
    }
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_goal_expansion() {
        let graph = parse(
            r#"digraph X {
                graph [goal="Build the thing"]
                t [prompt="Do $goal now"]
            }"#,
        )
        .unwrap();
        let graph = apply_transforms(graph, &builtin_transforms()).unwrap();
        assert_eq!(
            graph.node("t").unwrap().prompt(),
            Some("Do Build the thing now")
        );
    }

    #[test]
    fn test_stylesheet_transform_runs_after_expansion() {
        let graph = parse(
            r#"digraph X {
                graph [model_stylesheet="* { llm_model: m1; }"]
                t [prompt="P"]
            }"#,
        )
        .unwrap();
        let graph = apply_transforms(graph, &builtin_transforms()).unwrap();
        assert_eq!(graph.node("t").unwrap().llm_model(), Some("m1"));
    }

    #[test]
    fn test_custom_transform_appended() {
        struct AddNote;
        impl GraphTransform for AddNote {
            fn name(&self) -> &str {
                "add_note"
            }
            fn apply(&self, mut graph: Graph) -> Result<Graph> {
                graph
                    .attrs
                    .insert("note".into(), AttrValue::String("seen".into()));
                Ok(graph)
            }
        }

        let graph = parse(r#"digraph X { t }"#).unwrap();
        let mut transforms = builtin_transforms();
        transforms.push(Box::new(AddNote));
        let graph = apply_transforms(graph, &transforms).unwrap();
        assert_eq!(graph.attrs.get("note").and_then(|v| v.as_str()), Some("seen"));
    }

    #[test]
    fn test_missing_goal_expands_to_empty() {
        let graph = parse(r#"digraph X { t [prompt="Do $goal"] }"#).unwrap();
        let graph = apply_transforms(graph, &builtin_transforms()).unwrap();
        assert_eq!(graph.node("t").unwrap().prompt(), Some("Do "));
    }
}
