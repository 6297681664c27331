//! The wait.human handler — human-gated decision points.
//!
//! Choices are derived from the node's outgoing edges (edge label, falling
//! back to the target node ID). The injected interviewer answers; the chosen
//! edge's target comes back as a suggested next ID so edge selection is
//! short-circuited. Timeouts fall back to the node's `default_choice`
//! attribute when it matches a choice, otherwise the stage retries; a
//! skipped interview fails the stage.

use super::NodeHandler;
use crate::context::Context;
use crate::error::Result;
use crate::events::{EventEmitter, PipelineEventKind};
use crate::graph::{Graph, Node};
use crate::interview::{Answer, Interviewer, Question};
use crate::outcome::Outcome;
use async_trait::async_trait;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
    emitter: EventEmitter,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>, emitter: EventEmitter) -> Self {
        Self {
            interviewer,
            emitter,
        }
    }
}

/// (label, target) pairs for a node's outgoing edges, declaration order.
fn choices(node: &Node, graph: &Graph) -> Vec<(String, String)> {
    graph
        .outgoing_edges(&node.id)
        .iter()
        .map(|edge| {
            let label = edge
                .label()
                .map(str::to_string)
                .unwrap_or_else(|| edge.to.clone());
            (label, edge.to.clone())
        })
        .collect()
}

fn match_choice<'c>(choices: &'c [(String, String)], text: &str) -> Option<&'c (String, String)> {
    choices
        .iter()
        .find(|(label, target)| label == text || target == text)
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    fn handler_type(&self) -> &str {
        "wait.human"
    }

    async fn execute(
        &self,
        node: &Node,
        _context: &Context,
        graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let choices = choices(node, graph);
        let default_choice = node
            .attrs
            .get("default_choice")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let prompt = node
            .prompt()
            .map(str::to_string)
            .unwrap_or_else(|| node.label().to_string());

        let question = Question {
            node_id: node.id.clone(),
            prompt: prompt.clone(),
            choices: choices.iter().map(|(label, _)| label.clone()).collect(),
            default_choice: default_choice.clone(),
            timeout: node.timeout(),
        };
        self.emitter.emit(PipelineEventKind::InterviewStarted {
            node_id: node.id.clone(),
            question: prompt,
        });

        let answer = self.interviewer.ask(question).await;
        self.emitter.emit(PipelineEventKind::InterviewCompleted {
            node_id: node.id.clone(),
            answer: format!("{answer:?}"),
        });

        let outcome = match answer {
            Answer::Choice(text) | Answer::Text(text) => match match_choice(&choices, &text) {
                Some((label, target)) => Outcome::success()
                    .with_suggested_next_ids(vec![target.clone()])
                    .with_preferred_label(label.clone())
                    .with_context_update(format!("{}.answer", node.id), json!(text)),
                None => Outcome::success()
                    .with_preferred_label(text.clone())
                    .with_context_update(format!("{}.answer", node.id), json!(text)),
            },
            Answer::Timeout => match default_choice.as_deref().and_then(|d| match_choice(&choices, d)) {
                Some((label, target)) => Outcome::success()
                    .with_suggested_next_ids(vec![target.clone()])
                    .with_preferred_label(label.clone())
                    .with_context_update(format!("{}.answer", node.id), json!(label)),
                None => Outcome::retry("interview timed out with no default choice"),
            },
            Answer::Skipped => Outcome::fail("interview skipped"),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::RecordingInterviewer;
    use crate::outcome::StageStatus;
    use crate::parser::parse;

    fn gate_graph() -> Graph {
        parse(
            r#"digraph X {
                gate [shape=hexagon, prompt="Approve?"]
                yes; no
                gate -> yes [label="approve"]
                gate -> no [label="reject"]
            }"#,
        )
        .unwrap()
    }

    async fn run(interviewer: RecordingInterviewer, graph: &Graph) -> Outcome {
        let handler = WaitHumanHandler::new(Arc::new(interviewer), EventEmitter::default());
        let node = graph.node("gate").unwrap();
        handler
            .execute(node, &Context::new(), graph, &std::env::temp_dir())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_choice_maps_to_suggested_edge() {
        let graph = gate_graph();
        let interviewer =
            RecordingInterviewer::with_answers(vec![Answer::Choice("reject".into())]);
        let outcome = run(interviewer, &graph).await;

        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.suggested_next_ids, vec!["no".to_string()]);
        assert_eq!(outcome.preferred_label.as_deref(), Some("reject"));
    }

    #[tokio::test]
    async fn test_question_derived_from_edges() {
        let graph = gate_graph();
        let interviewer =
            RecordingInterviewer::with_answers(vec![Answer::Choice("approve".into())]);
        let handler_interviewer = Arc::new(interviewer);
        let handler =
            WaitHumanHandler::new(handler_interviewer.clone(), EventEmitter::default());
        let node = graph.node("gate").unwrap();
        handler
            .execute(node, &Context::new(), &graph, &std::env::temp_dir())
            .await
            .unwrap();

        let questions = handler_interviewer.recorded_questions();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].choices, vec!["approve", "reject"]);
        assert_eq!(questions[0].prompt, "Approve?");
    }

    #[tokio::test]
    async fn test_timeout_without_default_retries() {
        let graph = gate_graph();
        let outcome = run(RecordingInterviewer::with_answers(vec![]), &graph).await;
        assert_eq!(outcome.status, StageStatus::Retry);
    }

    #[tokio::test]
    async fn test_timeout_with_default_choice() {
        let graph = parse(
            r#"digraph X {
                gate [shape=hexagon, default_choice="approve"]
                yes
                gate -> yes [label="approve"]
            }"#,
        )
        .unwrap();
        let outcome = run(RecordingInterviewer::with_answers(vec![]), &graph).await;
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.suggested_next_ids, vec!["yes".to_string()]);
    }

    #[tokio::test]
    async fn test_skipped_fails() {
        let graph = gate_graph();
        let outcome = run(
            RecordingInterviewer::with_answers(vec![Answer::Skipped]),
            &graph,
        )
        .await;
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
