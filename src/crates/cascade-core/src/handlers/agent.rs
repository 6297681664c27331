//! The coding_agent handler — delegates a stage to an injected session.

use super::NodeHandler;
use crate::context::Context;
use crate::error::Result;
use crate::graph::{Graph, Node};
use crate::outcome::Outcome;
use crate::session::SessionFactory;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Hands the node prompt to a session from the injected factory; the session
/// drives its own sub-loop and reports a final status.
pub struct CodingAgentHandler {
    factory: Option<Arc<dyn SessionFactory>>,
}

impl CodingAgentHandler {
    pub fn new(factory: Option<Arc<dyn SessionFactory>>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl NodeHandler for CodingAgentHandler {
    fn handler_type(&self) -> &str {
        "coding_agent"
    }

    async fn execute(
        &self,
        node: &Node,
        context: &Context,
        graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        let factory = match &self.factory {
            Some(factory) => factory,
            None => {
                return Ok(Outcome::fail(format!(
                    "coding_agent node '{}' requires a session factory",
                    node.id
                )))
            }
        };

        let goal = context
            .get_str("graph.goal")
            .or_else(|| graph.goal().map(str::to_string))
            .unwrap_or_default();
        let prompt = node
            .prompt()
            .map(str::to_string)
            .unwrap_or_else(|| node.label().to_string())
            .replace("$goal", &goal);

        let mut session = factory.create(node, context);
        tracing::debug!(node = %node.id, "delegating stage to agent session");
        match session.process_input(&prompt).await {
            Ok(result) => {
                let mut outcome = Outcome {
                    status: result.status,
                    ..Outcome::success()
                };
                outcome.notes = result.summary.clone();
                if !result.status.is_satisfactory() {
                    outcome.failure_reason =
                        result.summary.or_else(|| Some("agent session failed".to_string()));
                }
                Ok(outcome)
            }
            Err(err) => Ok(Outcome::fail(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::StageStatus;
    use crate::session::{AgentSession, SessionResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSession {
        status: StageStatus,
    }

    #[async_trait]
    impl AgentSession for ScriptedSession {
        async fn process_input(&mut self, input: &str) -> Result<SessionResult> {
            Ok(SessionResult {
                status: self.status,
                summary: Some(format!("handled: {input}")),
            })
        }

        async fn steer(&mut self, _message: &str) -> Result<()> {
            Ok(())
        }

        async fn follow_up(&mut self, _input: &str) -> Result<SessionResult> {
            Ok(SessionResult {
                status: self.status,
                summary: None,
            })
        }

        async fn abort(&mut self) {}
    }

    struct ScriptedFactory {
        status: StageStatus,
        created: AtomicUsize,
    }

    impl SessionFactory for ScriptedFactory {
        fn create(&self, _node: &Node, _context: &Context) -> Box<dyn AgentSession> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(ScriptedSession {
                status: self.status,
            })
        }
    }

    #[tokio::test]
    async fn test_session_result_maps_to_outcome() {
        let factory = Arc::new(ScriptedFactory {
            status: StageStatus::Success,
            created: AtomicUsize::new(0),
        });
        let handler = CodingAgentHandler::new(Some(factory.clone()));
        let mut node = Node::new("agent");
        node.set_explicit_attr(
            "prompt",
            crate::graph::AttrValue::String("fix the tests".into()),
        );

        let outcome = handler
            .execute(&node, &Context::new(), &Graph::new("g"), &std::env::temp_dir())
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.notes.as_deref(), Some("handled: fix the tests"));
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_factory_fails() {
        let handler = CodingAgentHandler::new(None);
        let outcome = handler
            .execute(
                &Node::new("agent"),
                &Context::new(),
                &Graph::new("g"),
                &std::env::temp_dir(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
    }
}
