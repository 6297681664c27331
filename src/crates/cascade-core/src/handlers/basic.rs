//! Start, exit, and conditional handlers.

use super::NodeHandler;
use crate::context::Context;
use crate::error::Result;
use crate::graph::{Graph, Node};
use crate::outcome::Outcome;
use async_trait::async_trait;
use std::path::Path;

/// Entry node: immediate success.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn handler_type(&self) -> &str {
        "start"
    }

    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success())
    }
}

/// Terminal node: immediate success; the engine stops after it runs.
pub struct ExitHandler;

#[async_trait]
impl NodeHandler for ExitHandler {
    fn handler_type(&self) -> &str {
        "exit"
    }

    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success())
    }
}

/// Decision node: succeeds immediately; the actual branch choice happens in
/// edge selection against the recorded outcome and context.
pub struct ConditionalHandler;

#[async_trait]
impl NodeHandler for ConditionalHandler {
    fn handler_type(&self) -> &str {
        "conditional"
    }

    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _graph: &Graph,
        _logs_root: &Path,
    ) -> Result<Outcome> {
        Ok(Outcome::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::StageStatus;

    #[tokio::test]
    async fn test_basic_handlers_succeed() {
        let node = Node::new("n");
        let context = Context::new();
        let graph = Graph::new("g");
        let logs = std::env::temp_dir();

        for handler in [
            Box::new(StartHandler) as Box<dyn NodeHandler>,
            Box::new(ExitHandler),
            Box::new(ConditionalHandler),
        ] {
            let outcome = handler.execute(&node, &context, &graph, &logs).await.unwrap();
            assert_eq!(outcome.status, StageStatus::Success);
        }
    }
}
