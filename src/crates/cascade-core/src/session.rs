//! Agent session contract consumed by the `coding_agent` handler.
//!
//! The session itself (the agent loop, its tools, steering, loop detection)
//! is an external collaborator. This module defines only the surface the
//! handler needs: a factory that opens a session for a node, the session's
//! driving operations, and the events a surrounding agent layer may observe.

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::outcome::StageStatus;
use async_trait::async_trait;

/// Final state of one session interaction.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub status: StageStatus,
    /// Summary text surfaced into the stage outcome notes.
    pub summary: Option<String>,
}

/// Events a session emits for the surrounding agent layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    SessionStart,
    SessionEnd,
    UserInput { text: String },
    AssistantTextStart,
    AssistantTextEnd { text: String },
    ToolCallStart { name: String },
    ToolCallEnd { name: String, is_error: bool },
    SteeringInjected { text: String },
    LoopDetection { detail: String },
    TurnLimit { turns: u32 },
    Error { message: String },
}

/// One live agent session driving its own sub-loop.
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Feed the primary input and drive the session to a final status.
    async fn process_input(&mut self, input: &str) -> Result<SessionResult>;

    /// Inject an out-of-band steering message between tool rounds.
    async fn steer(&mut self, message: &str) -> Result<()>;

    /// Continue an existing session with a follow-up input.
    async fn follow_up(&mut self, input: &str) -> Result<SessionResult>;

    /// Abort the session.
    async fn abort(&mut self);
}

/// Opens sessions for `coding_agent` nodes.
pub trait SessionFactory: Send + Sync {
    fn create(&self, node: &Node, context: &Context) -> Box<dyn AgentSession>;
}
