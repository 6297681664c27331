//! Engine lifecycle events.
//!
//! The executor broadcasts a [`PipelineEvent`] at every significant moment:
//! pipeline start/end, stage boundaries, retries, parallel branches,
//! interviews, checkpoint writes. Consumers subscribe through the emitter
//! and receive an ordered stream; slow consumers miss events rather than
//! backpressuring the engine (broadcast semantics).

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Payload plus timestamp for every event.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: PipelineEventKind,
}

/// Event payloads emitted by the engine.
#[derive(Debug, Clone)]
pub enum PipelineEventKind {
    PipelineStarted {
        graph_id: String,
    },
    PipelineCompleted {
        graph_id: String,
        completed_nodes: usize,
    },
    PipelineFailed {
        graph_id: String,
        reason: String,
    },
    StageStarted {
        node_id: String,
    },
    StageCompleted {
        node_id: String,
        status: String,
    },
    StageFailed {
        node_id: String,
        reason: String,
    },
    StageRetrying {
        node_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    ParallelStarted {
        node_id: String,
        branch_count: usize,
    },
    BranchStarted {
        node_id: String,
        branch_id: String,
    },
    BranchCompleted {
        node_id: String,
        branch_id: String,
        status: String,
    },
    ParallelCompleted {
        node_id: String,
        success_count: usize,
        fail_count: usize,
    },
    InterviewStarted {
        node_id: String,
        question: String,
    },
    InterviewCompleted {
        node_id: String,
        answer: String,
    },
    CheckpointSaved {
        node_id: String,
    },
}

/// Broadcast emitter the engine publishes through.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create an emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events as a stream.
    pub fn subscribe(&self) -> BroadcastStream<PipelineEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe to events as a raw receiver.
    pub fn subscribe_receiver(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Dropped silently when nobody is listening.
    pub fn emit(&self, kind: PipelineEventKind) {
        let event = PipelineEvent {
            timestamp: Utc::now(),
            kind,
        };
        let _ = self.sender.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
