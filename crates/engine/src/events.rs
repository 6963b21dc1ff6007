//! Execution events and observer hooks.
//!
//! Both are optional side channels: the engine runs identically with none
//! attached, and neither can fail or slow down a run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{Execution, NodeExecution};

/// Progress events emitted while a run is driven.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
    },
    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        iteration: u32,
    },
    /// A retryable failure; the next attempt starts after `delay_ms`.
    NodeRetrying {
        execution_id: Uuid,
        node_id: String,
        iteration: u32,
        attempt: u32,
        error: String,
        delay_ms: u64,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        iteration: u32,
        output: Value,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        iteration: u32,
        error: String,
    },
    NodeSkipped {
        execution_id: Uuid,
        node_id: String,
        iteration: u32,
        reason: String,
    },
    LoopIteration {
        execution_id: Uuid,
        edge_id: String,
        node_id: String,
        iteration: u32,
    },
    LoopExhausted {
        execution_id: Uuid,
        edge_id: String,
    },
    ExecutionCompleted {
        execution_id: Uuid,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },
}

/// Receives execution events. Called inline by the run loop, so
/// implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ExecutionEvent);
}

/// Forwards events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelEventSink {
    pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        Self { sender }
    }

    /// A sink plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: ExecutionEvent) {
        // The receiver may have gone away.
        let _ = self.sender.send(event);
    }
}

/// Telemetry hook with coarse lifecycle callbacks. Every method defaults to
/// a no-op.
pub trait ExecutionObserver: Send + Sync {
    fn on_execution_started(&self, _execution: &Execution) {}

    fn on_node_finished(&self, _record: &NodeExecution) {}

    fn on_execution_finished(&self, _execution: &Execution) {}
}
