//! The `Executor` trait: the contract every node type must fulfil.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::NodeError;

/// Shared context passed to every executor call.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// executor implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Logical ID of the node being executed.
    pub node_id: String,
    /// The node's `type` string (the registry key).
    pub node_type: String,
    /// 1-based attempt number within the node's retry series.
    pub attempt: u32,
    /// 1-based iteration; greater than 1 only for nodes re-admitted by a loop edge.
    pub iteration: u32,
    /// Snapshot of the data context the node's config was resolved against:
    /// workflow variables, trigger input and completed upstream outputs.
    pub data: Arc<Value>,
    /// Cancelled when the run is cancelled or times out. Long-running
    /// executors should stop promptly once it fires.
    pub cancel: CancellationToken,
}

/// The core executor trait.
///
/// `config` is the node's configuration with every template reference
/// already substituted.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, config: Value, ctx: &ExecutionContext) -> Result<Value, NodeError>;
}
