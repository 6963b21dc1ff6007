//! Built-in executors that ship with the engine.
//!
//! The real library of node types (HTTP, LLM, transforms, …) is registered by
//! the host process; these exist so a workflow can be run end-to-end without
//! any external plugin.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{ExecutionContext, Executor, NodeError};

/// Registry key of [`PassthroughExecutor`].
pub const PASSTHROUGH: &str = "passthrough";

/// Returns its resolved config unchanged as the node output.
///
/// Handy for wiring data between nodes and for shaping a workflow's final
/// output from upstream results.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughExecutor;

#[async_trait]
impl Executor for PassthroughExecutor {
    async fn execute(&self, config: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        debug!(node_id = %ctx.node_id, iteration = ctx.iteration, "passthrough");
        Ok(config)
    }
}
