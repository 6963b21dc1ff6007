//! Storage collaborators the engine runs against.
//!
//! The engine never talks to a database directly; the `db` crate provides a
//! Postgres implementation and [`crate::memory::MemoryStore`] an in-process
//! one.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Execution, NodeExecution, Workflow};
use crate::RepositoryError;

/// Read access to workflow definitions.
#[async_trait]
pub trait WorkflowSource: Send + Sync {
    /// The workflow with its nodes and edges populated.
    async fn find_by_id_with_relations(&self, id: Uuid) -> Result<Workflow, RepositoryError>;

    /// Existence check; nodes and edges may be left empty.
    async fn find_by_id(&self, id: Uuid) -> Result<Workflow, RepositoryError>;
}

/// Durable storage for executions and their node records.
///
/// Node records are written individually as they reach a terminal state so
/// completed work survives a crash mid-run.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError>;

    /// Update the execution header (status, output, error, timestamps).
    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError>;

    /// The execution with every node record attached.
    async fn find_execution_by_id(&self, id: Uuid) -> Result<Execution, RepositoryError>;

    async fn create_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError>;

    /// Insert-or-replace by record ID.
    async fn update_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError>;
}
