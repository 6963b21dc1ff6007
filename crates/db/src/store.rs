//! `PgStore`: Postgres implementation of the engine's storage traits.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use engine::models::{Execution, NodeExecution, Workflow};
use engine::{ExecutionSink, RepositoryError, WorkflowSource};

use crate::models::{NodeExecutionRow, WorkflowExecutionRow, WorkflowRow};
use crate::repository::{executions, workflows};
use crate::{DbError, DbPool};

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store (or replace) a workflow definition.
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<(), DbError> {
        let row = WorkflowRow::from_workflow(workflow)?;
        workflows::upsert_workflow(&self.pool, &row).await?;
        debug!(workflow_id = %workflow.id, "workflow saved");
        Ok(())
    }
}

#[async_trait]
impl WorkflowSource for PgStore {
    async fn find_by_id_with_relations(&self, id: Uuid) -> Result<Workflow, RepositoryError> {
        let row = workflows::get_workflow(&self.pool, id).await?;
        Ok(row.into_workflow()?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Workflow, RepositoryError> {
        let workflow = self.find_by_id_with_relations(id).await?;
        Ok(workflow.without_relations())
    }
}

#[async_trait]
impl ExecutionSink for PgStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        executions::insert_execution(&self.pool, &WorkflowExecutionRow::from(execution)).await?;
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        executions::update_execution(&self.pool, &WorkflowExecutionRow::from(execution)).await?;
        Ok(())
    }

    async fn find_execution_by_id(&self, id: Uuid) -> Result<Execution, RepositoryError> {
        let header = executions::get_execution(&self.pool, id).await?;
        let nodes = executions::list_node_executions(&self.pool, id).await?;
        Ok(header.into_execution(nodes)?)
    }

    async fn create_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError> {
        executions::upsert_node_execution(&self.pool, &NodeExecutionRow::from(record)).await?;
        Ok(())
    }

    async fn update_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError> {
        executions::upsert_node_execution(&self.pool, &NodeExecutionRow::from(record)).await?;
        Ok(())
    }
}
