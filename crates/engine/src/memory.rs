//! In-process store implementing both repository traits. Backs tests and
//! `rusty-flow run` when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Execution, NodeExecution, Workflow};
use crate::repository::{ExecutionSink, WorkflowSource};
use crate::RepositoryError;

#[derive(Default)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<Uuid, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    /// Every stored execution of `workflow_id`.
    pub async fn executions_for(&self, workflow_id: Uuid) -> Vec<Execution> {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkflowSource for MemoryStore {
    async fn find_by_id_with_relations(&self, id: Uuid) -> Result<Workflow, RepositoryError> {
        self.workflows.read().await.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Workflow, RepositoryError> {
        self.workflows
            .read()
            .await
            .get(&id)
            .map(Workflow::without_relations)
            .ok_or(RepositoryError::NotFound)
    }
}

#[async_trait]
impl ExecutionSink for MemoryStore {
    async fn create_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(RepositoryError::Backend(format!("execution {} already exists", execution.id)));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        let stored = executions.get_mut(&execution.id).ok_or(RepositoryError::NotFound)?;
        let node_executions = std::mem::take(&mut stored.node_executions);
        *stored = Execution {
            node_executions,
            ..execution.clone()
        };
        Ok(())
    }

    async fn find_execution_by_id(&self, id: Uuid) -> Result<Execution, RepositoryError> {
        self.executions.read().await.get(&id).cloned().ok_or(RepositoryError::NotFound)
    }

    async fn create_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError> {
        self.update_node_execution(record).await
    }

    async fn update_node_execution(&self, record: &NodeExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        let stored = executions
            .get_mut(&record.execution_id)
            .ok_or(RepositoryError::NotFound)?;
        stored.upsert_node(record.clone());
        Ok(())
    }
}
