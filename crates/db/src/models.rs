//! Row structs that map 1-to-1 onto database tables, plus the conversions
//! to and from the engine's domain types.
//!
//! Status enums are stored as their `Display` text; counters as `INTEGER`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use engine::models::{Edge, Execution, NodeDefinition, NodeExecution, Workflow};

use crate::DbError;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub status: String,
    pub version: i32,
    /// Nodes, edges, variables and metadata as one JSON document.
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

/// Shape of the `definition` column.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Definition {
    #[serde(default)]
    variables: Map<String, Value>,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    nodes: Vec<NodeDefinition>,
    #[serde(default)]
    edges: Vec<Edge>,
}

impl WorkflowRow {
    pub fn from_workflow(workflow: &Workflow) -> Result<Self, DbError> {
        let definition = Definition {
            variables: workflow.variables.clone(),
            metadata: workflow.metadata.clone(),
            nodes: workflow.nodes.clone(),
            edges: workflow.edges.clone(),
        };
        Ok(Self {
            id: workflow.id,
            name: workflow.name.clone(),
            status: workflow.status.to_string(),
            version: workflow.version,
            definition: serde_json::to_value(definition).map_err(|e| DbError::decode("workflows", e))?,
            created_at: workflow.created_at,
        })
    }

    pub fn into_workflow(self) -> Result<Workflow, DbError> {
        let definition: Definition =
            serde_json::from_value(self.definition).map_err(|e| DbError::decode("workflows", e))?;
        Ok(Workflow {
            id: self.id,
            name: self.name,
            status: self.status.parse().map_err(|e| DbError::decode("workflows", e))?,
            version: self.version,
            variables: definition.variables,
            metadata: definition.metadata,
            nodes: definition.nodes,
            edges: definition.edges,
            created_at: self.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// A persisted workflow execution row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Execution> for WorkflowExecutionRow {
    fn from(execution: &Execution) -> Self {
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id,
            status: execution.status.to_string(),
            input: execution.input.clone(),
            output: execution.output.clone(),
            error: execution.error.clone(),
            started_at: execution.started_at,
            completed_at: execution.completed_at,
        }
    }
}

impl WorkflowExecutionRow {
    /// Rebuild the aggregate from the header row and its node rows.
    pub fn into_execution(self, nodes: Vec<NodeExecutionRow>) -> Result<Execution, DbError> {
        Ok(Execution {
            id: self.id,
            workflow_id: self.workflow_id,
            status: self.status.parse().map_err(|e| DbError::decode("workflow_executions", e))?,
            input: self.input,
            output: self.output,
            error: self.error,
            started_at: self.started_at,
            completed_at: self.completed_at,
            node_executions: nodes
                .into_iter()
                .map(NodeExecutionRow::into_node_execution)
                .collect::<Result<_, _>>()?,
        })
    }
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// A persisted node execution row; one per (node, iteration).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NodeExecutionRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub iteration: i32,
    pub status: String,
    pub attempt: i32,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&NodeExecution> for NodeExecutionRow {
    fn from(record: &NodeExecution) -> Self {
        Self {
            id: record.id,
            execution_id: record.execution_id,
            node_id: record.node_id.clone(),
            iteration: i32::try_from(record.iteration).unwrap_or(i32::MAX),
            status: record.status.to_string(),
            attempt: i32::try_from(record.attempt).unwrap_or(i32::MAX),
            input: record.input.clone(),
            output: record.output.clone(),
            error: record.error.clone(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

impl NodeExecutionRow {
    pub fn into_node_execution(self) -> Result<NodeExecution, DbError> {
        Ok(NodeExecution {
            id: self.id,
            execution_id: self.execution_id,
            node_id: self.node_id,
            iteration: u32::try_from(self.iteration).map_err(|e| DbError::decode("node_executions", e))?,
            status: self.status.parse().map_err(|e| DbError::decode("node_executions", e))?,
            attempt: u32::try_from(self.attempt).map_err(|e| DbError::decode("node_executions", e))?,
            input: self.input,
            output: self.output,
            error: self.error,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
