//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow and its runs look
//! like in memory. Workflows serialise to/from the JSONB `definition` column
//! of the `workflows` table; executions map onto `workflow_executions` and
//! `node_executions`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// `source_handle` value that marks an edge as a failure route.
pub const ERROR_HANDLE: &str = "error";

/// Output key a multi-output node uses to pick which handles fire.
pub const HANDLE_KEY: &str = "$handle";

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Triggered by an incoming HTTP request to `/webhook/{path}`.
    Webhook {
        /// URL path segment that identifies this workflow.
        path: String,
    },
    /// Triggered manually via the API.
    Manual,
    /// Triggered on a cron schedule.
    Cron {
        /// Standard cron expression (5 fields).
        expression: String,
    },
}

/// A trigger attached to a workflow. Dispatch lives outside the engine; the
/// engine only needs to know whether the binding may still start runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerBinding {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger: Trigger,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Publication state of a workflow definition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Draft,
    Published,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Published => write!(f, "published"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Logical ID, unique within this workflow and stable across re-saves.
    /// Edges and templates address the node by it.
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Maps to a registered `Executor`, or to a UI-only type.
    #[serde(alias = "type")]
    pub node_type: String,
    /// Arbitrary configuration; string leaves may contain templates.
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, config: Value) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            node_type: node_type.into(),
            config,
            max_attempts: None,
            initial_delay_ms: None,
            max_delay_ms: None,
        }
    }

    /// Override the retry policy fields for this node.
    pub fn with_retry(mut self, max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self.initial_delay_ms = Some(initial_delay_ms);
        self.max_delay_ms = Some(max_delay_ms);
        self
    }
}

/// Bound on how many times a loop edge may send control back to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub max_iterations: u32,
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Boolean expression evaluated against the data context before traversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    /// Present on deliberate back-edges only.
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
}

impl Edge {
    pub fn new(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            condition: None,
            source_handle: None,
            loop_spec: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }

    pub fn looping(mut self, max_iterations: u32) -> Self {
        self.loop_spec = Some(LoopSpec { max_iterations });
        self
    }

    pub fn is_loop(&self) -> bool {
        self.loop_spec.is_some()
    }

    pub fn is_error_route(&self) -> bool {
        self.source_handle.as_deref() == Some(ERROR_HANDLE)
    }
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default = "default_version")]
    pub version: i32,
    /// Workflow-scoped constants, addressable as `{{ variables.<key> }}`.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_version() -> i32 {
    1
}

impl Workflow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: WorkflowStatus::Draft,
            version: 1,
            variables: Map::new(),
            metadata: Value::Null,
            nodes,
            edges,
            created_at: Utc::now(),
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The same workflow without nodes and edges, as returned by existence
    /// checks that do not load relations.
    pub fn without_relations(&self) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Lifecycle of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Lifecycle of one node visit within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown node status: {other}")),
        }
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub input: Value,
    pub output: Option<Value>,
    /// Concise failure summary; per-node detail lives on the node records.
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub node_executions: Vec<NodeExecution>,
}

impl Execution {
    /// A fresh `pending` execution.
    pub fn new(workflow_id: Uuid, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            node_executions: Vec::new(),
        }
    }

    /// All records for a logical node, in iteration order.
    pub fn node_runs<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a NodeExecution> + 'a {
        self.node_executions.iter().filter(move |n| n.node_id == node_id)
    }

    /// The latest record for a logical node.
    pub fn node(&self, node_id: &str) -> Option<&NodeExecution> {
        self.node_executions
            .iter()
            .filter(|n| n.node_id == node_id)
            .max_by_key(|n| n.iteration)
    }

    /// Insert or replace a node record by its ID.
    pub fn upsert_node(&mut self, record: NodeExecution) {
        match self.node_executions.iter_mut().find(|n| n.id == record.id) {
            Some(existing) => *existing = record,
            None => self.node_executions.push(record),
        }
    }
}

/// The durable record of one (node, iteration) within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    /// 1-based; increases each time a loop edge re-admits the node.
    pub iteration: u32,
    pub status: NodeStatus,
    /// 1-based count of executor invocations in this retry series.
    pub attempt: u32,
    /// Resolved config actually sent to the executor.
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// A `running` record for the first attempt of a node visit.
    pub fn started(execution_id: Uuid, node_id: impl Into<String>, iteration: u32, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.into(),
            iteration,
            status: NodeStatus::Running,
            attempt: 1,
            input,
            output: None,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    /// A terminal `skipped` record; the node never reached its executor.
    pub fn skipped(execution_id: Uuid, node_id: impl Into<String>, iteration: u32, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.into(),
            iteration,
            status: NodeStatus::Skipped,
            attempt: 0,
            input: Value::Null,
            output: None,
            error: Some(reason.into()),
            started_at: Some(now),
            completed_at: Some(now),
        }
    }

    pub fn complete(&mut self, output: Value) {
        self.status = NodeStatus::Completed;
        self.output = Some(output);
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = NodeStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}
