//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::models::Execution;

/// Failure to turn a template (or an edge condition) into a value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// The template is not valid template syntax.
    #[error("invalid template at '{path}': {message}")]
    Syntax { path: String, message: String },

    /// A reference could not be satisfied from the data context.
    #[error("unresolved reference at '{path}': {message}")]
    Unresolved { path: String, message: String },
}

/// Errors surfaced by the workflow and execution stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// Anything the backing store reports (connection loss, constraint …).
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Definition errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// Two or more edges share the same ID.
    #[error("duplicate edge ID: '{0}'")]
    DuplicateEdgeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    /// An edge starts and ends at the same node.
    #[error("edge '{edge_id}' is a self-loop on node '{node_id}'")]
    SelfLoop { edge_id: String, node_id: String },

    /// A loop edge carries a condition.
    #[error("loop edge '{0}' must not carry a condition")]
    ConditionalLoop(String),

    /// A loop edge declares `max_iterations == 0`.
    #[error("loop edge '{0}' must allow at least one iteration")]
    InvalidLoopBound(String),

    /// Adding `from → to` closes a cycle over non-loop edges.
    #[error("edge '{from}' -> '{to}' would create a cycle")]
    CycleDetected { from: String, to: String },

    /// A node's type is neither registered nor UI-only.
    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    // ------ Lookup errors ------

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(Uuid),

    #[error("invalid workflow id '{0}'")]
    InvalidWorkflowId(String),

    #[error("no executor registered for node type '{0}'")]
    ExecutorNotFound(String),

    /// The manual re-trigger path was used on a disabled trigger.
    #[error("trigger '{0}' is disabled")]
    TriggerDisabled(Uuid),

    // ------ Execution errors ------

    /// A node's config (or an inbound edge condition) could not be resolved.
    #[error("node '{node_id}': {source}")]
    TemplateResolution {
        node_id: String,
        #[source]
        source: TemplateError,
    },

    /// A node exhausted its attempts (or failed fatally) with no error route.
    #[error("node '{node_id}' failed: {message}")]
    NodeFailed { node_id: String, message: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution timed out after {0:?}")]
    TimedOut(Duration),

    /// A run reached a terminal `failed` state. The execution, including
    /// every node record, travels with the error.
    #[error("execution {id} failed: {source}", id = .execution.id)]
    ExecutionFailed {
        execution: Box<Execution>,
        #[source]
        source: Box<EngineError>,
    },

    /// Persistence error from a repository collaborator.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// The failed execution, for errors raised after the run started.
    pub fn execution(&self) -> Option<&Execution> {
        match self {
            Self::ExecutionFailed { execution, .. } => Some(execution),
            _ => None,
        }
    }

    /// Unwraps `ExecutionFailed` to the reason the run failed.
    pub fn root(&self) -> &EngineError {
        match self {
            Self::ExecutionFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for malformed-graph errors that no retry can fix.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNodeId(_)
                | Self::DuplicateEdgeId(_)
                | Self::UnknownNodeReference { .. }
                | Self::SelfLoop { .. }
                | Self::ConditionalLoop(_)
                | Self::InvalidLoopBound(_)
                | Self::CycleDetected { .. }
                | Self::UnknownNodeType { .. }
        )
    }
}
