//! `engine` crate: workflow graph model, validation, and the execution engine.

pub mod dag;
pub mod error;
pub mod events;
pub mod manager;
pub mod memory;
pub mod models;
pub mod options;
pub mod registry;
pub mod repository;
pub mod runner;
pub mod scheduler;
pub mod template;

pub use dag::{check_edge, validate_dag, would_create_cycle};
pub use error::{EngineError, RepositoryError, TemplateError};
pub use events::{ChannelEventSink, EventSink, ExecutionEvent, ExecutionObserver};
pub use manager::ExecutionManager;
pub use memory::MemoryStore;
pub use models::{
    Edge, Execution, ExecutionStatus, NodeDefinition, NodeExecution, NodeStatus, Trigger, TriggerBinding, Workflow,
};
pub use options::{default_execution_options, ExecutionOptions, RetryPolicy};
pub use registry::ExecutorRegistry;
pub use repository::{ExecutionSink, WorkflowSource};
pub use template::{DataContext, TemplateResolver};
