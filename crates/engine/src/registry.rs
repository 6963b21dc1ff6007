//! Executor registry: maps node `type` strings to executors.
//!
//! Populated once at process start and shared read-only (`Arc<ExecutorRegistry>`)
//! by every run, so lookups need no locking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nodes::builtin::{PassthroughExecutor, PASSTHROUGH};
use nodes::Executor;

use crate::EngineError;

/// Diagram-only node types every registry accepts but never executes.
pub const UI_ONLY_TYPES: &[&str] = &["comment", "note", "sticky_note", "annotation"];

/// How the scheduler must treat a node type.
#[derive(Clone)]
pub enum NodeKind {
    /// Dispatch to this executor.
    Executable(Arc<dyn Executor>),
    /// Authoring annotation with no runtime behaviour.
    UiOnly,
    /// Neither registered nor UI-only.
    Unknown,
}

/// Lookup from node `type` to executor.
#[derive(Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
    ui_only: HashSet<String>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorRegistry {
    /// An empty registry that already knows the UI-only types.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            ui_only: UI_ONLY_TYPES.iter().map(|t| (*t).to_owned()).collect(),
        }
    }

    /// A registry with the built-in executors from the `nodes` crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(PASSTHROUGH, Arc::new(PassthroughExecutor));
        registry
    }

    /// Register (or replace) the executor for `node_type`.
    pub fn register(&mut self, node_type: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.executors.insert(node_type.into(), executor);
        self
    }

    /// Declare an additional diagram-only type.
    pub fn register_ui_only(&mut self, node_type: impl Into<String>) -> &mut Self {
        self.ui_only.insert(node_type.into());
        self
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    pub fn get(&self, node_type: &str) -> Result<Arc<dyn Executor>, EngineError> {
        self.executors
            .get(node_type)
            .cloned()
            .ok_or_else(|| EngineError::ExecutorNotFound(node_type.to_owned()))
    }

    pub fn is_ui_only(&self, node_type: &str) -> bool {
        self.ui_only.contains(node_type)
    }

    /// UI-only wins over a registration under the same name.
    pub fn classify(&self, node_type: &str) -> NodeKind {
        if self.is_ui_only(node_type) {
            return NodeKind::UiOnly;
        }
        match self.executors.get(node_type) {
            Some(executor) => NodeKind::Executable(Arc::clone(executor)),
            None => NodeKind::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodes::mock::MockExecutor;
    use serde_json::json;

    #[test]
    fn lookup_by_type() {
        let mut registry = ExecutorRegistry::new();
        registry.register("http", Arc::new(MockExecutor::returning("http", json!({}))));

        assert!(registry.has("http"));
        assert!(registry.get("http").is_ok());
        assert!(matches!(
            registry.get("llm"),
            Err(EngineError::ExecutorNotFound(t)) if t == "llm"
        ));
    }

    #[test]
    fn ui_only_types_are_a_distinct_kind() {
        let mut registry = ExecutorRegistry::with_builtins();
        registry.register_ui_only("frame");

        assert!(matches!(registry.classify("comment"), NodeKind::UiOnly));
        assert!(matches!(registry.classify("frame"), NodeKind::UiOnly));
        assert!(matches!(registry.classify(PASSTHROUGH), NodeKind::Executable(_)));
        assert!(matches!(registry.classify("nope"), NodeKind::Unknown));
        // UI-only types are never a registry hit.
        assert!(!registry.has("comment"));
    }
}
