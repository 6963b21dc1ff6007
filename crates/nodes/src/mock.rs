//! `MockExecutor`: a test double for `Executor`.
//!
//! Useful in unit and integration tests where a real executor is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ExecutionContext, Executor, NodeError};

/// Behaviour injected into `MockExecutor` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Return a specific JSON value (merged with `{"node": name}`).
    ReturnValue(Value),
    /// Return the resolved config unchanged.
    Echo,
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `times` calls, then echo.
    FailTimes { times: usize, message: String },
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub node_id: String,
    pub config: Value,
    pub attempt: u32,
    pub iteration: u32,
}

/// A mock executor that records every call it receives and returns a
/// programmer-specified result.
pub struct MockExecutor {
    /// Label used in test assertions.
    pub name: String,
    /// What the executor will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Optional artificial latency; cut short when the run is cancelled.
    pub delay: Option<Duration>,
    /// All calls seen by this executor (in call order).
    pub calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockExecutor {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that returns whatever config it was handed.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Echo)
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `times` times before echoing its config.
    pub fn flaky(name: impl Into<String>, times: usize, msg: impl Into<String>) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::FailTimes {
                times,
                message: msg.into(),
            },
        )
    }

    /// Sleep for `delay` before producing the result.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times this executor has been called.
    pub fn call_count(&self) -> usize {
        self.lock_calls().len()
    }

    /// A copy of every call recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock_calls().clone()
    }

    fn lock_calls(&self) -> MutexGuard<'_, Vec<MockCall>> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(&self, config: Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let seen = {
            let mut calls = self.lock_calls();
            calls.push(MockCall {
                node_id: ctx.node_id.clone(),
                config: config.clone(),
                attempt: ctx.attempt,
                iteration: ctx.iteration,
            });
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancel.cancelled() => {
                    return Err(NodeError::Fatal(format!("{} cancelled", self.name)));
                }
            }
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                // Merge the node's own output field so tests can trace the
                // data flowing through the graph.
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Ok(out)
            }
            MockBehaviour::Echo => Ok(config),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FailTimes { times, message } => {
                if seen <= *times {
                    Err(NodeError::Retryable(message.clone()))
                } else {
                    Ok(config)
                }
            }
        }
    }
}
