//! Runs one node visit: config resolution, executor dispatch, retries.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::ExecutionContext;

use crate::events::{EventSink, ExecutionEvent};
use crate::models::{NodeDefinition, NodeExecution};
use crate::options::RetryPolicy;
use crate::registry::ExecutorRegistry;
use crate::repository::ExecutionSink;
use crate::template::TemplateResolver;
use crate::EngineError;

/// Everything a dispatched node visit needs, owned so it can move into a
/// spawned task.
#[derive(Debug, Clone)]
pub struct NodeTask {
    /// ID of the node record; assigned before dispatch so every write for
    /// this visit lands on the same row.
    pub record_id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub node: NodeDefinition,
    pub iteration: u32,
    /// Config with every template already substituted.
    pub config: Value,
    pub policy: RetryPolicy,
    /// Data context snapshot the config was resolved against.
    pub data: Arc<Value>,
}

/// Executes single node visits on behalf of the execution manager.
#[derive(Clone)]
pub struct NodeRunner {
    registry: Arc<ExecutorRegistry>,
    resolver: Arc<TemplateResolver>,
    executions: Arc<dyn ExecutionSink>,
    events: Option<Arc<dyn EventSink>>,
}

impl NodeRunner {
    pub fn new(
        registry: Arc<ExecutorRegistry>,
        resolver: Arc<TemplateResolver>,
        executions: Arc<dyn ExecutionSink>,
    ) -> Self {
        Self {
            registry,
            resolver,
            executions,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<Arc<dyn EventSink>>) -> Self {
        self.events = events;
        self
    }

    /// Resolve `node.config` against a data context snapshot.
    ///
    /// # Errors
    /// [`EngineError::TemplateResolution`] attributed to `node`.
    pub fn resolve(&self, node: &NodeDefinition, data: &Value, iteration: u32) -> Result<Value, EngineError> {
        self.resolver
            .resolve(&node.config, data, iteration)
            .map_err(|source| EngineError::TemplateResolution {
                node_id: node.id.clone(),
                source,
            })
    }

    /// Run the visit to a terminal record.
    ///
    /// Never returns an error: executor failures, a missing executor and
    /// cancellation all end up on the returned record as `failed`. The
    /// `running` record is persisted before the first attempt and the
    /// terminal one after the last.
    #[instrument(skip_all, fields(execution_id = %task.execution_id, node_id = %task.node.id, iteration = task.iteration))]
    pub async fn run(&self, task: NodeTask, cancel: CancellationToken) -> NodeExecution {
        let mut record = NodeExecution::started(task.execution_id, task.node.id.clone(), task.iteration, task.config.clone());
        record.id = task.record_id;
        if let Err(e) = self.executions.create_node_execution(&record).await {
            warn!(error = %e, "failed to persist node start");
        }

        match self.registry.get(&task.node.node_type) {
            Ok(executor) => self.attempt_until_done(&task, executor.as_ref(), &mut record, &cancel).await,
            Err(e) => record.fail(e.to_string()),
        }

        if let Err(e) = self.executions.update_node_execution(&record).await {
            warn!(error = %e, "failed to persist node result");
        }
        record
    }

    async fn attempt_until_done(
        &self,
        task: &NodeTask,
        executor: &dyn nodes::Executor,
        record: &mut NodeExecution,
        cancel: &CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                record.fail("execution cancelled");
                return;
            }

            let ctx = ExecutionContext {
                workflow_id: task.workflow_id,
                execution_id: task.execution_id,
                node_id: task.node.id.clone(),
                node_type: task.node.node_type.clone(),
                attempt: record.attempt,
                iteration: task.iteration,
                data: Arc::clone(&task.data),
                cancel: cancel.clone(),
            };
            debug!(attempt = record.attempt, "invoking executor");

            let outcome = AssertUnwindSafe(executor.execute(task.config.clone(), &ctx))
                .catch_unwind()
                .await;
            let err = match outcome {
                Ok(Ok(output)) => {
                    info!(attempt = record.attempt, "node completed");
                    record.complete(output);
                    return;
                }
                Ok(Err(err)) => err,
                Err(payload) => {
                    let message = format!("executor panicked: {}", panic_message(payload.as_ref()));
                    error!(attempt = record.attempt, error = %message, "node failed");
                    record.fail(message);
                    return;
                }
            };

            let message = err.message().to_owned();
            if !err.is_retryable() || record.attempt >= task.policy.max_attempts {
                warn!(attempt = record.attempt, error = %message, "node failed");
                record.fail(message);
                return;
            }

            let delay = task.policy.backoff(record.attempt);
            warn!(
                attempt = record.attempt,
                max_attempts = task.policy.max_attempts,
                ?delay,
                error = %message,
                "retryable node error, backing off"
            );
            if let Some(events) = &self.events {
                events.emit(ExecutionEvent::NodeRetrying {
                    execution_id: task.execution_id,
                    node_id: task.node.id.clone(),
                    iteration: task.iteration,
                    attempt: record.attempt,
                    error: message.clone(),
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                });
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    record.fail(format!("execution cancelled (last error: {message})"));
                    return;
                }
            }
            record.attempt += 1;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{Execution, NodeStatus};
    use nodes::mock::MockExecutor;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        runner: NodeRunner,
        store: Arc<MemoryStore>,
        execution: Execution,
    }

    async fn fixture(node_type: &str, executor: Arc<MockExecutor>) -> Fixture {
        let mut registry = ExecutorRegistry::new();
        registry.register(node_type, executor);
        let store = Arc::new(MemoryStore::new());
        let execution = Execution::new(Uuid::new_v4(), json!({}));
        store.create_execution(&execution).await.unwrap();
        let runner = NodeRunner::new(Arc::new(registry), Arc::new(TemplateResolver::new()), store.clone());
        Fixture { runner, store, execution }
    }

    fn task(execution: &Execution, node: NodeDefinition, policy: RetryPolicy) -> NodeTask {
        NodeTask {
            record_id: Uuid::new_v4(),
            workflow_id: execution.workflow_id,
            execution_id: execution.id,
            config: node.config.clone(),
            node,
            iteration: 1,
            policy,
            data: Arc::new(json!({})),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_attempts_are_exhausted() {
        let mock = Arc::new(MockExecutor::failing_retryable("flaky", "dial tcp 10.1.2.3:5432: connection refused"));
        let fx = fixture("db", mock.clone()).await;
        let node = NodeDefinition::new("query", "db", json!({}));

        let started = tokio::time::Instant::now();
        let record = fx.runner.run(task(&fx.execution, node, policy(3)), CancellationToken::new()).await;

        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.attempt, 3);
        assert_eq!(record.error.as_deref(), Some("dial tcp 10.1.2.3:5432: connection refused"));
        assert_eq!(mock.call_count(), 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));

        let stored = fx.store.find_execution_by_id(fx.execution.id).await.unwrap();
        assert_eq!(stored.node_executions, vec![record]);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let mock = Arc::new(MockExecutor::flaky("flaky", 2, "busy"));
        let fx = fixture("svc", mock.clone()).await;
        let node = NodeDefinition::new("call", "svc", json!({ "q": 1 }));

        let record = fx.runner.run(task(&fx.execution, node, policy(5)), CancellationToken::new()).await;

        assert_eq!(record.status, NodeStatus::Completed);
        assert_eq!(record.attempt, 3);
        assert_eq!(record.output, Some(json!({ "q": 1 })));
        let attempts: Vec<u32> = mock.calls().iter().map(|c| c.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mock = Arc::new(MockExecutor::failing_fatal("bad", "invalid api key"));
        let fx = fixture("llm", mock.clone()).await;
        let node = NodeDefinition::new("ask", "llm", json!({}));

        let record = fx.runner.run(task(&fx.execution, node, policy(5)), CancellationToken::new()).await;

        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.attempt, 1);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let mock = Arc::new(MockExecutor::failing_retryable("down", "503"));
        let fx = fixture("http", mock.clone()).await;
        let node = NodeDefinition::new("fetch", "http", json!({}));
        let cancel = CancellationToken::new();

        let slow = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });
        let record = fx.runner.run(task(&fx.execution, node, slow), cancel).await;

        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.attempt, 1);
        assert!(record.error.unwrap().contains("503"));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn resolution_errors_name_the_node() {
        let fx = fixture("x", Arc::new(MockExecutor::echo("x"))).await;
        let node = NodeDefinition::new("send", "x", json!({ "to": "{{ lookup.email }}" }));
        let err = fx.runner.resolve(&node, &json!({}), 1).unwrap_err();
        assert!(matches!(err, EngineError::TemplateResolution { node_id, .. } if node_id == "send"));
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl nodes::Executor for Panicking {
        async fn execute(&self, _config: Value, _ctx: &ExecutionContext) -> Result<Value, nodes::NodeError> {
            panic!("index out of bounds: the len is 0 but the index is 0");
        }
    }

    #[tokio::test]
    async fn panicking_executor_fails_its_own_record() {
        let mut registry = ExecutorRegistry::new();
        registry.register("boom", Arc::new(Panicking));
        let store = Arc::new(MemoryStore::new());
        let execution = Execution::new(Uuid::new_v4(), json!({}));
        store.create_execution(&execution).await.unwrap();
        let runner = NodeRunner::new(Arc::new(registry), Arc::new(TemplateResolver::new()), store.clone());
        let node = NodeDefinition::new("parse", "boom", json!({}));
        let task = task(&execution, node, policy(3));
        let record_id = task.record_id;

        let record = runner.run(task, CancellationToken::new()).await;

        assert_eq!(record.id, record_id);
        assert_eq!(record.status, NodeStatus::Failed);
        assert_eq!(record.attempt, 1);
        assert_eq!(
            record.error.as_deref(),
            Some("executor panicked: index out of bounds: the len is 0 but the index is 0")
        );
        let stored = store.find_execution_by_id(execution.id).await.unwrap();
        assert_eq!(stored.node_executions, vec![record]);
    }

    #[tokio::test]
    async fn missing_executor_fails_the_record() {
        let fx = fixture("x", Arc::new(MockExecutor::echo("x"))).await;
        let node = NodeDefinition::new("n", "unregistered", json!({}));
        let record = fx.runner.run(task(&fx.execution, node, policy(1)), CancellationToken::new()).await;
        assert_eq!(record.status, NodeStatus::Failed);
        assert!(record.error.unwrap().contains("unregistered"));
    }
}
