//! Execution manager: drives one workflow run end to end.
//!
//! A run goes through these steps:
//! 1. Pre-flight: parse the workflow ID, load the workflow, validate the
//!    graph, check every node type and every template's syntax. Failures are
//!    returned before any record exists.
//! 2. Create and persist the `pending` execution.
//! 3. Drive scheduler waves: resolve configs, dispatch the wave to the node
//!    runner concurrently, feed results back, repeat.
//! 4. Finalize status, output and error summary, then persist the header.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::dag::validate_dag;
use crate::events::{EventSink, ExecutionEvent, ExecutionObserver};
use crate::models::{Execution, ExecutionStatus, NodeExecution, NodeStatus, TriggerBinding, Workflow};
use crate::options::{default_execution_options, ExecutionOptions};
use crate::registry::{ExecutorRegistry, NodeKind};
use crate::repository::{ExecutionSink, WorkflowSource};
use crate::runner::{NodeRunner, NodeTask};
use crate::scheduler::{LoopEvent, Scheduler, Wave};
use crate::template::{DataContext, TemplateResolver};
use crate::{EngineError, RepositoryError};

/// Entry point for running workflows. Cheap to clone; clones share the
/// registry, the stores and the optional side channels.
#[derive(Clone)]
pub struct ExecutionManager {
    workflows: Arc<dyn WorkflowSource>,
    executions: Arc<dyn ExecutionSink>,
    registry: Arc<ExecutorRegistry>,
    resolver: Arc<TemplateResolver>,
    events: Option<Arc<dyn EventSink>>,
    observer: Option<Arc<dyn ExecutionObserver>>,
}

impl ExecutionManager {
    pub fn new(
        workflows: Arc<dyn WorkflowSource>,
        executions: Arc<dyn ExecutionSink>,
        registry: Arc<ExecutorRegistry>,
    ) -> Self {
        Self {
            workflows,
            executions,
            registry,
            resolver: Arc::new(TemplateResolver::new()),
            events: None,
            observer: None,
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ExecutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn default_options() -> ExecutionOptions {
        default_execution_options()
    }

    /// Run a workflow to completion.
    ///
    /// # Errors
    /// Pre-flight errors (`InvalidWorkflowId`, `WorkflowNotFound`, definition
    /// errors, `TemplateResolution` for malformed templates) are returned
    /// before any record is created. Once the run has started, every failure
    /// comes back as [`EngineError::ExecutionFailed`] carrying the execution
    /// with all its node records.
    pub async fn execute(
        &self,
        workflow_id: &str,
        input: Value,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let (workflow, execution) = self.prepare(workflow_id, input).await?;
        self.drive(workflow, execution, options, cancel).await
    }

    /// Persist a `pending` execution and run it on a background task.
    ///
    /// Returns as soon as the record exists; poll
    /// [`ExecutionManager::find_execution`] for progress.
    pub async fn execute_async(
        &self,
        workflow_id: &str,
        input: Value,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        let (workflow, execution) = self.prepare(workflow_id, input).await?;
        let pending = execution.clone();
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.drive(workflow, execution, options, cancel).await {
                warn!(error = %e, "background execution ended with an error");
            }
        });
        Ok(pending)
    }

    /// Manual re-trigger through a trigger binding.
    ///
    /// # Errors
    /// [`EngineError::TriggerDisabled`] when the binding is disabled; otherwise
    /// as [`ExecutionManager::execute`].
    pub async fn retrigger(
        &self,
        binding: &TriggerBinding,
        input: Value,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        if !binding.enabled {
            return Err(EngineError::TriggerDisabled(binding.id));
        }
        self.execute(&binding.workflow_id.to_string(), input, options, cancel)
            .await
    }

    pub async fn find_execution(&self, id: Uuid) -> Result<Execution, EngineError> {
        Ok(self.executions.find_execution_by_id(id).await?)
    }

    // -----------------------------------------------------------------------
    // Pre-flight
    // -----------------------------------------------------------------------

    async fn prepare(&self, workflow_id: &str, input: Value) -> Result<(Arc<Workflow>, Execution), EngineError> {
        let id = Uuid::parse_str(workflow_id.trim())
            .map_err(|_| EngineError::InvalidWorkflowId(workflow_id.to_owned()))?;
        let workflow = match self.workflows.find_by_id_with_relations(id).await {
            Ok(workflow) => workflow,
            Err(RepositoryError::NotFound) => return Err(EngineError::WorkflowNotFound(id)),
            Err(e) => return Err(e.into()),
        };

        validate_dag(&workflow)?;
        self.check_nodes(&workflow)?;

        let execution = Execution::new(workflow.id, input);
        self.executions.create_execution(&execution).await?;
        info!(execution_id = %execution.id, workflow_id = %workflow.id, "execution created");
        Ok((Arc::new(workflow), execution))
    }

    fn check_nodes(&self, workflow: &Workflow) -> Result<(), EngineError> {
        for node in &workflow.nodes {
            match self.registry.classify(&node.node_type) {
                NodeKind::UiOnly => continue,
                NodeKind::Unknown => {
                    return Err(EngineError::UnknownNodeType {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                    })
                }
                NodeKind::Executable(_) => {}
            }
            self.resolver
                .check(&node.config, "config")
                .map_err(|source| EngineError::TemplateResolution {
                    node_id: node.id.clone(),
                    source,
                })?;
        }
        for edge in &workflow.edges {
            if let Some(condition) = &edge.condition {
                self.resolver
                    .check_condition(condition, &format!("edges.{}.condition", edge.id))
                    .map_err(|source| EngineError::TemplateResolution {
                        node_id: edge.to.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run loop
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(execution_id = %execution.id, workflow_id = %workflow.id))]
    async fn drive(
        &self,
        workflow: Arc<Workflow>,
        mut execution: Execution,
        options: ExecutionOptions,
        cancel: CancellationToken,
    ) -> Result<Execution, EngineError> {
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        self.persist_header(&execution).await;
        self.emit(ExecutionEvent::ExecutionStarted {
            execution_id: execution.id,
            workflow_id: workflow.id,
        });
        if let Some(observer) = &self.observer {
            observer.on_execution_started(&execution);
        }
        info!(nodes = workflow.nodes.len(), edges = workflow.edges.len(), "execution started");

        let runner = NodeRunner::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.resolver),
            Arc::clone(&self.executions),
        )
        .with_events(self.events.clone());
        let mut scheduler = Scheduler::new(&workflow, &self.registry);
        let mut data = DataContext::new(workflow.variables.clone(), execution.input.clone());
        let deadline = options.timeout.map(|t| Instant::now() + t);
        let run_cancel = cancel.child_token();
        let limiter = options.max_concurrency.map(|n| Arc::new(Semaphore::new(n.max(1))));
        let mut abort: Option<EngineError> = None;

        while !scheduler.is_finished() {
            if cancel.is_cancelled() {
                abort = Some(EngineError::Cancelled);
                break;
            }
            if let (Some(deadline), Some(timeout)) = (deadline, options.timeout) {
                if Instant::now() >= deadline {
                    abort = Some(EngineError::TimedOut(timeout));
                    break;
                }
            }

            let snapshot = Arc::new(data.snapshot());
            let wave = match scheduler.next_wave(&self.resolver, &snapshot) {
                Ok(wave) => wave,
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            };
            self.note_loops(execution.id, &wave);
            for skip in &wave.skipped {
                let record = NodeExecution::skipped(execution.id, &skip.node_id, skip.iteration, skip.reason.to_string());
                if let Err(e) = self.executions.create_node_execution(&record).await {
                    warn!(node_id = %record.node_id, error = %e, "failed to persist skipped node");
                }
                self.emit(ExecutionEvent::NodeSkipped {
                    execution_id: execution.id,
                    node_id: skip.node_id.clone(),
                    iteration: skip.iteration,
                    reason: skip.reason.to_string(),
                });
                execution.upsert_node(record);
            }
            if wave.ready.is_empty() {
                continue;
            }

            let tasks = match self.build_tasks(&runner, &workflow, &execution, &wave, &snapshot, &options) {
                Ok(tasks) => tasks,
                Err(e) => {
                    abort = Some(e);
                    break;
                }
            };

            let (records, interrupted) = self
                .dispatch(&runner, tasks, limiter.as_ref(), &cancel, &run_cancel, deadline, &options)
                .await;
            for record in records {
                scheduler.record(&record);
                if record.status == NodeStatus::Completed {
                    if let Some(output) = &record.output {
                        data.record_output(&record.node_id, output.clone());
                    }
                }
                self.note_node(&record);
                execution.upsert_node(record);
            }
            if let Some(reason) = interrupted {
                abort = Some(reason);
                break;
            }
        }

        if abort.is_some() {
            scheduler.abort();
        }
        let failure = abort.or_else(|| summarize_failures(scheduler.failures()));
        self.finalize(&workflow, execution, &data, failure).await
    }

    fn build_tasks(
        &self,
        runner: &NodeRunner,
        workflow: &Workflow,
        execution: &Execution,
        wave: &Wave,
        snapshot: &Arc<Value>,
        options: &ExecutionOptions,
    ) -> Result<Vec<NodeTask>, EngineError> {
        wave.ready
            .iter()
            .map(|admission| {
                let node = workflow.node(&admission.node_id).ok_or_else(|| EngineError::NodeFailed {
                    node_id: admission.node_id.clone(),
                    message: "node definition missing".to_owned(),
                })?;
                let config = runner.resolve(node, snapshot, admission.iteration)?;
                Ok(NodeTask {
                    record_id: Uuid::new_v4(),
                    workflow_id: workflow.id,
                    execution_id: execution.id,
                    node: node.clone(),
                    iteration: admission.iteration,
                    config,
                    policy: options.default_retry.for_node(node),
                    data: Arc::clone(snapshot),
                })
            })
            .collect()
    }

    /// Run one wave concurrently. Returns every terminal record plus the
    /// reason the run must stop, if cancellation or the deadline hit. Even
    /// then the whole wave is awaited so no record is left `running`.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        runner: &NodeRunner,
        tasks: Vec<NodeTask>,
        limiter: Option<&Arc<Semaphore>>,
        cancel: &CancellationToken,
        run_cancel: &CancellationToken,
        deadline: Option<Instant>,
        options: &ExecutionOptions,
    ) -> (Vec<NodeExecution>, Option<EngineError>) {
        let mut started = Vec::with_capacity(tasks.len());
        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            self.emit(ExecutionEvent::NodeStarted {
                execution_id: task.execution_id,
                node_id: task.node.id.clone(),
                iteration: task.iteration,
            });
            started.push((task.record_id, task.execution_id, task.node.id.clone(), task.iteration, task.config.clone()));

            let runner = runner.clone();
            let token = run_cancel.clone();
            let limiter = limiter.cloned();
            handles.push(tokio::spawn(async move {
                let _permit = match limiter {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                runner.run(task, token).await
            }));
        }

        let wave = join_all(handles);
        tokio::pin!(wave);
        let mut interrupted = None;
        let results = tokio::select! {
            results = &mut wave => results,
            _ = cancel.cancelled() => {
                warn!("execution cancelled, waiting for in-flight nodes");
                interrupted = Some(EngineError::Cancelled);
                wave.await
            }
            _ = wait_until(deadline) => {
                let timeout = options.timeout.unwrap_or_default();
                warn!(?timeout, "execution timed out, waiting for in-flight nodes");
                interrupted = Some(EngineError::TimedOut(timeout));
                run_cancel.cancel();
                wave.await
            }
        };

        let records = results
            .into_iter()
            .zip(started)
            .map(|(result, (record_id, execution_id, node_id, iteration, config))| match result {
                Ok(record) => record,
                Err(join_err) => {
                    // Reuses the runner's record ID so the final sweep overwrites its `running` row.
                    error!(%node_id, error = %join_err, "node task aborted");
                    let mut record = NodeExecution::started(execution_id, node_id, iteration, config);
                    record.id = record_id;
                    record.fail(format!("node task aborted: {join_err}"));
                    record
                }
            })
            .collect();
        (records, interrupted)
    }

    // -----------------------------------------------------------------------
    // Finalization
    // -----------------------------------------------------------------------

    async fn finalize(
        &self,
        workflow: &Workflow,
        mut execution: Execution,
        data: &DataContext,
        failure: Option<EngineError>,
    ) -> Result<Execution, EngineError> {
        execution.completed_at = Some(Utc::now());
        match &failure {
            None => {
                execution.status = ExecutionStatus::Completed;
                execution.output = Some(leaf_outputs(workflow, data));
                execution.error = None;
            }
            Some(reason) => {
                execution.status = ExecutionStatus::Failed;
                execution.error = Some(reason.to_string());
            }
        }
        self.persist_header(&execution).await;
        for record in &execution.node_executions {
            if let Err(e) = self.executions.update_node_execution(record).await {
                warn!(node_id = %record.node_id, error = %e, "failed to persist node record");
            }
        }

        match &failure {
            None => {
                info!("execution completed");
                self.emit(ExecutionEvent::ExecutionCompleted {
                    execution_id: execution.id,
                });
            }
            Some(reason) => {
                warn!(error = %reason, "execution failed");
                self.emit(ExecutionEvent::ExecutionFailed {
                    execution_id: execution.id,
                    error: reason.to_string(),
                });
            }
        }
        if let Some(observer) = &self.observer {
            observer.on_execution_finished(&execution);
        }

        match failure {
            None => Ok(execution),
            Some(source) => Err(EngineError::ExecutionFailed {
                execution: Box::new(execution),
                source: Box::new(source),
            }),
        }
    }

    async fn persist_header(&self, execution: &Execution) {
        if let Err(e) = self.executions.update_execution(execution).await {
            error!(status = %execution.status, error = %e, "failed to persist execution");
        }
    }

    fn note_node(&self, record: &NodeExecution) {
        let event = match record.status {
            NodeStatus::Completed => ExecutionEvent::NodeCompleted {
                execution_id: record.execution_id,
                node_id: record.node_id.clone(),
                iteration: record.iteration,
                output: record.output.clone().unwrap_or(Value::Null),
            },
            NodeStatus::Failed => ExecutionEvent::NodeFailed {
                execution_id: record.execution_id,
                node_id: record.node_id.clone(),
                iteration: record.iteration,
                error: record.error.clone().unwrap_or_default(),
            },
            NodeStatus::Pending | NodeStatus::Running | NodeStatus::Skipped => {
                debug!(node_id = %record.node_id, status = %record.status, "non-terminal record returned from wave");
                return;
            }
        };
        self.emit(event);
        if let Some(observer) = &self.observer {
            observer.on_node_finished(record);
        }
    }

    fn note_loops(&self, execution_id: Uuid, wave: &Wave) {
        for event in &wave.loop_events {
            let event = match event {
                LoopEvent::Fired {
                    edge_id,
                    target,
                    iteration,
                } => {
                    info!(%edge_id, node_id = %target, iteration, "loop edge re-admitted node");
                    ExecutionEvent::LoopIteration {
                        execution_id,
                        edge_id: edge_id.clone(),
                        node_id: target.clone(),
                        iteration: *iteration,
                    }
                }
                LoopEvent::Exhausted { edge_id, visits } => {
                    info!(%edge_id, visits, "loop edge exhausted");
                    ExecutionEvent::LoopExhausted {
                        execution_id,
                        edge_id: edge_id.clone(),
                    }
                }
            };
            self.emit(event);
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(sink) = &self.events {
            sink.emit(event);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Concise top-level error: the first unrouted failure, plus a count of
/// the others.
fn summarize_failures(failures: &[(String, String)]) -> Option<EngineError> {
    let ((node_id, message), rest) = failures.split_first()?;
    let message = match rest.len() {
        0 => message.clone(),
        n => format!("{message} (and {n} more failed nodes)"),
    };
    Some(EngineError::NodeFailed {
        node_id: node_id.clone(),
        message,
    })
}

/// Outputs of completed nodes with no outgoing forward edge, keyed by node ID.
fn leaf_outputs(workflow: &Workflow, data: &DataContext) -> Value {
    let sources: HashSet<&str> = workflow
        .edges
        .iter()
        .filter(|e| !e.is_loop())
        .map(|e| e.from.as_str())
        .collect();
    let mut out = Map::new();
    for node in &workflow.nodes {
        if sources.contains(node.id.as_str()) {
            continue;
        }
        if let Some(output) = data.output(&node.id) {
            out.insert(node.id.clone(), output.clone());
        }
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_summary_counts_the_rest() {
        assert!(summarize_failures(&[]).is_none());
        let one = summarize_failures(&[("a".into(), "boom".into())]).unwrap();
        assert_eq!(one.to_string(), "node 'a' failed: boom");
        let three = summarize_failures(&[
            ("a".into(), "boom".into()),
            ("b".into(), "bang".into()),
            ("c".into(), "crash".into()),
        ])
        .unwrap();
        assert_eq!(three.to_string(), "node 'a' failed: boom (and 2 more failed nodes)");
    }
}
