//! `rusty-flow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`: validate a workflow JSON file and print its execution order.
//! - `run`: execute a workflow JSON file with the built-in executors.
//! - `migrate`: run pending database migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use engine::{
    ChannelEventSink, EngineError, ExecutionEvent, ExecutionManager, ExecutionOptions, ExecutionSink,
    ExecutorRegistry, MemoryStore, WorkflowSource, Workflow,
};

#[derive(Parser)]
#[command(name = "rusty-flow", about = "Workflow execution engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition JSON file.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Trigger input as a JSON object.
        #[arg(long, default_value = "{}")]
        input: String,
        /// Abort the run after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Maximum number of nodes running at once within a wave.
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Default attempts for nodes that do not set `max_attempts`.
        #[arg(long)]
        max_attempts: Option<u32>,
        /// Persist the workflow and execution to Postgres instead of memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Run {
            path,
            input,
            timeout_secs,
            max_concurrency,
            max_attempts,
            database_url,
        } => {
            let mut options = ExecutionOptions::default();
            options.timeout = timeout_secs.map(Duration::from_secs);
            options.max_concurrency = max_concurrency;
            if let Some(attempts) = max_attempts {
                options.default_retry.max_attempts = attempts;
            }
            let input: Value = serde_json::from_str(&input).context("--input is not valid JSON")?;
            run(&path, input, options, database_url.as_deref()).await
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
            Ok(())
        }
    }
}

fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn validate(path: &Path) -> Result<()> {
    let workflow = load_workflow(path)?;
    match engine::validate_dag(&workflow) {
        Ok(order) => {
            println!("✅ Workflow is valid. Execution order: {order:?}");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(path: &Path, input: Value, options: ExecutionOptions, database_url: Option<&str>) -> Result<()> {
    let workflow = load_workflow(path)?;
    let workflow_id = workflow.id.to_string();

    let (workflows, executions): (Arc<dyn WorkflowSource>, Arc<dyn ExecutionSink>) = match database_url {
        Some(url) => {
            let store = Arc::new(db::connect_store(url, 5).await.context("failed to prepare database")?);
            store.save_workflow(&workflow).await.context("failed to store workflow")?;
            let workflows: Arc<dyn WorkflowSource> = store.clone();
            let executions: Arc<dyn ExecutionSink> = store;
            (workflows, executions)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            store.insert_workflow(workflow).await;
            let workflows: Arc<dyn WorkflowSource> = store.clone();
            let executions: Arc<dyn ExecutionSink> = store;
            (workflows, executions)
        }
    };

    let (sink, mut events) = ChannelEventSink::channel();
    let log_events = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            log_event(&event);
        }
    });

    let manager = ExecutionManager::new(workflows, executions, Arc::new(ExecutorRegistry::with_builtins()))
        .with_event_sink(Arc::new(sink));

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling execution");
            on_ctrl_c.cancel();
        }
    });

    let result = manager.execute(&workflow_id, input, options, cancel).await;
    drop(manager);
    if let Err(e) = log_events.await {
        debug!(error = %e, "event logger stopped");
    }

    match result {
        Ok(execution) => {
            println!("{}", serde_json::to_string_pretty(&execution)?);
            Ok(())
        }
        Err(EngineError::ExecutionFailed { execution, source }) => {
            println!("{}", serde_json::to_string_pretty(&execution)?);
            bail!("execution failed: {source}")
        }
        Err(e) => Err(e.into()),
    }
}

fn log_event(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::NodeStarted { node_id, iteration, .. } => info!(%node_id, iteration, "node started"),
        ExecutionEvent::NodeRetrying {
            node_id,
            attempt,
            delay_ms,
            error,
            ..
        } => warn!(%node_id, attempt, delay_ms, %error, "node retrying"),
        ExecutionEvent::NodeCompleted { node_id, iteration, .. } => info!(%node_id, iteration, "node completed"),
        ExecutionEvent::NodeFailed { node_id, error, .. } => warn!(%node_id, %error, "node failed"),
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => info!(%node_id, %reason, "node skipped"),
        other => debug!(?other, "execution event"),
    }
}
