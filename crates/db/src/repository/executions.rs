//! Execution and node-execution repository functions.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    models::{NodeExecutionRow, WorkflowExecutionRow},
    DbError,
};

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Insert a new workflow execution header.
pub async fn insert_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO workflow_executions
            (id, workflow_id, status, input, output, error, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(row.id)
    .bind(row.workflow_id)
    .bind(&row.status)
    .bind(&row.input)
    .bind(&row.output)
    .bind(&row.error)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Overwrite the mutable header fields of an execution.
///
/// Returns `DbError::NotFound` if no row was updated.
pub async fn update_execution(pool: &PgPool, row: &WorkflowExecutionRow) -> Result<(), DbError> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_executions
        SET status = $2, output = $3, error = $4, started_at = $5, completed_at = $6
        WHERE id = $1
        "#,
    )
    .bind(row.id)
    .bind(&row.status)
    .bind(&row.output)
    .bind(&row.error)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

pub async fn get_execution(pool: &PgPool, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
    sqlx::query_as::<_, WorkflowExecutionRow>(
        r#"
        SELECT id, workflow_id, status, input, output, error, started_at, completed_at
        FROM workflow_executions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

// ---------------------------------------------------------------------------
// node_executions
// ---------------------------------------------------------------------------

/// Insert a node execution, or replace the stored one with the same ID.
pub async fn upsert_node_execution(pool: &PgPool, row: &NodeExecutionRow) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO node_executions
            (id, execution_id, node_id, iteration, status, attempt, input, output, error,
             started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE
            SET status = EXCLUDED.status,
                attempt = EXCLUDED.attempt,
                input = EXCLUDED.input,
                output = EXCLUDED.output,
                error = EXCLUDED.error,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at
        "#,
    )
    .bind(row.id)
    .bind(row.execution_id)
    .bind(&row.node_id)
    .bind(row.iteration)
    .bind(&row.status)
    .bind(row.attempt)
    .bind(&row.input)
    .bind(&row.output)
    .bind(&row.error)
    .bind(row.started_at)
    .bind(row.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Every node execution of a run, oldest first.
pub async fn list_node_executions(pool: &PgPool, execution_id: Uuid) -> Result<Vec<NodeExecutionRow>, DbError> {
    let rows = sqlx::query_as::<_, NodeExecutionRow>(
        r#"
        SELECT id, execution_id, node_id, iteration, status, attempt, input, output, error,
               started_at, completed_at
        FROM node_executions
        WHERE execution_id = $1
        ORDER BY started_at ASC NULLS LAST, node_id, iteration
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
