//! Workflow definition storage.

use sqlx::PgPool;
use uuid::Uuid;

use crate::{models::WorkflowRow, DbError};

const COLUMNS: &str = "id, name, status, version, definition, created_at";

/// Insert a workflow, or replace the stored definition of an existing one.
pub async fn upsert_workflow(pool: &PgPool, row: &WorkflowRow) -> Result<WorkflowRow, DbError> {
    let sql = format!(
        r#"
        INSERT INTO workflows (id, name, status, version, definition, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name,
                status = EXCLUDED.status,
                version = EXCLUDED.version,
                definition = EXCLUDED.definition
        RETURNING {COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(row.id)
        .bind(&row.name)
        .bind(&row.status)
        .bind(row.version)
        .bind(&row.definition)
        .bind(row.created_at)
        .fetch_one(pool)
        .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: Uuid) -> Result<WorkflowRow, DbError> {
    let sql = format!("SELECT {COLUMNS} FROM workflows WHERE id = $1");
    sqlx::query_as::<_, WorkflowRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}
