//! Database query functions for the `executions` history table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ExecutionRecord;

/// Field values for recording one finished run.
#[derive(Debug, Clone)]
pub struct NewExecution<'a> {
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    pub rows_read: i64,
    pub inserted: i64,
    pub duplicates: i64,
    pub message: &'a str,
    pub error_detail: Option<&'a str>,
}

/// Insert an execution history row. `finished_at` is stamped server-side.
pub async fn insert_execution(pool: &PgPool, exec: &NewExecution<'_>) -> Result<ExecutionRecord> {
    let record = sqlx::query_as::<_, ExecutionRecord>(
        "INSERT INTO executions (task_id, started_at, success, rows_read, inserted, \
                                 duplicates, message, error_detail) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(exec.task_id)
    .bind(exec.started_at)
    .bind(exec.success)
    .bind(exec.rows_read)
    .bind(exec.inserted)
    .bind(exec.duplicates)
    .bind(exec.message)
    .bind(exec.error_detail)
    .fetch_one(pool)
    .await
    .context("failed to insert execution record")?;

    Ok(record)
}

/// List the most recent executions of a task, newest first.
pub async fn list_executions_for_task(
    pool: &PgPool,
    task_id: Uuid,
    limit: i64,
) -> Result<Vec<ExecutionRecord>> {
    let records = sqlx::query_as::<_, ExecutionRecord>(
        "SELECT * FROM executions \
         WHERE task_id = $1 \
         ORDER BY finished_at DESC \
         LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list executions for task")?;

    Ok(records)
}
