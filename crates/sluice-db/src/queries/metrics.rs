//! Database query functions for the `metrics` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::MetricSample;

/// Append a metric sample for a task. The sample payload is opaque JSON
/// (elapsed milliseconds, rows per second, batch counts, ...).
pub async fn append_metric(
    pool: &PgPool,
    task_id: Uuid,
    sample: &serde_json::Value,
) -> Result<MetricSample> {
    let row = sqlx::query_as::<_, MetricSample>(
        "INSERT INTO metrics (task_id, sample) VALUES ($1, $2) RETURNING *",
    )
    .bind(task_id)
    .bind(sample)
    .fetch_one(pool)
    .await
    .context("failed to append metric sample")?;

    Ok(row)
}

/// List the most recent metric samples of a task, newest first.
pub async fn list_metrics_for_task(
    pool: &PgPool,
    task_id: Uuid,
    limit: i64,
) -> Result<Vec<MetricSample>> {
    let rows = sqlx::query_as::<_, MetricSample>(
        "SELECT * FROM metrics \
         WHERE task_id = $1 \
         ORDER BY recorded_at DESC \
         LIMIT $2",
    )
    .bind(task_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list metrics for task")?;

    Ok(rows)
}
