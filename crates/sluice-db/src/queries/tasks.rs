//! Database query functions for the `tasks` table.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Direction, Task, TaskKind, TaskStatus};

/// Field values for inserting or replacing a task definition.
///
/// The rule/promotion payloads arrive as already-serialized JSON; the query
/// layer does not interpret them.
#[derive(Debug, Clone)]
pub struct UpsertTask<'a> {
    pub name: &'a str,
    pub active: bool,
    pub kind: TaskKind,
    pub direction: Direction,
    pub source_server: &'a str,
    pub target_server: &'a str,
    pub query: &'a str,
    pub params: serde_json::Value,
    pub destination_table: &'a str,
    pub ruleset: serde_json::Value,
    pub post_update_query: Option<&'a str>,
    pub post_update_mapping: Option<serde_json::Value>,
    pub clear_before_insert: bool,
    pub promotion: Option<serde_json::Value>,
}

/// Insert a task or, when a task with the same name exists, replace its
/// definition in place. Status, progress, and execution counters are left
/// untouched on conflict, so upserting an existing task is idempotent on
/// the set of tasks.
pub async fn upsert_task(pool: &PgPool, task: &UpsertTask<'_>) -> Result<Task> {
    let row = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (name, active, kind, direction, source_server, target_server, \
                            query, params, destination_table, ruleset, post_update_query, \
                            post_update_mapping, clear_before_insert, promotion) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
         ON CONFLICT (name) DO UPDATE SET \
             active = EXCLUDED.active, \
             kind = EXCLUDED.kind, \
             direction = EXCLUDED.direction, \
             source_server = EXCLUDED.source_server, \
             target_server = EXCLUDED.target_server, \
             query = EXCLUDED.query, \
             params = EXCLUDED.params, \
             destination_table = EXCLUDED.destination_table, \
             ruleset = EXCLUDED.ruleset, \
             post_update_query = EXCLUDED.post_update_query, \
             post_update_mapping = EXCLUDED.post_update_mapping, \
             clear_before_insert = EXCLUDED.clear_before_insert, \
             promotion = EXCLUDED.promotion \
         RETURNING *",
    )
    .bind(task.name)
    .bind(task.active)
    .bind(task.kind)
    .bind(task.direction)
    .bind(task.source_server)
    .bind(task.target_server)
    .bind(task.query)
    .bind(&task.params)
    .bind(task.destination_table)
    .bind(&task.ruleset)
    .bind(task.post_update_query)
    .bind(&task.post_update_mapping)
    .bind(task.clear_before_insert)
    .bind(&task.promotion)
    .fetch_one(pool)
    .await
    .context("failed to upsert task")?;

    Ok(row)
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Fetch a single task by its unique name.
pub async fn get_task_by_name(pool: &PgPool, name: &str) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task by name")?;

    Ok(task)
}

/// List all tasks, ordered by name.
pub async fn list_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY name ASC")
        .fetch_all(pool)
        .await
        .context("failed to list tasks")?;

    Ok(tasks)
}

/// List active tasks eligible for the given execution kind.
///
/// A task whose kind is `both` matches every filter.
pub async fn get_active_tasks(pool: &PgPool, kind: TaskKind) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE active = TRUE AND (kind = $1 OR kind = 'both') \
         ORDER BY name ASC",
    )
    .bind(kind)
    .fetch_all(pool)
    .await
    .context("failed to list active tasks")?;

    Ok(tasks)
}

/// Update the status and progress of a task. Only these two fields are
/// written; concurrent writers of other fields are not disturbed.
pub async fn update_task_status(
    pool: &PgPool,
    id: Uuid,
    status: TaskStatus,
    progress: i32,
) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET status = $1, progress = $2 WHERE id = $3")
        .bind(status)
        .bind(progress)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to update task status")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Enable or disable a task.
pub async fn set_task_active(pool: &PgPool, id: Uuid, active: bool) -> Result<()> {
    let result = sqlx::query("UPDATE tasks SET active = $1 WHERE id = $2")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set task active flag")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Record the outcome of a finished run: bump the execution counter, stamp
/// the execution time, and store the outcome summary.
pub async fn update_execution_outcome(
    pool: &PgPool,
    id: Uuid,
    outcome: &serde_json::Value,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET execution_count = execution_count + 1, \
             last_executed_at = NOW(), \
             last_outcome = $1 \
         WHERE id = $2",
    )
    .bind(outcome)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to record execution outcome")?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {id} not found");
    }

    Ok(())
}

/// Delete a task by ID. Returns whether a row was removed.
pub async fn delete_task(pool: &PgPool, id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to delete task")?;

    Ok(result.rows_affected() > 0)
}
