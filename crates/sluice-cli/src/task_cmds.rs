//! `sluice task ...` commands: list, show, upsert-from-file, enable, disable.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use sluice_db::models::{Direction, Task, TaskKind};
use sluice_db::queries::tasks::{self, UpsertTask};
use sluice_db::rules::Ruleset;

/// Resolve a task by UUID or unique name.
pub async fn resolve_task(pool: &PgPool, ident: &str) -> Result<Task> {
    if let Ok(id) = Uuid::parse_str(ident) {
        if let Some(task) = tasks::get_task(pool, id).await? {
            return Ok(task);
        }
    }
    tasks::get_task_by_name(pool, ident)
        .await?
        .with_context(|| format!("no task named or identified by {ident:?}"))
}

// -----------------------------------------------------------------------
// Task definition files
// -----------------------------------------------------------------------

/// TOML shape of a task definition file. Payload sections (params,
/// ruleset, mapping, promotion) are kept as raw values and validated by
/// decoding them into their rule types before the upsert.
#[derive(Debug, Deserialize)]
struct TaskFileDef {
    name: String,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default = "default_kind")]
    kind: TaskKind,
    #[serde(default = "default_direction")]
    direction: Direction,
    source_server: String,
    target_server: String,
    query: String,
    #[serde(default)]
    params: Option<serde_json::Value>,
    destination_table: String,
    ruleset: serde_json::Value,
    #[serde(default)]
    post_update_query: Option<String>,
    #[serde(default)]
    post_update_mapping: Option<serde_json::Value>,
    #[serde(default)]
    clear_before_insert: bool,
    #[serde(default)]
    promotion: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

fn default_kind() -> TaskKind {
    TaskKind::Both
}

fn default_direction() -> Direction {
    Direction::Default
}

/// Create or replace a task from a TOML definition file.
pub async fn run_upsert(pool: &PgPool, file: &str) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read task file {file}"))?;
    let def: TaskFileDef =
        toml::from_str(&contents).with_context(|| format!("failed to parse task file {file}"))?;

    // Vet the payloads before they reach the store.
    let ruleset: Ruleset = serde_json::from_value(def.ruleset.clone())
        .context("invalid [ruleset] section")?;
    if !ruleset.is_executable() {
        bail!(
            "task {:?} has no merge keys; set ruleset.required_fields or ruleset.existence_key",
            def.name
        );
    }
    if let Some(params) = &def.params {
        let _: Vec<sluice_db::rules::QueryParam> = serde_json::from_value(params.clone())
            .context("invalid [[params]] section")?;
    }
    if let Some(mapping) = &def.post_update_mapping {
        let _: sluice_db::rules::PostUpdateMapping = serde_json::from_value(mapping.clone())
            .context("invalid [post_update_mapping] section")?;
    }
    if let Some(promotion) = &def.promotion {
        let _: sluice_db::rules::PromotionConfig = serde_json::from_value(promotion.clone())
            .context("invalid [promotion] section")?;
    }

    let task = tasks::upsert_task(
        pool,
        &UpsertTask {
            name: &def.name,
            active: def.active,
            kind: def.kind,
            direction: def.direction,
            source_server: &def.source_server,
            target_server: &def.target_server,
            query: &def.query,
            params: def.params.unwrap_or_else(|| serde_json::json!([])),
            destination_table: &def.destination_table,
            ruleset: def.ruleset,
            post_update_query: def.post_update_query.as_deref(),
            post_update_mapping: def.post_update_mapping,
            clear_before_insert: def.clear_before_insert,
            promotion: def.promotion,
        },
    )
    .await?;

    println!("Task {:?} upserted ({}).", task.name, task.id);
    Ok(())
}

/// List all tasks in a compact table.
pub async fn run_list(pool: &PgPool) -> Result<()> {
    let all = tasks::list_tasks(pool).await?;
    if all.is_empty() {
        println!("No tasks defined. Create one with `sluice task upsert <file.toml>`.");
        return Ok(());
    }

    println!(
        "{:<28} {:<8} {:<8} {:<10} {:>9} {:>6}",
        "NAME", "ACTIVE", "KIND", "STATUS", "PROGRESS", "RUNS"
    );
    for task in &all {
        println!(
            "{:<28} {:<8} {:<8} {:<10} {:>8}% {:>6}",
            task.name, task.active, task.kind, task.status, task.progress, task.execution_count
        );
    }
    Ok(())
}

/// Show full task details including the most recent executions.
pub async fn run_show(pool: &PgPool, ident: &str) -> Result<()> {
    let task = resolve_task(pool, ident).await?;

    println!("Task {:?} ({})", task.name, task.id);
    println!("  active:            {}", task.active);
    println!("  kind:              {}", task.kind);
    println!("  direction:         {}", task.direction);
    println!("  source server:     {}", task.source_server);
    println!("  target server:     {}", task.target_server);
    println!("  destination table: {}", task.destination_table);
    println!("  clear first:       {}", task.clear_before_insert);
    println!("  status:            {} ({}%)", task.status, task.progress);
    println!("  executions:        {}", task.execution_count);
    if let Some(at) = task.last_executed_at {
        println!("  last executed:     {at}");
    }
    println!("  query:             {}", task.query);
    if let Some(outcome) = &task.last_outcome {
        println!("  last outcome:      {outcome}");
    }

    let history = sluice_db::queries::executions::list_executions_for_task(pool, task.id, 5).await?;
    if !history.is_empty() {
        println!("Recent executions:");
        for record in &history {
            println!(
                "  {}  success={} rows={} inserted={} duplicates={}  {}",
                record.finished_at,
                record.success,
                record.rows_read,
                record.inserted,
                record.duplicates,
                record.message
            );
        }
    }
    Ok(())
}

/// Flip the active flag.
pub async fn run_set_active(pool: &PgPool, ident: &str, active: bool) -> Result<()> {
    let task = resolve_task(pool, ident).await?;
    tasks::set_task_active(pool, task.id, active).await?;
    println!(
        "Task {:?} {}.",
        task.name,
        if active { "enabled" } else { "disabled" }
    );
    Ok(())
}
