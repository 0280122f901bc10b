//! `sluice status`: one-line-per-task overview of the store.

use anyhow::Result;
use sqlx::PgPool;

use sluice_db::models::TaskStatus;
use sluice_db::queries::tasks;

pub async fn run_status(pool: &PgPool) -> Result<()> {
    let all = tasks::list_tasks(pool).await?;
    if all.is_empty() {
        println!("No tasks defined.");
        return Ok(());
    }

    let running = all
        .iter()
        .filter(|t| t.status == TaskStatus::Running)
        .count();
    let failed = all
        .iter()
        .filter(|t| t.status == TaskStatus::Failed)
        .count();
    println!(
        "{} tasks ({} running, {} failed)",
        all.len(),
        running,
        failed
    );
    println!();
    println!(
        "{:<28} {:<10} {:>9} {:<22} {:>6}",
        "NAME", "STATUS", "PROGRESS", "LAST EXECUTED", "RUNS"
    );
    for task in &all {
        let last = task
            .last_executed_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_owned());
        println!(
            "{:<28} {:<10} {:>8}% {:<22} {:>6}",
            task.name, task.status, task.progress, last, task.execution_count
        );
    }
    Ok(())
}
