//! `sluice run` and `sluice run-pending`: execute transfers from the CLI.

use anyhow::{Context, Result};
use sqlx::PgPool;

use sluice_core::orchestrator::outcome::RunOutcome;
use sluice_db::models::TaskKind;

use crate::runtime::build_runtime;
use crate::task_cmds::resolve_task;

/// Run one task manually, optionally printing progress events as they
/// arrive.
pub async fn run_task(pool: &PgPool, ident: &str, watch: bool) -> Result<()> {
    let task = resolve_task(pool, ident).await?;
    let runtime = build_runtime(pool);

    let watcher = if watch {
        let mut rx = runtime.orchestrator.progress().subscribe(task.id);
        Some(tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                println!("  progress: {}%", event.progress);
            }
        }))
    } else {
        None
    };

    println!("Running task {:?} ({})...", task.name, task.id);
    let result = runtime.orchestrator.run_task(task.id).await;

    if let Some(watcher) = watcher {
        let _ = watcher.await;
    }
    runtime.orchestrator.connections().close_pools().await;

    match result {
        Ok(outcome) => {
            print_outcome(&outcome);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("task {:?} failed", task.name)),
    }
}

/// Batch mode: run every active task of the given kind.
pub async fn run_pending(pool: &PgPool, kind: &str) -> Result<()> {
    let kind: TaskKind = kind
        .parse()
        .with_context(|| format!("invalid kind {kind:?}; expected auto, manual, or both"))?;
    let runtime = build_runtime(pool);

    let results = runtime.orchestrator.run_batch(kind).await?;
    runtime.orchestrator.connections().close_pools().await;

    if results.is_empty() {
        println!("No active tasks for kind {kind}.");
        return Ok(());
    }

    let mut failures = 0;
    for (task_id, result) in &results {
        match result {
            Ok(outcome) => println!(
                "{task_id}: ok  rows={} inserted={} duplicates={}",
                outcome.rows, outcome.inserted, outcome.duplicates
            ),
            Err(e) => {
                failures += 1;
                println!("{task_id}: FAILED  {e}");
            }
        }
    }
    println!(
        "Batch complete: {} succeeded, {failures} failed.",
        results.len() - failures
    );
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("Transfer complete.");
    println!("  rows read:      {}", outcome.rows);
    println!("  inserted:       {}", outcome.inserted);
    println!("  duplicates:     {}", outcome.duplicates);
    println!("  initial count:  {}", outcome.initial_count);
    println!("  final count:    {}", outcome.final_count);
    if outcome.has_more_duplicates {
        println!(
            "  (showing {} of {} duplicate records)",
            outcome.duplicated_records.len(),
            outcome.total_duplicates
        );
    }
    if let Some(detail) = &outcome.error_detail {
        println!("  warning: {detail}");
    }
    println!("  {}", outcome.message);
}
