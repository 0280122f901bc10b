//! `sluice diagnose <server>`: run the full diagnostic pass and print a
//! step-by-step report.

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;

use sluice_core::connect::ConnectionManager;

pub async fn run_diagnose(pool: &PgPool, server: &str) -> Result<()> {
    let connections = Arc::new(ConnectionManager::new(pool.clone()));
    let report = connections.diagnose(server).await;

    println!("Diagnostics for server {:?}:", report.server);
    for step in &report.steps {
        let mark = if step.passed { "ok " } else { "FAIL" };
        println!("  [{mark}] {:<12} {}", step.name, step.detail);
        if let Some(hint) = &step.hint {
            println!("         hint: {hint}");
        }
    }
    println!();
    if report.healthy {
        println!("Server {server:?} looks healthy.");
    } else {
        println!("Server {server:?} has problems; see the failed steps above.");
    }

    connections.close_pools().await;
    Ok(())
}
