//! Pool bootstrap for the Task Store: connect, create-if-absent, migrate.
//!
//! Only the store is handled here. Pools for the Source/Target data planes
//! are owned by the connection manager in the core crate, which reads their
//! settings out of the `server_configs` table this module migrates into
//! existence.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Concurrent store sessions. The store only carries definitions, status
/// writes, and history rows; it never needs data-plane sizing.
const STORE_POOL_SIZE: u32 = 5;
const STORE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Open the Task Store pool.
///
/// Sessions are pinged on checkout, so a store connection that died since
/// its last use is replaced once before the caller sees an error.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(STORE_POOL_SIZE)
        .acquire_timeout(STORE_ACQUIRE_TIMEOUT)
        .test_before_acquire(true)
        .connect(&config.database_url)
        .await
        .with_context(|| format!("failed to connect to task store at {}", config.database_url))
}

/// Apply any pending store migrations.
///
/// The migration files ship in the crate's `migrations/` directory and are
/// loaded at runtime, so building the workspace never needs a live
/// database (the `sqlx::migrate!()` macro would).
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    // CARGO_MANIFEST_DIR is baked in at compile time and points at
    // crates/sluice-db/.
    let dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"));

    let migrator = sqlx::migrate::Migrator::new(dir)
        .await
        .with_context(|| format!("failed to load migrations from {}", dir.display()))?;
    migrator
        .run(pool)
        .await
        .context("failed to apply task store migrations")?;

    info!("task store migrations applied");
    Ok(())
}

/// Create the store database when it does not exist yet.
///
/// `CREATE DATABASE` can neither run inside a transaction nor take its
/// name as a bound parameter, so this connects to the maintenance database
/// and splices in the name — which [`DbConfig::database_name`] has already
/// refused unless it is a bare `[A-Za-z0-9_]` identifier.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let db_name = config.database_name()?;

    let maint_pool = maintenance_pool(&config.maintenance_url()).await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if !exists {
        maint_pool
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "task store database created");
    }

    maint_pool.close().await;
    Ok(())
}

/// Single-session pool on the server's `postgres` maintenance database.
async fn maintenance_pool(url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(STORE_ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .with_context(|| format!("failed to connect to maintenance database at {url}"))
}

/// Row counts of the four store tables, for the `sluice db-init` report
/// and the status overview.
pub async fn store_summary(pool: &PgPool) -> Result<Vec<(&'static str, i64)>> {
    let (tasks, executions, metrics, servers): (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT (SELECT COUNT(*) FROM tasks), \
                (SELECT COUNT(*) FROM executions), \
                (SELECT COUNT(*) FROM metrics), \
                (SELECT COUNT(*) FROM server_configs)",
    )
    .fetch_one(pool)
    .await
    .context("failed to count store tables (are migrations applied?)")?;

    Ok(vec![
        ("tasks", tasks),
        ("executions", executions),
        ("metrics", metrics),
        ("server_configs", servers),
    ])
}
