//! Integration tests for store bootstrap: migrations, pool creation, and
//! the create-if-absent path.
//!
//! Each test gets its own database inside the shared containerized
//! PostgreSQL instance and drops it on the way out.

use uuid::Uuid;

use sluice_db::config::DbConfig;
use sluice_db::pool;

use sluice_test_utils::{create_test_db, drop_test_db, pg_url};

#[tokio::test]
async fn migrations_create_the_store_tables() {
    let (temp_pool, db_name) = create_test_db().await;

    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT tablename::text FROM pg_tables \
         WHERE schemaname = 'public' AND tablename NOT LIKE '\\_sqlx%' \
         ORDER BY tablename",
    )
    .fetch_all(&temp_pool)
    .await
    .expect("should list tables");

    let tables: Vec<&str> = rows.iter().map(|(name,)| name.as_str()).collect();
    assert_eq!(
        tables,
        vec!["executions", "metrics", "server_configs", "tasks"],
        "migration should create exactly the store tables"
    );

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (temp_pool, db_name) = create_test_db().await;

    // create_test_db already migrated once; a second pass must be a no-op.
    pool::run_migrations(&temp_pool)
        .await
        .expect("second migration run should succeed");

    let summary = pool::store_summary(&temp_pool)
        .await
        .expect("store_summary should succeed");
    for (table, count) in &summary {
        assert_eq!(*count, 0, "table {table} should still be empty");
    }

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn store_summary_reports_every_table() {
    let (temp_pool, db_name) = create_test_db().await;

    let summary = pool::store_summary(&temp_pool)
        .await
        .expect("store_summary should succeed");
    let names: Vec<&str> = summary.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["tasks", "executions", "metrics", "server_configs"]);

    // A seeded row shows up in the matching slot.
    sqlx::query(
        "INSERT INTO server_configs (name, host, username, password, database_name) \
         VALUES ('erp', 'db.internal', 'u', 'p', 'erp_main')",
    )
    .execute(&temp_pool)
    .await
    .expect("seed should succeed");

    let summary = pool::store_summary(&temp_pool)
        .await
        .expect("store_summary should succeed");
    assert_eq!(summary[3], ("server_configs", 1));
    assert_eq!(summary[0], ("tasks", 0));

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pool_answers_queries_and_closes_cleanly() {
    let (temp_pool, db_name) = create_test_db().await;

    let one: (i32,) = sqlx::query_as("SELECT 1")
        .fetch_one(&temp_pool)
        .await
        .expect("simple query should work");
    assert_eq!(one.0, 1);

    temp_pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_is_idempotent() {
    let base_url = pg_url().await;
    let db_name = format!("sluice_test_{}", Uuid::new_v4().simple());
    let config = DbConfig::new(format!("{base_url}/{db_name}"));

    // First call creates, second call finds it already there.
    pool::ensure_database_exists(&config)
        .await
        .expect("first ensure should succeed");
    pool::ensure_database_exists(&config)
        .await
        .expect("second ensure should succeed (idempotent)");

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ensure_database_exists_refuses_unsafe_names() {
    let base_url = pg_url().await;
    let config = DbConfig::new(format!("{base_url}/bad;name"));

    let err = pool::ensure_database_exists(&config)
        .await
        .expect_err("unsafe name must be rejected before any SQL runs");
    assert!(
        err.to_string().contains("not a safe identifier"),
        "unexpected error: {err:#}"
    );
}
