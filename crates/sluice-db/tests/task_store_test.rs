//! Integration tests for the Task Store query modules.

use chrono::Utc;
use serde_json::json;

use sluice_db::models::{Direction, TaskKind, TaskStatus};
use sluice_db::queries::executions::{self, NewExecution};
use sluice_db::queries::metrics;
use sluice_db::queries::servers::{self, UpsertServerConfig};
use sluice_db::queries::tasks::{self, UpsertTask};

use sluice_test_utils::{create_test_db, drop_test_db};

fn sample_task(name: &str) -> UpsertTask<'_> {
    UpsertTask {
        name,
        active: true,
        kind: TaskKind::Both,
        direction: Direction::Default,
        source_server: "erp",
        target_server: "backoffice",
        query: "SELECT id, branch, amount FROM invoices",
        params: json!([]),
        destination_table: "invoices",
        ruleset: json!({
            "fields": {"id": {"type": "number", "required": true}},
            "required_fields": ["id"],
        }),
        post_update_query: None,
        post_update_mapping: None,
        clear_before_insert: false,
        promotion: None,
    }
}

#[tokio::test]
async fn upsert_task_is_idempotent_by_name() {
    let (pool, db_name) = create_test_db().await;

    let first = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("first upsert should succeed");

    // Upsert again with a changed query; the task set must not grow.
    let mut changed = sample_task("invoices");
    changed.query = "SELECT id, branch, amount FROM invoices WHERE branch = 'N'";
    let second = tasks::upsert_task(&pool, &changed)
        .await
        .expect("second upsert should succeed");

    assert_eq!(first.id, second.id, "upsert by name must keep the same row");
    assert_eq!(second.query, changed.query);

    let all = tasks::list_tasks(&pool).await.expect("list should succeed");
    assert_eq!(all.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn upsert_preserves_status_and_counters() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("upsert should succeed");

    tasks::update_task_status(&pool, task.id, TaskStatus::Completed, 100)
        .await
        .expect("status update should succeed");
    tasks::update_execution_outcome(&pool, task.id, &json!({"inserted": 3}))
        .await
        .expect("outcome update should succeed");

    let after = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("re-upsert should succeed");
    assert_eq!(after.status, TaskStatus::Completed);
    assert_eq!(after.progress, 100);
    assert_eq!(after.execution_count, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_active_tasks_filters_by_kind() {
    let (pool, db_name) = create_test_db().await;

    let mut auto = sample_task("nightly");
    auto.kind = TaskKind::Auto;
    tasks::upsert_task(&pool, &auto).await.expect("upsert auto");

    let mut manual = sample_task("adhoc");
    manual.kind = TaskKind::Manual;
    tasks::upsert_task(&pool, &manual).await.expect("upsert manual");

    let mut both = sample_task("either");
    both.kind = TaskKind::Both;
    tasks::upsert_task(&pool, &both).await.expect("upsert both");

    let mut inactive = sample_task("disabled");
    inactive.kind = TaskKind::Auto;
    inactive.active = false;
    tasks::upsert_task(&pool, &inactive).await.expect("upsert inactive");

    let auto_tasks = tasks::get_active_tasks(&pool, TaskKind::Auto)
        .await
        .expect("active auto tasks");
    let names: Vec<&str> = auto_tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["either", "nightly"]);

    let manual_tasks = tasks::get_active_tasks(&pool, TaskKind::Manual)
        .await
        .expect("active manual tasks");
    let names: Vec<&str> = manual_tasks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["adhoc", "either"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn ruleset_payload_roundtrips_through_jsonb() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("upsert should succeed");

    let loaded = tasks::get_task(&pool, task.id)
        .await
        .expect("get should succeed")
        .expect("task should exist");

    let ruleset = loaded.ruleset().expect("ruleset should decode");
    assert_eq!(ruleset.merge_keys(), vec!["id"]);
    assert!(ruleset.fields.contains_key("id"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn execution_history_and_metrics() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("upsert should succeed");

    let record = executions::insert_execution(
        &pool,
        &NewExecution {
            task_id: task.id,
            started_at: Utc::now(),
            success: true,
            rows_read: 10,
            inserted: 8,
            duplicates: 2,
            message: "transfer completed",
            error_detail: None,
        },
    )
    .await
    .expect("insert execution should succeed");
    assert!(record.success);

    let history = executions::list_executions_for_task(&pool, task.id, 10)
        .await
        .expect("list executions should succeed");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].inserted, 8);

    metrics::append_metric(&pool, task.id, &json!({"elapsed_ms": 1234, "rows_per_sec": 8.1}))
        .await
        .expect("append metric should succeed");
    let samples = metrics::list_metrics_for_task(&pool, task.id, 10)
        .await
        .expect("list metrics should succeed");
    assert_eq!(samples.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn delete_task_removes_row() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::upsert_task(&pool, &sample_task("invoices"))
        .await
        .expect("upsert should succeed");

    assert!(tasks::delete_task(&pool, task.id).await.expect("delete"));
    assert!(!tasks::delete_task(&pool, task.id).await.expect("re-delete"));
    assert!(
        tasks::get_task(&pool, task.id)
            .await
            .expect("get should succeed")
            .is_none()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn server_config_upsert_and_fetch() {
    let (pool, db_name) = create_test_db().await;

    let config = UpsertServerConfig {
        name: "erp",
        host: "10.0.0.12",
        port: Some(5432),
        username: "replicator",
        password: "secret",
        database_name: "erp_main",
        encrypt: None,
        trust_cert: true,
    };
    servers::upsert_server_config(&pool, &config)
        .await
        .expect("upsert server config should succeed");

    // Replace the host; the set of configs must not grow.
    let moved = UpsertServerConfig {
        host: "10.0.0.13",
        ..config
    };
    servers::upsert_server_config(&pool, &moved)
        .await
        .expect("re-upsert should succeed");

    let loaded = servers::get_server_config(&pool, "erp")
        .await
        .expect("get should succeed")
        .expect("config should exist");
    assert_eq!(loaded.host, "10.0.0.13");
    assert_eq!(loaded.encrypt, None);

    let all = servers::list_server_configs(&pool)
        .await
        .expect("list should succeed");
    assert_eq!(all.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}
