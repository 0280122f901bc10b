//! Transfer orchestrator: drives one task through PREPARE -> CONNECT ->
//! FETCH -> PREPARE_DEST -> PROCESS -> POST -> FINALIZE.
//!
//! Phases are strictly sequential within a task; any phase can divert to
//! CANCELLED (tracker signal) or FAILED (non-retriable error). A retriable
//! failure re-runs the task from CONNECT under the retry service; when the
//! budget is spent on a connection-class failure the task lands in the
//! retry queue. Batch mode runs a bounded number of tasks concurrently
//! with an inter-batch pause and health check.

pub mod outcome;
pub mod query;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sluice_db::models::{Task, TaskKind, TaskStatus};
use sluice_db::queries::executions::{self, NewExecution};
use sluice_db::queries::metrics;
use sluice_db::queries::tasks;
use sluice_db::rules::{PostUpdateMapping, PromotionConfig, QueryParam, Ruleset};

use crate::connect::{ConnectionManager, Lease};
use crate::error::TransferError;
use crate::gateway::{self, ColumnType, DataRow};
use crate::progress::{PROGRESS_DONE, PROGRESS_ERROR, ProgressChannel};
use crate::promotion;
use crate::retry::{self, RetryPolicy};
use crate::retry_queue::RetryQueue;
use crate::tracker::TaskTracker;
use crate::validate::{self, ValidateOptions};

use outcome::{DuplicateReport, RunOutcome};

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Rows per outer batch (progress + memory boundary).
    pub outer_batch: usize,
    /// Rows per inner batch (cancellation check boundary).
    pub inner_batch: usize,
    pub duplicate_report_cap: usize,
    /// Extra non-key fields included per duplicate report entry.
    pub duplicate_report_extra_fields: usize,
    /// Keys per post-update statement.
    pub post_update_chunk: usize,
    /// Minimum progress advance (points) between emissions.
    pub progress_step: i32,
    /// Task-level retry policy for connection-class failures.
    pub retry: RetryPolicy,
    /// Concurrent tasks in batch mode.
    pub batch_concurrency: usize,
    /// Pause between batch-mode waves.
    pub batch_pause: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            outer_batch: 500,
            inner_batch: 50,
            duplicate_report_cap: 100,
            duplicate_report_extra_fields: 5,
            post_update_chunk: 500,
            progress_step: 5,
            retry: RetryPolicy::default(),
            batch_concurrency: 3,
            batch_pause: Duration::from_secs(10),
        }
    }
}

/// The transfer driver. One instance serves the whole process; every
/// collaborator is passed in explicitly.
pub struct Orchestrator {
    store: PgPool,
    connections: Arc<ConnectionManager>,
    tracker: Arc<TaskTracker>,
    progress: Arc<ProgressChannel>,
    retry_queue: Arc<RetryQueue>,
    config: OrchestratorConfig,
}

/// Per-phase context shared by the row loop.
struct ProcessArgs<'a> {
    task: &'a Task,
    ruleset: &'a Ruleset,
    merge_fields: &'a [String],
    column_types: &'a HashMap<String, ColumnType>,
    mapping: Option<&'a PostUpdateMapping>,
    target_server: &'a str,
}

/// Counters and accumulators of the PROCESS phase.
struct ProcessState {
    inserted: u64,
    duplicates: u64,
    report: DuplicateReport,
    post_keys: Vec<String>,
}

impl Orchestrator {
    pub fn new(
        store: PgPool,
        connections: Arc<ConnectionManager>,
        tracker: Arc<TaskTracker>,
        progress: Arc<ProgressChannel>,
        retry_queue: Arc<RetryQueue>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            connections,
            tracker,
            progress,
            retry_queue,
            config,
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.tracker
    }

    pub fn progress(&self) -> &Arc<ProgressChannel> {
        &self.progress
    }

    pub fn retry_queue(&self) -> &Arc<RetryQueue> {
        &self.retry_queue
    }

    /// Execute one task end-to-end.
    ///
    /// Returns the run outcome on success. On failure the task's terminal
    /// status and `-1` progress are persisted and emitted before the error
    /// surfaces; connection-class failures are additionally queued for
    /// retry.
    pub async fn run_task(&self, task_id: Uuid) -> Result<RunOutcome, TransferError> {
        let started_at = Utc::now();

        // PREPARE: load and vet the definition before registering the run.
        let task = tasks::get_task(&self.store, task_id)
            .await?
            .ok_or(TransferError::TaskNotFound(task_id))?;
        if !task.active {
            return Err(TransferError::TaskInactive(task_id));
        }
        let ruleset = task
            .ruleset()
            .map_err(|_| TransferError::RuleMissing(task_id))?;
        if !ruleset.is_executable() {
            return Err(TransferError::RuleMissing(task_id));
        }
        let params = task
            .params()
            .map_err(|e| TransferError::Other(anyhow::anyhow!("invalid parameter payload: {e}")))?;
        let promotion_config = task
            .promotion()
            .map_err(|e| TransferError::Other(anyhow::anyhow!("invalid promotion payload: {e}")))?;
        let mapping = task.post_update_mapping().map_err(|e| {
            TransferError::Other(anyhow::anyhow!("invalid post-update mapping: {e}"))
        })?;

        let cancel = self.tracker.register(task_id)?;

        info!(%task_id, task_name = %task.name, "starting transfer");
        if let Err(e) =
            tasks::update_task_status(&self.store, task_id, TaskStatus::Running, 0).await
        {
            self.tracker.complete(task_id);
            return Err(TransferError::Other(e));
        }
        self.progress.emit(task_id, 0);

        let result = retry::execute(
            &self.config.retry,
            &cancel,
            TransferError::is_connection,
            |attempt| {
                self.execute_attempt(
                    &task,
                    &ruleset,
                    &params,
                    promotion_config.as_ref(),
                    mapping.as_ref(),
                    &cancel,
                    attempt,
                )
            },
        )
        .await;

        self.finalize(&task, started_at, result).await
    }

    /// FINALIZE bookkeeping: persist status, counters, and history; emit
    /// the terminal progress event; release the tracker registration.
    ///
    /// Store writes are best-effort here: when the Task Store itself is the
    /// unreachable component, a completed transfer must still report its
    /// outcome to the caller.
    async fn finalize(
        &self,
        task: &Task,
        started_at: chrono::DateTime<chrono::Utc>,
        result: Result<RunOutcome, TransferError>,
    ) -> Result<RunOutcome, TransferError> {
        let task_id = task.id;
        match result {
            Ok(outcome) => {
                if let Err(e) =
                    tasks::update_task_status(&self.store, task_id, TaskStatus::Completed, 100)
                        .await
                {
                    warn!(%task_id, error = %e, "failed to persist completed status");
                }
                if let Err(e) =
                    tasks::update_execution_outcome(&self.store, task_id, &outcome.to_json()).await
                {
                    warn!(%task_id, error = %e, "failed to persist execution outcome");
                }
                if let Err(e) = executions::insert_execution(
                    &self.store,
                    &NewExecution {
                        task_id,
                        started_at,
                        success: true,
                        rows_read: outcome.rows as i64,
                        inserted: outcome.inserted as i64,
                        duplicates: outcome.duplicates as i64,
                        message: &outcome.message,
                        error_detail: None,
                    },
                )
                .await
                {
                    warn!(%task_id, error = %e, "failed to record execution history");
                }
                let elapsed_ms = (Utc::now() - started_at).num_milliseconds();
                if let Err(e) = metrics::append_metric(
                    &self.store,
                    task_id,
                    &json!({
                        "elapsed_ms": elapsed_ms,
                        "rows": outcome.rows,
                        "inserted": outcome.inserted,
                        "duplicates": outcome.duplicates,
                    }),
                )
                .await
                {
                    warn!(%task_id, error = %e, "failed to append metric sample");
                }

                self.progress.emit(task_id, PROGRESS_DONE);
                self.tracker.complete(task_id);
                info!(
                    %task_id,
                    inserted = outcome.inserted,
                    duplicates = outcome.duplicates,
                    "transfer completed"
                );
                Ok(outcome)
            }
            Err(err) => {
                let status = if matches!(err, TransferError::Cancelled) {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Failed
                };
                if let Err(e) =
                    tasks::update_task_status(&self.store, task_id, status, -1).await
                {
                    warn!(%task_id, error = %e, "failed to persist terminal status");
                }
                if let Err(e) = executions::insert_execution(
                    &self.store,
                    &NewExecution {
                        task_id,
                        started_at,
                        success: false,
                        rows_read: 0,
                        inserted: 0,
                        duplicates: 0,
                        message: &format!("transfer {status}"),
                        error_detail: Some(&err.to_string()),
                    },
                )
                .await
                {
                    warn!(%task_id, error = %e, "failed to record execution history");
                }

                self.progress.emit(task_id, PROGRESS_ERROR);
                if err.is_connection() {
                    self.retry_queue.enqueue(task_id, &err.to_string());
                }
                self.tracker.complete(task_id);
                warn!(%task_id, error = %err, "transfer did not complete");
                Err(err)
            }
        }
    }

    /// One attempt at CONNECT through FINALIZE-commit. Re-entered from
    /// CONNECT by the retry service on connection-class failures.
    #[allow(clippy::too_many_arguments)]
    async fn execute_attempt(
        &self,
        task: &Task,
        ruleset: &Ruleset,
        params: &[QueryParam],
        promotion_config: Option<&PromotionConfig>,
        mapping: Option<&PostUpdateMapping>,
        cancel: &CancellationToken,
        attempt: u32,
    ) -> Result<RunOutcome, TransferError> {
        if attempt > 0 {
            info!(task_id = %task.id, attempt, "re-attempting transfer from CONNECT");
        }
        check_cancelled(cancel)?;

        // CONNECT: source first, then target; the source lease goes back to
        // its pool when the target lease fails.
        let (source_server, target_server) = if task.direction.is_up() {
            (task.source_server.as_str(), task.target_server.as_str())
        } else {
            (task.target_server.as_str(), task.source_server.as_str())
        };
        let mut source = self.connections.lease(source_server).await?;
        let mut target = match self.connections.lease(target_server).await {
            Ok(lease) => lease,
            Err(e) => {
                drop(source);
                return Err(e);
            }
        };
        check_cancelled(cancel)?;

        // FETCH
        let (sql, bind_values) = query::build_fetch_query(&task.query, params)?;
        let rows = gateway::query(source.connection(), &sql, &bind_values).await?;
        let total = rows.len();
        check_cancelled(cancel)?;

        if rows.is_empty() {
            // Success-no-op: no transaction is ever opened against the target.
            let count = gateway::count_rows(target.connection(), &task.destination_table)
                .await
                .unwrap_or(0);
            return Ok(RunOutcome::empty(count, count));
        }

        // PREPARE_DEST
        if task.clear_before_insert {
            let cleared = gateway::clear_table(target.connection(), &task.destination_table).await?;
            info!(task_id = %task.id, cleared, "cleared destination table");
        }
        let initial_count = match gateway::count_rows(target.connection(), &task.destination_table)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "initial count failed, assuming 0");
                0
            }
        };
        let column_types =
            gateway::column_types(target.connection(), &task.destination_table).await?;
        if column_types.is_empty() {
            return Err(TransferError::Other(anyhow::anyhow!(
                "destination table {} does not exist",
                task.destination_table
            )));
        }
        check_cancelled(cancel)?;

        // PROCESS
        let merge_fields = ruleset.merge_keys();
        let mut existing =
            match gateway::distinct_keys(target.connection(), &task.destination_table, &merge_fields)
                .await
            {
                Ok(keys) => keys,
                Err(e) => {
                    // Insert-time constraint errors still catch duplicates.
                    warn!(
                        task_id = %task.id,
                        error = %e,
                        "existing-key prefetch failed, continuing with empty set"
                    );
                    HashSet::new()
                }
            };

        let rows = match promotion_config {
            Some(config) => {
                let linked = promotion::link(rows, config);
                if linked.orphans > 0 {
                    warn!(task_id = %task.id, orphans = linked.orphans, "bonus rows without trigger");
                }
                linked.rows
            }
            None => rows,
        };

        let args = ProcessArgs {
            task,
            ruleset,
            merge_fields: &merge_fields,
            column_types: &column_types,
            mapping,
            target_server,
        };

        gateway::begin(target.connection()).await?;
        let state = match self
            .process_rows(&args, rows, &mut existing, &mut target, cancel, total)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                // Roll back explicitly; a dead session has nothing to roll back.
                if let Err(rb) = gateway::rollback(target.connection()).await {
                    warn!(task_id = %task.id, error = %rb, "rollback after failure did not apply");
                }
                return Err(e);
            }
        };

        // POST: source-side marking. Failures are logged, never fatal.
        let mut post_error = None;
        if let (Some(post_sql), Some(mapping)) = (task.post_update_query.as_deref(), mapping) {
            if !state.post_keys.is_empty() {
                match self
                    .run_post_update(post_sql, mapping, &state.post_keys, &mut source, source_server, cancel)
                    .await
                {
                    Ok(()) => {}
                    Err(TransferError::Cancelled) => {
                        let _ = gateway::rollback(target.connection()).await;
                        return Err(TransferError::Cancelled);
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "post-transfer update failed");
                        post_error = Some(e.to_string());
                    }
                }
            }
        }

        // FINALIZE: commit and count.
        gateway::commit(target.connection()).await?;
        let final_count = match gateway::count_rows(target.connection(), &task.destination_table)
            .await
        {
            Ok(n) => n,
            Err(_) => initial_count + state.inserted as i64,
        };

        let message = match &post_error {
            Some(_) => "transfer completed; post-transfer update failed".to_owned(),
            None => "transfer completed".to_owned(),
        };
        Ok(RunOutcome {
            success: true,
            rows: total as u64,
            inserted: state.inserted,
            duplicates: state.duplicates,
            has_more_duplicates: state.report.has_more(),
            total_duplicates: state.report.total(),
            duplicated_records: state.report.into_entries(),
            initial_count,
            final_count,
            message,
            error_detail: post_error,
        })
    }

    /// The batched row loop of the PROCESS phase.
    ///
    /// Rows are validated, checked against the existing-key set, and
    /// inserted one by one inside the open target transaction. A lost
    /// connection is re-leased, a new transaction opened, and the current
    /// row retried exactly once. Progress is recomputed after each outer
    /// batch and emitted on a >= `progress_step` advance or at 99.
    async fn process_rows(
        &self,
        args: &ProcessArgs<'_>,
        rows: Vec<DataRow>,
        existing: &mut HashSet<String>,
        target: &mut Lease,
        cancel: &CancellationToken,
        total: usize,
    ) -> Result<ProcessState, TransferError> {
        let task_id = args.task.id;
        let options = ValidateOptions {
            allow_extra_fields: true,
            auto_convert: true,
            truncate: true,
            ..Default::default()
        };

        let mut state = ProcessState {
            inserted: 0,
            duplicates: 0,
            report: DuplicateReport::new(
                self.config.duplicate_report_cap,
                self.config.duplicate_report_extra_fields,
            ),
            post_keys: Vec::new(),
        };
        let mut processed: usize = 0;
        let mut last_emitted: i32 = 0;

        for outer in rows.chunks(self.config.outer_batch) {
            for inner in outer.chunks(self.config.inner_batch) {
                check_cancelled(cancel)?;

                for row in inner {
                    let clean = validate::validate(row, args.ruleset, &options).map_err(|errors| {
                        let first = &errors[0];
                        TransferError::Validation {
                            field: first.field.clone(),
                            reason: errors
                                .iter()
                                .map(|e| e.reason.as_str())
                                .collect::<Vec<_>>()
                                .join("; "),
                        }
                    })?;

                    if let Some(mapping) = args.mapping {
                        let key_value = clean.get_or_null(&mapping.dest_field);
                        if !key_value.is_null() {
                            state.post_keys.push(key_value.to_string());
                        }
                    }

                    let key = clean.key_string(args.merge_fields);
                    if existing.contains(&key) {
                        state.duplicates += 1;
                        state.report.record(&clean, args.merge_fields, None);
                        processed += 1;
                        continue;
                    }

                    match gateway::insert_row(
                        target.connection(),
                        &args.task.destination_table,
                        &clean,
                        args.column_types,
                        &key,
                    )
                    .await
                    {
                        Ok(_) => {
                            state.inserted += 1;
                            existing.insert(key);
                        }
                        Err(TransferError::Duplicate { .. }) => {
                            state.duplicates += 1;
                            state
                                .report
                                .record(&clean, args.merge_fields, Some("unique-constraint"));
                            existing.insert(key);
                        }
                        Err(e) if e.is_connection() => {
                            warn!(
                                %task_id,
                                error = %e,
                                "target connection lost mid-batch, reconnecting"
                            );
                            // The in-flight transaction died with the session.
                            *target = self.connections.lease(args.target_server).await?;
                            gateway::begin(target.connection()).await?;
                            match gateway::insert_row(
                                target.connection(),
                                &args.task.destination_table,
                                &clean,
                                args.column_types,
                                &key,
                            )
                            .await
                            {
                                Ok(_) => {
                                    state.inserted += 1;
                                    existing.insert(key);
                                }
                                Err(TransferError::Duplicate { .. }) => {
                                    state.duplicates += 1;
                                    state.report.record(
                                        &clean,
                                        args.merge_fields,
                                        Some("unique-constraint"),
                                    );
                                    existing.insert(key);
                                }
                                Err(e) => return Err(e),
                            }
                        }
                        Err(e) => return Err(e),
                    }
                    processed += 1;
                }
            }

            // Progress after each outer batch, capped at 99 until FINALIZE.
            let pct = ((processed * 100) / total.max(1)).min(99) as i32;
            if pct - last_emitted >= self.config.progress_step || (pct == 99 && last_emitted != 99)
            {
                last_emitted = pct;
                if let Err(e) =
                    tasks::update_task_status(&self.store, task_id, TaskStatus::Running, pct).await
                {
                    warn!(%task_id, error = %e, "failed to persist progress");
                }
                self.progress.emit(task_id, pct);
            }
        }

        Ok(state)
    }

    /// POST phase: apply the source-side update in key chunks, reconnecting
    /// and retrying once per chunk on a lost connection.
    async fn run_post_update(
        &self,
        base_sql: &str,
        mapping: &PostUpdateMapping,
        keys: &[String],
        source: &mut Lease,
        source_server: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        for chunk in keys.chunks(self.config.post_update_chunk) {
            check_cancelled(cancel)?;
            let (sql, values) = query::build_post_update(base_sql, mapping, chunk)?;
            match gateway::execute(source.connection(), &sql, &values).await {
                Ok(_) => {}
                Err(e) if e.is_connection() => {
                    warn!(error = %e, "source connection lost during post-update, reconnecting");
                    *source = self.connections.lease(source_server).await?;
                    gateway::execute(source.connection(), &sql, &values)
                        .await
                        .map_err(|e| TransferError::PostUpdate(e.to_string()))?;
                }
                Err(e) => return Err(TransferError::PostUpdate(e.to_string())),
            }
        }
        Ok(())
    }

    /// Batch mode: run every active task of the given kind, up to
    /// `batch_concurrency` at a time, pausing between waves and checking
    /// the Task Store before each new wave.
    pub async fn run_batch(
        self: &Arc<Self>,
        kind: TaskKind,
    ) -> Result<Vec<(Uuid, Result<RunOutcome, TransferError>)>, TransferError> {
        let batch = tasks::get_active_tasks(&self.store, kind).await?;
        info!(tasks = batch.len(), %kind, "starting batch run");

        let mut results = Vec::with_capacity(batch.len());
        for (wave, chunk) in batch.chunks(self.config.batch_concurrency).enumerate() {
            if wave > 0 {
                tokio::time::sleep(self.config.batch_pause).await;
                if sqlx::query_scalar::<_, i32>("SELECT 1")
                    .fetch_one(&self.store)
                    .await
                    .is_err()
                {
                    warn!("task store unreachable between batches, stopping batch run");
                    break;
                }
            }

            let mut join_set = JoinSet::new();
            for task in chunk {
                let this = Arc::clone(self);
                let task_id = task.id;
                join_set.spawn(async move { (task_id, this.run_task(task_id).await) });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(pair) => results.push(pair),
                    Err(e) => warn!(error = %e, "batch worker panicked"),
                }
            }
        }
        Ok(results)
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), TransferError> {
    if cancel.is_cancelled() {
        Err(TransferError::Cancelled)
    } else {
        Ok(())
    }
}
