//! Health monitor: periodic probing of the Task Store and every configured
//! server, with threshold-driven pool recovery.
//!
//! Error counters are owned by the monitor, not global: `database` counts
//! Task Store failures, `connection` counts server probe failures. Crossing
//! a threshold triggers recovery (close pools, wait, re-probe), bounded by
//! a cooldown and an attempt cap. Any full-success probe resets both
//! counters.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice_db::queries::servers;

use crate::connect::ConnectionManager;
use crate::retry_queue::Readiness;

/// Monitor tuning knobs.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub interval: Duration,
    /// Task Store failures tolerated before recovery.
    pub database_threshold: u32,
    /// Server probe failures tolerated before recovery.
    pub connection_threshold: u32,
    /// Pause between closing pools and re-probing during recovery.
    pub recovery_wait: Duration,
    /// Minimum spacing between recovery attempts.
    pub recovery_cooldown: Duration,
    pub max_recovery_attempts: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            database_threshold: 3,
            connection_threshold: 5,
            recovery_wait: Duration::from_secs(5),
            recovery_cooldown: Duration::from_secs(30 * 60),
            max_recovery_attempts: 3,
        }
    }
}

#[derive(Debug, Default)]
struct ErrorCounters {
    database: u32,
    connection: u32,
}

/// Health of one configured server in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHealth {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Point-in-time health view, served over the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub store_ok: bool,
    pub servers: Vec<ServerHealth>,
    pub degraded: bool,
    pub database_errors: u32,
    pub connection_errors: u32,
}

impl HealthSnapshot {
    pub fn all_ok(&self) -> bool {
        self.store_ok && self.servers.iter().all(|s| s.ok)
    }
}

/// The periodic health monitor.
pub struct HealthMonitor {
    store: PgPool,
    connections: Arc<ConnectionManager>,
    config: HealthConfig,
    counters: Mutex<ErrorCounters>,
    recovery_attempts: AtomicU32,
    last_recovery: Mutex<Option<Instant>>,
    /// Set once recovery attempts are exhausted; cleared by an operator
    /// reset or a fully healthy probe.
    degraded: AtomicBool,
}

impl HealthMonitor {
    pub fn new(store: PgPool, connections: Arc<ConnectionManager>, config: HealthConfig) -> Self {
        Self {
            store,
            connections,
            config,
            counters: Mutex::new(ErrorCounters::default()),
            recovery_attempts: AtomicU32::new(0),
            last_recovery: Mutex::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    /// Run the monitor loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            self.probe_once().await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("health monitor stopping");
                    return;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// One probe cycle: Task Store, then every configured server. Updates
    /// counters and triggers recovery when a threshold is crossed.
    pub async fn probe_once(&self) -> HealthSnapshot {
        let snapshot = self.collect_snapshot().await;

        if snapshot.all_ok() {
            let mut counters = self.counters.lock().expect("health counters poisoned");
            counters.database = 0;
            counters.connection = 0;
            self.degraded.store(false, Ordering::SeqCst);
            return snapshot;
        }

        let (database, connection) = {
            let mut counters = self.counters.lock().expect("health counters poisoned");
            if !snapshot.store_ok {
                counters.database += 1;
            }
            if snapshot.servers.iter().any(|s| !s.ok) {
                counters.connection += 1;
            }
            (counters.database, counters.connection)
        };

        warn!(
            database_errors = database,
            connection_errors = connection,
            "health probe found failures"
        );

        if database >= self.config.database_threshold
            || connection >= self.config.connection_threshold
        {
            self.recover().await;
        }

        // Counters may have been reset by a successful recovery.
        self.current_snapshot_counters(snapshot)
    }

    async fn collect_snapshot(&self) -> HealthSnapshot {
        let store_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.store)
            .await
            .is_ok();

        let mut server_health = Vec::new();
        if store_ok {
            match servers::list_server_configs(&self.store).await {
                Ok(configs) => {
                    for config in configs {
                        let result = self.connections.probe(&config.name).await;
                        server_health.push(ServerHealth {
                            name: config.name.clone(),
                            ok: result.is_ok(),
                            detail: match result {
                                Ok(()) => "reachable".to_owned(),
                                Err(e) => e.to_string(),
                            },
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to list server configs for health probe");
                }
            }
        }

        self.current_snapshot_counters(HealthSnapshot {
            store_ok,
            servers: server_health,
            degraded: false,
            database_errors: 0,
            connection_errors: 0,
        })
    }

    fn current_snapshot_counters(&self, mut snapshot: HealthSnapshot) -> HealthSnapshot {
        let counters = self.counters.lock().expect("health counters poisoned");
        snapshot.database_errors = counters.database;
        snapshot.connection_errors = counters.connection;
        snapshot.degraded = self.degraded.load(Ordering::SeqCst);
        snapshot
    }

    /// Recovery: close every pool, wait, and re-probe. Bounded by the
    /// cooldown and the attempt cap; past the cap the monitor only logs
    /// the degradation until an operator resets it.
    async fn recover(&self) {
        if self.degraded.load(Ordering::SeqCst) {
            error!("health monitor degraded; waiting for operator reset");
            return;
        }

        {
            let last = self.last_recovery.lock().expect("recovery timestamp poisoned");
            if let Some(at) = *last {
                if at.elapsed() < self.config.recovery_cooldown {
                    info!("recovery cooldown active, skipping");
                    return;
                }
            }
        }

        let attempt = self.recovery_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.max_recovery_attempts {
            self.degraded.store(true, Ordering::SeqCst);
            error!(
                attempts = attempt - 1,
                "recovery attempts exhausted, marking monitor degraded"
            );
            return;
        }

        warn!(attempt, "recovering connection pools");
        self.connections.close_pools().await;
        tokio::time::sleep(self.config.recovery_wait).await;
        *self.last_recovery.lock().expect("recovery timestamp poisoned") = Some(Instant::now());

        let snapshot = self.collect_snapshot().await;
        if snapshot.all_ok() {
            info!("recovery succeeded, resetting error counters");
            let mut counters = self.counters.lock().expect("health counters poisoned");
            counters.database = 0;
            counters.connection = 0;
            self.recovery_attempts.store(0, Ordering::SeqCst);
            self.degraded.store(false, Ordering::SeqCst);
        } else {
            warn!(attempt, "recovery probe still failing");
        }
    }

    /// Operator override: clear counters, attempts, and the degraded flag.
    pub fn reset_counters(&self) {
        let mut counters = self.counters.lock().expect("health counters poisoned");
        counters.database = 0;
        counters.connection = 0;
        self.recovery_attempts.store(0, Ordering::SeqCst);
        self.degraded.store(false, Ordering::SeqCst);
        info!("health counters reset by operator");
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Readiness for HealthMonitor {
    /// The retry queue's gate: everything must answer right now.
    async fn ready(&self) -> bool {
        self.collect_snapshot().await.all_ok()
    }
}
