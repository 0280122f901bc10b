//! Shared construction of the core components for commands that execute
//! transfers. Every collaborator is built here and passed in explicitly;
//! nothing is process-global.

use std::sync::Arc;

use sqlx::PgPool;

use sluice_core::connect::ConnectionManager;
use sluice_core::health::{HealthConfig, HealthMonitor};
use sluice_core::orchestrator::{Orchestrator, OrchestratorConfig};
use sluice_core::progress::ProgressChannel;
use sluice_core::retry_queue::{RetryQueue, RetryQueueConfig};
use sluice_core::tracker::TaskTracker;

/// The wired-up transfer runtime.
pub struct Runtime {
    pub orchestrator: Arc<Orchestrator>,
    pub health: Arc<HealthMonitor>,
}

/// Build the orchestrator and its collaborators on top of a Task Store pool.
pub fn build_runtime(pool: &PgPool) -> Runtime {
    let connections = Arc::new(ConnectionManager::new(pool.clone()));
    let tracker = Arc::new(TaskTracker::new());
    let progress = Arc::new(ProgressChannel::new());
    let retry_queue = Arc::new(RetryQueue::new(RetryQueueConfig::default()));
    let health = Arc::new(HealthMonitor::new(
        pool.clone(),
        Arc::clone(&connections),
        HealthConfig::default(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        pool.clone(),
        connections,
        tracker,
        progress,
        retry_queue,
        OrchestratorConfig::default(),
    ));

    Runtime {
        orchestrator,
        health,
    }
}
