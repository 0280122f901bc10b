use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::rules::{PostUpdateMapping, PromotionConfig, QueryParam, Ruleset};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Execution kind of a task: when it is eligible to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Picked up by the scheduled trigger only.
    Auto,
    /// Run on operator request only.
    Manual,
    /// Eligible for both.
    Both,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = TaskKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "manual" => Ok(Self::Manual),
            "both" => Ok(Self::Both),
            other => Err(TaskKindParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskKind`] string.
#[derive(Debug, Clone)]
pub struct TaskKindParseError(pub String);

impl fmt::Display for TaskKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task kind: {:?}", self.0)
    }
}

impl std::error::Error for TaskKindParseError {}

// ---------------------------------------------------------------------------

/// Transfer direction. `Default` behaves as `Up` (Source -> Target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Default,
}

impl Direction {
    /// Whether rows flow from the task's source server to its target server.
    pub fn is_up(self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

impl FromStr for Direction {
    type Err = DirectionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "default" => Ok(Self::Default),
            other => Err(DirectionParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Direction`] string.
#[derive(Debug, Clone)]
pub struct DirectionParseError(pub String);

impl fmt::Display for DirectionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid direction: {:?}", self.0)
    }
}

impl std::error::Error for DirectionParseError {}

// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status marks the end of a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A transfer task -- the persisted definition of one migration.
///
/// The rule and promotion payloads are stored as JSONB and surfaced through
/// the typed accessors below; query code treats them as opaque values.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub active: bool,
    pub kind: TaskKind,
    pub direction: Direction,
    pub source_server: String,
    pub target_server: String,
    pub query: String,
    pub params: serde_json::Value,
    pub destination_table: String,
    pub ruleset: serde_json::Value,
    pub post_update_query: Option<String>,
    pub post_update_mapping: Option<serde_json::Value>,
    pub clear_before_insert: bool,
    pub promotion: Option<serde_json::Value>,
    pub status: TaskStatus,
    pub progress: i32,
    pub execution_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Decode the validation ruleset payload.
    pub fn ruleset(&self) -> Result<Ruleset, serde_json::Error> {
        serde_json::from_value(self.ruleset.clone())
    }

    /// Decode the projection-query parameter list.
    pub fn params(&self) -> Result<Vec<QueryParam>, serde_json::Error> {
        serde_json::from_value(self.params.clone())
    }

    /// Decode the promotion configuration, if any.
    pub fn promotion(&self) -> Result<Option<PromotionConfig>, serde_json::Error> {
        match &self.promotion {
            Some(v) => serde_json::from_value(v.clone()).map(Some),
            None => Ok(None),
        }
    }

    /// Decode the post-update key mapping, if any.
    pub fn post_update_mapping(&self) -> Result<Option<PostUpdateMapping>, serde_json::Error> {
        match &self.post_update_mapping {
            Some(v) => serde_json::from_value(v.clone()).map(Some),
            None => Ok(None),
        }
    }
}

/// Connection settings for one Source/Target server, keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    pub port: Option<i32>,
    pub username: String,
    pub password: String,
    pub database_name: String,
    /// `None` means "decide from the host": TLS is disabled for bare IPv4
    /// literals to avoid certificate-name mismatches.
    pub encrypt: Option<bool>,
    pub trust_cert: bool,
    pub created_at: DateTime<Utc>,
}

/// One finished run of a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub task_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub rows_read: i64,
    pub inserted: i64,
    pub duplicates: i64,
    pub message: String,
    pub error_detail: Option<String>,
}

/// A timing/throughput sample recorded during a run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MetricSample {
    pub id: i64,
    pub task_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub sample: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_display_roundtrip() {
        let variants = [TaskKind::Auto, TaskKind::Manual, TaskKind::Both];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskKind = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_kind_invalid() {
        let result = "cron".parse::<TaskKind>();
        assert!(result.is_err());
    }

    #[test]
    fn direction_display_roundtrip() {
        let variants = [Direction::Up, Direction::Down, Direction::Default];
        for v in &variants {
            let s = v.to_string();
            let parsed: Direction = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn direction_default_flows_up() {
        assert!(Direction::Default.is_up());
        assert!(Direction::Up.is_up());
        assert!(!Direction::Down.is_up());
    }

    #[test]
    fn direction_invalid() {
        let result = "sideways".parse::<Direction>();
        assert!(result.is_err());
    }

    #[test]
    fn task_status_display_roundtrip() {
        let variants = [
            TaskStatus::Idle,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: TaskStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn task_status_terminal() {
        assert!(!TaskStatus::Idle.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn task_status_invalid() {
        let result = "paused".parse::<TaskStatus>();
        assert!(result.is_err());
    }
}
