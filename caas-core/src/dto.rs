//! Data transfer objects for the REST control plane
//!
//! Shared between the server handlers and the CLI/client so both sides
//! agree on response shapes.

use crate::domain::job::JobStatus;
use crate::domain::log::LogRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry in the command list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSummary {
    pub id: String,
    pub script: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
}

/// Full view of a single command, including its state flags and the
/// current log ring snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDetail {
    pub id: String,
    pub script: String,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errored_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub is_cancelled: bool,
    pub is_error: bool,
    pub is_killed_by_close: bool,
    pub is_timeout: bool,
    pub error: Option<String>,
    pub log: Vec<LogRecord>,
}

/// Response to `GET /commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandList {
    pub total: i64,
    pub commands: Vec<CommandSummary>,
}

/// Response to `POST /commands`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: String,
}

/// Response to `POST /exec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub id: String,
    pub log: String,
}

/// Point-in-time view of the server-wide counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total: i64,
    pub running: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub error: i64,
}
