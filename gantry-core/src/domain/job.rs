//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::log::LogEntry;

/// Lifecycle state of a remote job
///
/// Wire encoding matches the runner service (`"PENDING"`, `"RUNNING"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Whether no further remote transition will occur from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Last known status of a remote job
///
/// Decoded directly from the runner service's `GET /status/{job_id}` payload.
/// `owner_id` is a local annotation (which work item the job belongs to) and
/// is never sent by the remote service; the monitor fills it in before the
/// status is written to the cache.
///
/// The remote contract guarantees `result` and `error` are mutually
/// exclusive: `result` is only present on `COMPLETED`, `error` only on
/// `FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,

    /// Which remote workflow ran (e.g. "DOWNLOAD")
    #[serde(default)]
    pub category: String,

    /// Local annotation: id of the owning work item, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,

    #[serde(rename = "status")]
    pub state: JobState,

    /// Completion percentage reported by the runner, 0-100
    #[serde(default)]
    pub progress: u8,

    /// Free-form result payload, present only when `COMPLETED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    /// Error text, present only when `FAILED`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Log lines accumulated by the runner, in emission order
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

impl JobStatus {
    /// Whether the job has reached a terminal remote state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
