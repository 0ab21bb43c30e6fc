//! Execution record domain types
//!
//! An `ExecutionRecord` is the durable record of one attempt to perform a
//! unit of work (download an invoice, upload it to the target system). Each
//! work item may accumulate several records, one per attempt; a record is
//! mutated exactly once into a terminal state and never reused. Retrying a
//! failed attempt creates a fresh record with the attempt number incremented,
//! chained to the previous one through the shared work-item id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of work an execution performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionKind {
    Download,
    Upload,
}

impl ExecutionKind {
    /// The remote workflow category this kind submits to
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionKind::Download => "DOWNLOAD",
            ExecutionKind::Upload => "UPLOAD",
        }
    }

    /// Field the remote result must carry for the execution to count as a
    /// success. A job that completes without it is recorded as failed, not
    /// silently treated as done.
    pub fn expected_artifact(&self) -> &'static str {
        match self {
            ExecutionKind::Download => "artifact_url",
            ExecutionKind::Upload => "protocol_id",
        }
    }
}

/// State of an execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Running,
    Succeeded,
    Failed,
    Retrying,
    Cancelled,
    TimedOut,
}

/// Closed set of failure categories recorded on an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    InvalidCategory,
    NotFound,
    Remote,
    Network,
    Timeout,
    MissingOutput,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation failed",
            ErrorKind::InvalidCategory => "invalid category",
            ErrorKind::NotFound => "job not found",
            ErrorKind::Remote => "remote service error",
            ErrorKind::Network => "network error",
            ErrorKind::Timeout => "timed out",
            ErrorKind::MissingOutput => "succeeded without expected output",
            ErrorKind::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

/// Structured failure detail stored on a failed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    /// Any remote-supplied context worth keeping for operator reports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            at: Utc::now(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// One attempt to perform a unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    /// Id of the work item this attempt belongs to; shared across retries
    pub work_item_id: Uuid,
    /// Attempt number within the work item's chain (1, 2, 3...)
    pub attempt: u32,
    pub kind: ExecutionKind,
    pub state: ExecutionState,
    /// Remote job id, once the submission has been acknowledged
    pub job_id: Option<String>,
    /// Snapshot of the payload that was sent to the runner
    pub input: serde_json::Value,
    /// Result snapshot, present only on success
    pub output: Option<serde_json::Value>,
    /// Failure detail, present only on failure
    pub error: Option<ErrorDetail>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Human-readable log, accumulated line by line
    pub log: String,
}

impl ExecutionRecord {
    /// Creates a new first-attempt record in `Running`
    pub fn new(work_item_id: Uuid, kind: ExecutionKind, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id,
            attempt: 1,
            kind,
            state: ExecutionState::Running,
            job_id: None,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            log: String::new(),
        }
    }

    /// Creates the follow-up record for a retry of this attempt
    ///
    /// Copies the kind and input snapshot, increments the attempt number and
    /// starts in `Retrying` until the resubmission is acknowledged. The
    /// original record is left untouched.
    pub fn next_attempt(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_item_id: self.work_item_id,
            attempt: self.attempt + 1,
            kind: self.kind,
            state: ExecutionState::Retrying,
            job_id: None,
            input: self.input.clone(),
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            log: String::new(),
        }
    }

    /// Whether the attempt is still in flight (may still transition)
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.state,
            ExecutionState::Running | ExecutionState::Retrying
        )
    }

    /// Whether the attempt has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// Duration from start to finish, if the attempt has finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Records the remote job id once the submission is acknowledged
    pub fn attach_job(&mut self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        self.append_log(&format!("remote job {} acknowledged", job_id));
        self.job_id = Some(job_id);
    }

    /// Moves a `Retrying` record to `Running` after a successful resubmit
    pub fn mark_running(&mut self) {
        self.state = ExecutionState::Running;
    }

    /// Finishes the attempt successfully, storing the output snapshot
    pub fn succeed(&mut self, output: serde_json::Value) {
        self.state = ExecutionState::Succeeded;
        self.finished_at = Some(Utc::now());
        self.output = Some(output);
        self.append_log("completed successfully");
    }

    /// Finishes the attempt as failed with structured detail
    pub fn fail(&mut self, detail: ErrorDetail) {
        self.append_log(&format!("{}: {}", detail.kind, detail.message));
        self.state = ExecutionState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(detail);
    }

    /// Finishes the attempt as timed out after waiting `waited` seconds
    pub fn time_out(&mut self, waited_secs: u64) {
        let detail = ErrorDetail::new(
            ErrorKind::Timeout,
            format!("job did not finish within {} seconds", waited_secs),
        );
        self.append_log(&detail.message);
        self.state = ExecutionState::TimedOut;
        self.finished_at = Some(Utc::now());
        self.error = Some(detail);
    }

    /// Cancels the attempt
    pub fn cancel(&mut self, reason: Option<&str>) {
        let message = match reason {
            Some(reason) => format!("cancelled: {}", reason),
            None => "cancelled by caller".to_string(),
        };
        self.append_log(&message);
        self.state = ExecutionState::Cancelled;
        self.finished_at = Some(Utc::now());
        self.error = Some(ErrorDetail::new(ErrorKind::Cancelled, message));
    }

    /// Appends a timestamped line to the accumulated log
    pub fn append_log(&mut self, line: &str) {
        let stamped = format!("[{}] {}", Utc::now().format("%Y-%m-%d %H:%M:%S"), line);
        if self.log.is_empty() {
            self.log = stamped;
        } else {
            self.log.push('\n');
            self.log.push_str(&stamped);
        }
    }
}
