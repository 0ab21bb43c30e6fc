//! Execution tracking
//!
//! Drives the per-attempt execution records from monitor outcomes and
//! explicit caller actions. Records live behind the `ExecutionStore` seam;
//! the in-memory implementation below is the default, durable backends plug
//! in at the trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use gantry_client::ClientError;
use gantry_core::domain::execution::{
    ErrorDetail, ErrorKind, ExecutionKind, ExecutionRecord, ExecutionState,
};
use gantry_core::domain::job::{JobState, JobStatus};

use crate::EngineError;
use crate::monitor::MonitorError;

/// Storage seam for execution records
pub trait ExecutionStore: Send + Sync {
    /// Inserts or replaces a record
    fn save(&self, record: ExecutionRecord);

    fn get(&self, id: Uuid) -> Option<ExecutionRecord>;

    /// All attempts for a work item, in attempt order
    fn for_work_item(&self, work_item_id: Uuid) -> Vec<ExecutionRecord>;

    /// Most recently started records, newest first
    fn recent(&self, limit: usize) -> Vec<ExecutionRecord>;
}

/// In-memory implementation of ExecutionStore
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: Mutex<HashMap<Uuid, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    fn save(&self, record: ExecutionRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    fn get(&self, id: Uuid) -> Option<ExecutionRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    fn for_work_item(&self, work_item_id: Uuid) -> Vec<ExecutionRecord> {
        let records = self.records.lock().unwrap();
        let mut attempts: Vec<ExecutionRecord> = records
            .values()
            .filter(|record| record.work_item_id == work_item_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|record| record.attempt);
        attempts
    }

    fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let records = self.records.lock().unwrap();
        let mut all: Vec<ExecutionRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all.truncate(limit);
        all
    }
}

/// Applies monitor outcomes and caller actions to execution records
///
/// Keeps a job-id index so monitor callbacks, which only know the remote job
/// id, can find the owning record. A record is settled at most once; events
/// arriving after it reached a terminal state are ignored.
pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    jobs: Mutex<HashMap<String, Uuid>>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the first-attempt record for a unit of work
    pub fn begin(
        &self,
        work_item_id: Uuid,
        kind: ExecutionKind,
        input: serde_json::Value,
    ) -> ExecutionRecord {
        let record = ExecutionRecord::new(work_item_id, kind, input);
        info!(
            "execution {} started (work item {}, attempt {})",
            record.id, record.work_item_id, record.attempt
        );
        self.store.save(record.clone());
        record
    }

    /// Links a record to its acknowledged remote job id
    pub fn attach_job(&self, record_id: Uuid, job_id: &str) {
        if let Some(mut record) = self.store.get(record_id) {
            record.attach_job(job_id);
            self.store.save(record);
            self.jobs
                .lock()
                .unwrap()
                .insert(job_id.to_string(), record_id);
        }
    }

    pub fn record(&self, id: Uuid) -> Option<ExecutionRecord> {
        self.store.get(id)
    }

    pub fn record_for_job(&self, job_id: &str) -> Option<Uuid> {
        self.jobs.lock().unwrap().get(job_id).copied()
    }

    pub fn for_work_item(&self, work_item_id: Uuid) -> Vec<ExecutionRecord> {
        self.store.for_work_item(work_item_id)
    }

    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.store.recent(limit)
    }

    /// Moves a resubmitted record from `Retrying` to `Running`
    pub fn mark_running(&self, record_id: Uuid) {
        if let Some(mut record) = self.store.get(record_id) {
            if record.state == ExecutionState::Retrying {
                record.mark_running();
                self.store.save(record);
            }
        }
    }

    /// Settles the record owning `job_id` from a terminal job status
    pub fn finish_job(&self, job_id: &str, status: &JobStatus) {
        match self.record_for_job(job_id) {
            Some(record_id) => self.complete(record_id, status),
            None => debug!("no execution linked to job {}", job_id),
        }
    }

    /// Settles a record from a terminal job status
    ///
    /// A COMPLETED status only counts as success when the result carries the
    /// kind's expected artifact; a job that reports success without it is
    /// recorded as failed rather than silently treated as done.
    pub fn complete(&self, record_id: Uuid, status: &JobStatus) {
        let Some(mut record) = self.store.get(record_id) else {
            return;
        };
        if record.is_terminal() {
            debug!("execution {} already settled", record_id);
            return;
        }

        match status.state {
            JobState::Completed => {
                self.settle_with_result(
                    &mut record,
                    status.result.clone().unwrap_or(serde_json::Value::Null),
                );
            }
            JobState::Failed => {
                let message = status
                    .error
                    .clone()
                    .unwrap_or_else(|| "job failed without error detail".to_string());
                record.fail(ErrorDetail::new(ErrorKind::Remote, message));
            }
            // Non-terminal statuses are not completions.
            _ => return,
        }

        self.unlink(&record);
        self.store.save(record);
    }

    /// Settles a record from an inline (synchronous) submission result
    pub fn complete_inline(&self, record_id: Uuid, result: &serde_json::Value) {
        let Some(mut record) = self.store.get(record_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }

        self.settle_with_result(&mut record, result.clone());
        self.unlink(&record);
        self.store.save(record);
    }

    fn settle_with_result(&self, record: &mut ExecutionRecord, result: serde_json::Value) {
        let artifact = record.kind.expected_artifact();
        if result.get(artifact).is_some() {
            record.succeed(result);
        } else {
            record.fail(
                ErrorDetail::new(
                    ErrorKind::MissingOutput,
                    format!("job completed without `{}` in its result", artifact),
                )
                .with_context(result),
            );
        }
    }

    /// Settles the record owning `job_id` from a monitor error
    pub fn fail_job(&self, job_id: &str, error: &MonitorError) {
        let Some(record_id) = self.record_for_job(job_id) else {
            debug!("no execution linked to job {}", job_id);
            return;
        };
        let Some(mut record) = self.store.get(record_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }

        match error {
            MonitorError::Timeout { waited } => record.time_out(waited.as_secs()),
            MonitorError::Check(message) => {
                record.fail(ErrorDetail::new(ErrorKind::Remote, message.clone()));
            }
        }

        self.unlink(&record);
        self.store.save(record);
    }

    /// Marks a record as failed because the submission itself failed
    pub fn submit_failed(&self, record_id: Uuid, error: &ClientError) {
        if let Some(mut record) = self.store.get(record_id) {
            if record.is_in_flight() {
                record.fail(error_detail(error));
                self.unlink(&record);
                self.store.save(record);
            }
        }
    }

    /// Cancels an in-flight record
    pub fn cancel(
        &self,
        record_id: Uuid,
        reason: Option<&str>,
    ) -> Result<ExecutionRecord, EngineError> {
        let mut record = self
            .store
            .get(record_id)
            .ok_or(EngineError::UnknownExecution(record_id))?;

        if !record.is_in_flight() {
            return Err(EngineError::InvalidState(format!(
                "execution {} is already {:?}",
                record_id, record.state
            )));
        }

        record.cancel(reason);
        self.unlink(&record);
        self.store.save(record.clone());
        info!("execution {} cancelled", record_id);
        Ok(record)
    }

    /// Creates the next attempt for a failed record
    ///
    /// Only permitted from `Failed`; the new record shares the work-item id,
    /// kind and input snapshot, with the attempt number incremented. The
    /// failed record is left exactly as it was.
    pub fn retry(&self, record_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let record = self
            .store
            .get(record_id)
            .ok_or(EngineError::UnknownExecution(record_id))?;

        if record.state != ExecutionState::Failed {
            return Err(EngineError::InvalidState(format!(
                "retry is only permitted from FAILED, execution {} is {:?}",
                record_id, record.state
            )));
        }

        let next = record.next_attempt();
        info!(
            "execution {} retried as {} (attempt {})",
            record_id, next.id, next.attempt
        );
        self.store.save(next.clone());
        Ok(next)
    }

    fn unlink(&self, record: &ExecutionRecord) {
        if let Some(job_id) = &record.job_id {
            self.jobs.lock().unwrap().remove(job_id);
        }
    }
}

fn error_detail(error: &ClientError) -> ErrorDetail {
    let kind = match error {
        ClientError::Validation(_) => ErrorKind::Validation,
        ClientError::InvalidCategory(_) => ErrorKind::InvalidCategory,
        ClientError::NotFound(_) => ErrorKind::NotFound,
        ClientError::Remote { .. } => ErrorKind::Remote,
        ClientError::Network(_) => ErrorKind::Network,
        ClientError::Parse(_) => ErrorKind::Remote,
    };
    ErrorDetail::new(kind, error.to_string())
}
