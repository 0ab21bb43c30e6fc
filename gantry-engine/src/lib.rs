//! Gantry Engine
//!
//! Orchestrates long-running automation jobs executed by a remote RPA runner
//! service and tracks their lifecycle locally.
//!
//! Architecture:
//! - Configuration: engine knobs from explicit values or environment
//! - Cache: bounded, TTL-expiring store of recent job statuses
//! - Monitor: single background loop polling the tracked working set
//! - Execution tracking: durable per-attempt records driven by monitor outcomes
//! - Engine: one constructed handle wiring it all together
//!
//! The [`Engine`] replaces module-level singletons with an explicitly
//! constructed set of services: build one per process at startup, hand out
//! references, and call [`Engine::shutdown`] to stop and join the background
//! tasks.
//!
//! # Example
//!
//! ```no_run
//! use gantry_core::domain::execution::ExecutionKind;
//! use gantry_core::dto::payload::DownloadPayload;
//! use gantry_engine::{Engine, EngineConfig};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Engine::start(EngineConfig::new("http://localhost:8000"))?;
//!
//!     let payload = DownloadPayload {
//!         login: "acme".into(),
//!         password: "secret".into(),
//!         filter: "monthly_invoice".into(),
//!         tax_id: "12.345.678/0001-90".into(),
//!     };
//!     let submission = engine
//!         .submit_work(Uuid::new_v4(), ExecutionKind::Download, &payload, false)
//!         .await?;
//!
//!     if let Some(job_id) = submission.outcome.job_id() {
//!         engine.track_job(job_id, None, Some("DOWNLOAD"), None, None);
//!     }
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod execution;
pub mod monitor;

pub use cache::{CacheStats, ResultCache};
pub use config::EngineConfig;
pub use execution::{ExecutionStore, ExecutionTracker, InMemoryExecutionStore};
pub use monitor::{JobMonitor, MonitorConfig, MonitorError, MonitorStats, TrackedJob};

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gantry_client::{ClientError, JobService, RunnerClient};
use gantry_core::domain::execution::{ExecutionKind, ExecutionRecord};
use gantry_core::domain::job::JobStatus;
use gantry_core::dto::job::SubmitOutcome;
use gantry_core::dto::payload::JobPayload;

/// Errors surfaced by the engine's fallible operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unknown execution: {0}")]
    UnknownExecution(Uuid),
}

/// Combined engine statistics for operator dashboards
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub cache: CacheStats,
    pub monitor: MonitorStats,
    pub remote_healthy: bool,
}

/// Result of a work submission: the execution record created for the attempt
/// plus the remote acknowledgement (job handle or inline result)
#[derive(Debug, Clone)]
pub struct Submission {
    pub record: ExecutionRecord,
    pub outcome: SubmitOutcome,
}

/// One configured instance of the job orchestration services
///
/// Owns the two background tasks (monitor poll loop, cache sweeper) and the
/// shutdown signal that stops them.
pub struct Engine {
    service: Arc<dyn JobService>,
    cache: Arc<ResultCache>,
    monitor: Arc<JobMonitor>,
    tracker: Arc<ExecutionTracker>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds the engine against the configured remote runner service
    pub fn start(config: EngineConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let client = RunnerClient::with_client(&config.remote_url, http)
            .with_retry_policy(config.max_retries, config.retry_base_delay);

        Self::with_service(Arc::new(client), config)
    }

    /// Builds the engine on top of any [`JobService`] implementation
    ///
    /// Used by tests to drive the engine with an in-process fake; production
    /// code normally goes through [`Engine::start`].
    pub fn with_service(service: Arc<dyn JobService>, config: EngineConfig) -> anyhow::Result<Self> {
        Self::with_parts(service, Arc::new(InMemoryExecutionStore::new()), config)
    }

    /// Builds the engine with an explicit execution store backend
    pub fn with_parts(
        service: Arc<dyn JobService>,
        store: Arc<dyn ExecutionStore>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let cache = Arc::new(ResultCache::new(
            config.cache_max_size,
            config.cache_default_ttl,
        ));
        let monitor = Arc::new(JobMonitor::new(
            Arc::clone(&service),
            Arc::clone(&cache),
            MonitorConfig {
                capacity: config.monitor_capacity,
                tick: config.monitor_tick,
                default_max_wait: config.default_max_wait,
                default_poll_interval: config.default_poll_interval,
            },
        ));
        let tracker = Arc::new(ExecutionTracker::new(store));

        // Monitor outcomes drive the execution records. Registered before
        // any caller handler, so records are settled by the time user
        // callbacks observe the event.
        {
            let tracker = Arc::clone(&tracker);
            monitor.on_completion(move |job_id, status| tracker.finish_job(job_id, status));
        }
        {
            let tracker = Arc::clone(&tracker);
            monitor.on_error(move |job_id, error| tracker.fail_job(job_id, error));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            monitor.spawn(shutdown_rx.clone()),
            cache.spawn_sweeper(config.cache_sweep_interval, shutdown_rx),
        ];

        info!("engine started (remote: {})", config.remote_url);

        Ok(Self {
            service,
            cache,
            monitor,
            tracker,
            shutdown,
            tasks,
        })
    }

    // =============================================================================
    // Work Submission
    // =============================================================================

    /// Validates and submits a unit of work, creating its execution record
    ///
    /// The record is created in `RUNNING` before anything goes over the
    /// wire, so validation and submission failures are durably recorded as
    /// failed attempts. Asynchronous submissions return the job handle; pass
    /// the job id to [`Engine::track_job`] to have the monitor drive the
    /// record to its outcome. Synchronous submissions settle the record
    /// immediately from the inline result.
    pub async fn submit_work<P: JobPayload>(
        &self,
        work_item_id: Uuid,
        kind: ExecutionKind,
        payload: &P,
        synchronous: bool,
    ) -> Result<Submission, EngineError> {
        let input = serde_json::to_value(payload).map_err(|e| {
            EngineError::Client(ClientError::Parse(format!(
                "failed to serialize payload: {}",
                e
            )))
        })?;

        let record = self.tracker.begin(work_item_id, kind, input.clone());

        let errors = payload.validate();
        if !errors.is_empty() {
            let err = ClientError::Validation(errors);
            self.tracker.submit_failed(record.id, &err);
            return Err(err.into());
        }

        match self.service.submit(kind.category(), input, synchronous).await {
            Ok(SubmitOutcome::Queued(handle)) => {
                self.tracker.attach_job(record.id, &handle.job_id);
                let record = self.tracker.record(record.id).unwrap_or(record);
                Ok(Submission {
                    record,
                    outcome: SubmitOutcome::Queued(handle),
                })
            }
            Ok(SubmitOutcome::Inline(result)) => {
                self.tracker.complete_inline(record.id, &result);
                let record = self.tracker.record(record.id).unwrap_or(record);
                Ok(Submission {
                    record,
                    outcome: SubmitOutcome::Inline(result),
                })
            }
            Err(err) => {
                self.tracker.submit_failed(record.id, &err);
                Err(err.into())
            }
        }
    }

    /// Hands a job to the monitor; false if already tracked or at capacity
    pub fn track_job(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        category: Option<&str>,
        max_wait: Option<Duration>,
        poll_interval: Option<Duration>,
    ) -> bool {
        self.monitor
            .add(job_id, owner_id, category, max_wait, poll_interval)
    }

    // =============================================================================
    // Status Reads
    // =============================================================================

    /// Cached status only; never touches the remote service
    pub fn cached_status(&self, job_id: &str, owner_id: Option<&str>) -> Option<JobStatus> {
        self.cache.get(job_id, owner_id)
    }

    /// Cached status, falling back to a remote query on a miss
    pub async fn job_status(&self, job_id: &str, owner_id: Option<&str>) -> Option<JobStatus> {
        self.monitor.status(job_id, owner_id).await
    }

    /// Recently cached statuses, newest first
    pub fn recent_statuses(&self, limit: usize) -> Vec<JobStatus> {
        self.cache.recent(limit)
    }

    /// All cached statuses for one work item
    pub fn statuses_by_owner(&self, owner_id: &str) -> Vec<JobStatus> {
        self.cache.by_owner(owner_id)
    }

    // =============================================================================
    // Callbacks
    // =============================================================================

    pub fn on_status_change(&self, handler: impl Fn(&str, &JobStatus) + Send + Sync + 'static) {
        self.monitor.on_status_change(handler);
    }

    pub fn on_completion(&self, handler: impl Fn(&str, &JobStatus) + Send + Sync + 'static) {
        self.monitor.on_completion(handler);
    }

    pub fn on_error(&self, handler: impl Fn(&str, &MonitorError) + Send + Sync + 'static) {
        self.monitor.on_error(handler);
    }

    // =============================================================================
    // Cancellation & Retry
    // =============================================================================

    /// Cancels a job: stops tracking it, asks the remote service to abort it
    /// and settles its execution record as `CANCELLED`
    ///
    /// Returns whether the remote service accepted the cancellation.
    pub async fn cancel_job(&self, job_id: &str, owner_id: Option<&str>) -> bool {
        self.monitor.remove(job_id);
        self.cache.delete(job_id, owner_id);

        let accepted = match self.service.cancel(job_id).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("cancel request for job {} failed: {}", job_id, err);
                false
            }
        };

        if let Some(record_id) = self.tracker.record_for_job(job_id) {
            if let Err(err) = self.tracker.cancel(record_id, Some("cancelled by caller")) {
                debug!("execution for job {} not cancellable: {}", job_id, err);
            }
        }

        accepted
    }

    /// Retries a failed execution
    ///
    /// Creates the next-attempt record (same work item, kind and input,
    /// attempt number incremented) and resubmits it through the client. The
    /// failed record is never mutated. The caller decides whether to track
    /// the new job, exactly as after [`Engine::submit_work`].
    pub async fn retry_execution(&self, record_id: Uuid) -> Result<ExecutionRecord, EngineError> {
        let next = self.tracker.retry(record_id)?;

        match self
            .service
            .submit(next.kind.category(), next.input.clone(), false)
            .await
        {
            Ok(SubmitOutcome::Queued(handle)) => {
                self.tracker.attach_job(next.id, &handle.job_id);
                self.tracker.mark_running(next.id);
                Ok(self.tracker.record(next.id).unwrap_or(next))
            }
            Ok(SubmitOutcome::Inline(result)) => {
                self.tracker.complete_inline(next.id, &result);
                Ok(self.tracker.record(next.id).unwrap_or(next))
            }
            Err(err) => {
                self.tracker.submit_failed(next.id, &err);
                Err(err.into())
            }
        }
    }

    // =============================================================================
    // Execution Reads
    // =============================================================================

    pub fn execution(&self, record_id: Uuid) -> Option<ExecutionRecord> {
        self.tracker.record(record_id)
    }

    pub fn recent_executions(&self, limit: usize) -> Vec<ExecutionRecord> {
        self.tracker.recent(limit)
    }

    /// The attempt chain of one work item, in attempt order
    pub fn executions_for(&self, work_item_id: Uuid) -> Vec<ExecutionRecord> {
        self.tracker.for_work_item(work_item_id)
    }

    // =============================================================================
    // Lifecycle
    // =============================================================================

    /// Cache, monitor and remote-health snapshot
    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.cache.stats(),
            monitor: self.monitor.stats(),
            remote_healthy: self.service.health_check().await,
        }
    }

    /// Stops the background tasks and waits for them to finish
    pub async fn shutdown(self) {
        info!("engine shutting down");
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(err) = task.await {
                warn!("background task terminated abnormally: {}", err);
            }
        }

        info!("engine stopped");
    }
}
