//! Job monitor
//!
//! Tracks a bounded working set of in-flight remote jobs and advances each
//! one to a terminal outcome without caller intervention. A single loop task
//! wakes on a short tick and, for every tracked job whose poll interval has
//! elapsed, checks the timeout budget, queries the remote status, writes the
//! result into the cache and fires the registered callbacks. A failure while
//! checking one job never interrupts the others.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use gantry_client::JobService;
use gantry_core::domain::job::{JobState, JobStatus};

use crate::cache::ResultCache;

/// Why the monitor gave up on a tracked job
///
/// Handed to error callbacks as a tagged value so consumers can distinguish
/// a timeout from a failed status check without parsing message strings.
#[derive(Debug, Clone, Error)]
pub enum MonitorError {
    /// The job did not reach a terminal state within its max-wait budget
    #[error("job did not reach a terminal state within {waited:?}")]
    Timeout { waited: Duration },

    /// The status query failed after the client exhausted its retries
    #[error("status check failed: {0}")]
    Check(String),
}

/// Monitor tuning knobs
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Maximum number of jobs tracked at once
    pub capacity: usize,
    /// How often the loop wakes to look for due jobs
    pub tick: Duration,
    /// Max-wait applied when `add` is called without one
    pub default_max_wait: Duration,
    /// Poll interval applied when `add` is called without one
    pub default_poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            tick: Duration::from_secs(2),
            default_max_wait: Duration::from_secs(300),
            default_poll_interval: Duration::from_secs(5),
        }
    }
}

/// Monitor-internal record of a job being polled
#[derive(Debug, Clone)]
pub struct TrackedJob {
    pub job_id: String,
    pub owner_id: Option<String>,
    pub category: Option<String>,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub started_at: Instant,
    pub last_checked: Option<Instant>,
    pub last_state: JobState,
    pub last_progress: u8,
}

impl TrackedJob {
    fn is_due(&self) -> bool {
        match self.last_checked {
            Some(checked) => checked.elapsed() >= self.poll_interval,
            None => true,
        }
    }
}

/// Point-in-time monitor statistics
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub active_jobs: usize,
    pub capacity: usize,
    pub avg_tracked_secs: f64,
    pub status_handlers: usize,
    pub completion_handlers: usize,
    pub error_handlers: usize,
}

type StatusHandler = Arc<dyn Fn(&str, &JobStatus) + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&str, &MonitorError) + Send + Sync>;

/// Background poller for in-flight remote jobs
pub struct JobMonitor {
    service: Arc<dyn JobService>,
    cache: Arc<ResultCache>,
    config: MonitorConfig,
    jobs: Mutex<HashMap<String, TrackedJob>>,
    status_handlers: Mutex<Vec<StatusHandler>>,
    completion_handlers: Mutex<Vec<StatusHandler>>,
    error_handlers: Mutex<Vec<ErrorHandler>>,
}

impl JobMonitor {
    pub fn new(service: Arc<dyn JobService>, cache: Arc<ResultCache>, config: MonitorConfig) -> Self {
        Self {
            service,
            cache,
            config,
            jobs: Mutex::new(HashMap::new()),
            status_handlers: Mutex::new(Vec::new()),
            completion_handlers: Mutex::new(Vec::new()),
            error_handlers: Mutex::new(Vec::new()),
        }
    }

    /// Starts tracking a job; false if it is already tracked or the working
    /// set is at capacity. Being full is an expected steady-state condition,
    /// not an error.
    pub fn add(
        &self,
        job_id: &str,
        owner_id: Option<&str>,
        category: Option<&str>,
        max_wait: Option<Duration>,
        poll_interval: Option<Duration>,
    ) -> bool {
        let mut jobs = self.jobs.lock().unwrap();

        if jobs.contains_key(job_id) {
            warn!("job {} is already tracked", job_id);
            return false;
        }

        if jobs.len() >= self.config.capacity {
            warn!(
                "tracked-set capacity reached ({}), refusing job {}",
                self.config.capacity, job_id
            );
            return false;
        }

        jobs.insert(
            job_id.to_string(),
            TrackedJob {
                job_id: job_id.to_string(),
                owner_id: owner_id.map(str::to_string),
                category: category.map(str::to_string),
                max_wait: max_wait.unwrap_or(self.config.default_max_wait),
                poll_interval: poll_interval.unwrap_or(self.config.default_poll_interval),
                started_at: Instant::now(),
                last_checked: None,
                last_state: JobState::Pending,
                last_progress: 0,
            },
        );

        info!("tracking job {}", job_id);
        true
    }

    /// Stops tracking a job; true if it was tracked
    ///
    /// Effective for subsequent ticks. A status check already underway for
    /// the job may still finish and write one final cache entry; that
    /// overwrite is harmless.
    pub fn remove(&self, job_id: &str) -> bool {
        let removed = self.jobs.lock().unwrap().remove(job_id).is_some();
        if removed {
            info!("stopped tracking job {}", job_id);
        }
        removed
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.jobs.lock().unwrap().contains_key(job_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Snapshot of the working set
    pub fn active_jobs(&self) -> Vec<TrackedJob> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    // =============================================================================
    // Callback Registration
    // =============================================================================

    /// Registers a handler fired on every observed status update
    pub fn on_status_change(&self, handler: impl Fn(&str, &JobStatus) + Send + Sync + 'static) {
        self.status_handlers.lock().unwrap().push(Arc::new(handler));
    }

    /// Registers a handler fired once when a job reaches COMPLETED or FAILED
    pub fn on_completion(&self, handler: impl Fn(&str, &JobStatus) + Send + Sync + 'static) {
        self.completion_handlers
            .lock()
            .unwrap()
            .push(Arc::new(handler));
    }

    /// Registers a handler fired when the monitor gives up on a job
    pub fn on_error(&self, handler: impl Fn(&str, &MonitorError) + Send + Sync + 'static) {
        self.error_handlers.lock().unwrap().push(Arc::new(handler));
    }

    // =============================================================================
    // Polling
    // =============================================================================

    /// Starts the poll loop task
    ///
    /// The task exits when the shutdown channel flips to true (or its sender
    /// is dropped), so it can be stopped and joined deterministically.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            info!("job monitor started (tick: {:?})", monitor.config.tick);
            let mut ticker = time::interval(monitor.config.tick);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.poll_once().await;
                    }
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("job monitor stopped");
        })
    }

    /// One poll iteration over every due job, one job after another
    ///
    /// Jobs are processed sequentially, so callbacks for a single job id are
    /// strictly ordered. No ordering is guaranteed across job ids.
    pub(crate) async fn poll_once(&self) {
        let due: Vec<TrackedJob> = {
            let jobs = self.jobs.lock().unwrap();
            jobs.values().filter(|job| job.is_due()).cloned().collect()
        };

        for job in due {
            self.check_job(job).await;
        }
    }

    async fn check_job(&self, job: TrackedJob) {
        let job_id = job.job_id.as_str();

        // Timeout budget first; an exceeded job is never queried again.
        if job.started_at.elapsed() >= job.max_wait {
            if self.remove(job_id) {
                warn!("job {} timed out after {:?}", job_id, job.max_wait);
                self.fire_error(job_id, &MonitorError::Timeout { waited: job.max_wait });
            }
            return;
        }

        let mut status = match self.service.query_status(job_id).await {
            Ok(status) => status,
            Err(err) => {
                // This job is done for; the others keep polling.
                if self.remove(job_id) {
                    warn!("status check for job {} failed: {}", job_id, err);
                    self.fire_error(job_id, &MonitorError::Check(err.to_string()));
                }
                return;
            }
        };

        status.owner_id = job.owner_id.clone();
        if status.category.is_empty() {
            if let Some(category) = &job.category {
                status.category = category.clone();
            }
        }

        {
            let mut jobs = self.jobs.lock().unwrap();
            if let Some(tracked) = jobs.get_mut(job_id) {
                tracked.last_checked = Some(Instant::now());
                // Progress never moves backwards while we track the job.
                status.progress = status.progress.max(tracked.last_progress);
                tracked.last_progress = status.progress;
                tracked.last_state = status.state;
            }
        }

        debug!(
            "job {}: {:?} ({}%)",
            job_id, status.state, status.progress
        );

        // May land after an explicit remove; idempotent overwrite.
        self.cache
            .set(job_id, status.clone(), job.owner_id.as_deref(), None);

        self.fire_status(job_id, &status);

        if status.is_terminal() && self.remove(job_id) {
            info!("job {} finished with state {:?}", job_id, status.state);
            self.fire_completion(job_id, &status);
        }
    }

    /// Last known status: cache first, remote on a miss
    ///
    /// A fresh remote answer is written back into the cache.
    pub async fn status(&self, job_id: &str, owner_id: Option<&str>) -> Option<JobStatus> {
        if let Some(status) = self.cache.get(job_id, owner_id) {
            return Some(status);
        }

        match self.service.query_status(job_id).await {
            Ok(status) => {
                self.cache.set(job_id, status.clone(), owner_id, None);
                Some(status)
            }
            Err(err) => {
                warn!("failed to fetch status for job {}: {}", job_id, err);
                None
            }
        }
    }

    pub fn stats(&self) -> MonitorStats {
        let jobs = self.jobs.lock().unwrap();
        let active = jobs.len();

        let avg_tracked_secs = if active > 0 {
            let total: f64 = jobs
                .values()
                .map(|job| job.started_at.elapsed().as_secs_f64())
                .sum();
            total / active as f64
        } else {
            0.0
        };

        MonitorStats {
            active_jobs: active,
            capacity: self.config.capacity,
            avg_tracked_secs,
            status_handlers: self.status_handlers.lock().unwrap().len(),
            completion_handlers: self.completion_handlers.lock().unwrap().len(),
            error_handlers: self.error_handlers.lock().unwrap().len(),
        }
    }

    // =============================================================================
    // Callback Dispatch
    // =============================================================================

    fn fire_status(&self, job_id: &str, status: &JobStatus) {
        let handlers = self.status_handlers.lock().unwrap().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(job_id, status))).is_err() {
                warn!("status handler panicked for job {}", job_id);
            }
        }
    }

    fn fire_completion(&self, job_id: &str, status: &JobStatus) {
        let handlers = self.completion_handlers.lock().unwrap().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(job_id, status))).is_err() {
                warn!("completion handler panicked for job {}", job_id);
            }
        }
    }

    fn fire_error(&self, job_id: &str, error: &MonitorError) {
        let handlers = self.error_handlers.lock().unwrap().clone();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(job_id, error))).is_err() {
                warn!("error handler panicked for job {}", job_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gantry_client::error::{ClientError, Result as ClientResult};
    use gantry_core::domain::log::LogEntry;
    use gantry_core::dto::job::SubmitOutcome;
    use serde_json::{Value, json};
    use std::collections::VecDeque;

    /// Scripted stand-in for the remote service: each job id has a queue of
    /// replies; the last one repeats once the queue runs dry.
    #[derive(Default)]
    struct FakeJobService {
        replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
        queries: Mutex<HashMap<String, usize>>,
    }

    #[derive(Clone)]
    enum ScriptedReply {
        Status(JobStatus),
        Error(u16),
    }

    impl FakeJobService {
        fn script(&self, job_id: &str, replies: Vec<ScriptedReply>) {
            self.replies
                .lock()
                .unwrap()
                .insert(job_id.to_string(), replies.into());
        }

        fn query_count(&self, job_id: &str) -> usize {
            self.queries
                .lock()
                .unwrap()
                .get(job_id)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl JobService for FakeJobService {
        async fn submit(
            &self,
            _category: &str,
            _payload: Value,
            _synchronous: bool,
        ) -> ClientResult<SubmitOutcome> {
            Err(ClientError::Remote {
                status: 500,
                body: "submit not scripted".to_string(),
            })
        }

        async fn query_status(&self, job_id: &str) -> ClientResult<JobStatus> {
            *self
                .queries
                .lock()
                .unwrap()
                .entry(job_id.to_string())
                .or_insert(0) += 1;

            let mut replies = self.replies.lock().unwrap();
            let queue = replies
                .get_mut(job_id)
                .ok_or_else(|| ClientError::NotFound(format!("job {}", job_id)))?;

            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };

            match reply {
                Some(ScriptedReply::Status(status)) => Ok(status),
                Some(ScriptedReply::Error(code)) => Err(ClientError::Remote {
                    status: code,
                    body: "scripted failure".to_string(),
                }),
                None => Err(ClientError::NotFound(format!("job {}", job_id))),
            }
        }

        async fn cancel(&self, _job_id: &str) -> ClientResult<bool> {
            Ok(true)
        }

        async fn fetch_logs(&self, _job_id: &str) -> ClientResult<Vec<LogEntry>> {
            Ok(Vec::new())
        }

        async fn list_jobs(&self, _limit: usize) -> ClientResult<Vec<JobStatus>> {
            Ok(Vec::new())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn running(job_id: &str, progress: u8) -> ScriptedReply {
        ScriptedReply::Status(JobStatus {
            job_id: job_id.to_string(),
            category: String::new(),
            owner_id: None,
            state: JobState::Running,
            progress,
            result: None,
            error: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
        })
    }

    fn completed(job_id: &str, result: Value) -> ScriptedReply {
        ScriptedReply::Status(JobStatus {
            job_id: job_id.to_string(),
            category: String::new(),
            owner_id: None,
            state: JobState::Completed,
            progress: 100,
            result: Some(result),
            error: None,
            created_at: None,
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
        })
    }

    fn monitor_with(service: Arc<FakeJobService>, capacity: usize) -> Arc<JobMonitor> {
        let config = MonitorConfig {
            capacity,
            tick: Duration::from_millis(10),
            default_max_wait: Duration::from_secs(60),
            default_poll_interval: Duration::ZERO,
        };
        Arc::new(JobMonitor::new(
            service,
            Arc::new(ResultCache::default()),
            config,
        ))
    }

    #[test]
    fn test_add_refuses_duplicate_tracking() {
        let monitor = monitor_with(Arc::new(FakeJobService::default()), 10);

        assert!(monitor.add("J1", None, None, None, None));
        assert!(!monitor.add("J1", None, None, None, None));
        assert_eq!(monitor.tracked_count(), 1);
    }

    #[test]
    fn test_add_refuses_beyond_capacity() {
        let monitor = monitor_with(Arc::new(FakeJobService::default()), 2);

        assert!(monitor.add("J1", None, None, None, None));
        assert!(monitor.add("J2", None, None, None, None));
        assert!(!monitor.add("J3", None, None, None, None));
        assert_eq!(monitor.tracked_count(), 2);
    }

    #[test]
    fn test_remove() {
        let monitor = monitor_with(Arc::new(FakeJobService::default()), 10);

        monitor.add("J1", None, None, None, None);
        assert!(monitor.remove("J1"));
        assert!(!monitor.remove("J1"));
        assert!(!monitor.is_tracked("J1"));
    }

    #[tokio::test]
    async fn test_job_advances_to_completion_and_leaves_the_set() {
        let service = Arc::new(FakeJobService::default());
        service.script(
            "J1",
            vec![
                running("J1", 40),
                completed("J1", json!({"artifact_url": "https://files.example/a.pdf"})),
            ],
        );

        let monitor = monitor_with(Arc::clone(&service), 10);
        let completions: Arc<Mutex<Vec<JobStatus>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let completions = Arc::clone(&completions);
            monitor.on_completion(move |_, status| {
                completions.lock().unwrap().push(status.clone());
            });
        }

        monitor.add("J1", Some("W1"), Some("DOWNLOAD"), None, Some(Duration::ZERO));

        monitor.poll_once().await;
        assert!(monitor.is_tracked("J1"));
        assert_eq!(monitor.cache.get("J1", Some("W1")).unwrap().progress, 40);

        monitor.poll_once().await;
        assert!(!monitor.is_tracked("J1"));
        let completions = completions.lock().unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].state, JobState::Completed);
        assert_eq!(completions[0].owner_id.as_deref(), Some("W1"));
        assert_eq!(completions[0].category, "DOWNLOAD");

        // Terminal exclusivity: no further queries once the job left the set.
        let queries_after = service.query_count("J1");
        monitor.poll_once().await;
        assert_eq!(service.query_count("J1"), queries_after);
    }

    #[tokio::test]
    async fn test_timeout_fires_error_without_querying() {
        let service = Arc::new(FakeJobService::default());
        service.script("J1", vec![running("J1", 10)]);

        let monitor = monitor_with(Arc::clone(&service), 10);
        let errors: Arc<Mutex<Vec<MonitorError>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            monitor.on_error(move |_, error| {
                errors.lock().unwrap().push(error.clone());
            });
        }

        monitor.add("J1", None, None, Some(Duration::ZERO), Some(Duration::ZERO));
        monitor.poll_once().await;

        assert!(!monitor.is_tracked("J1"));
        assert_eq!(service.query_count("J1"), 0);
        let errors = errors.lock().unwrap();
        assert!(matches!(errors[0], MonitorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_check_failure_is_isolated_per_job() {
        let service = Arc::new(FakeJobService::default());
        service.script("BAD", vec![ScriptedReply::Error(502)]);
        service.script("GOOD", vec![running("GOOD", 20)]);

        let monitor = monitor_with(Arc::clone(&service), 10);
        let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let errors = Arc::clone(&errors);
            monitor.on_error(move |job_id, _| {
                errors.lock().unwrap().push(job_id.to_string());
            });
        }

        monitor.add("BAD", None, None, None, Some(Duration::ZERO));
        monitor.add("GOOD", None, None, None, Some(Duration::ZERO));
        monitor.poll_once().await;

        assert!(!monitor.is_tracked("BAD"));
        assert!(monitor.is_tracked("GOOD"));
        assert_eq!(errors.lock().unwrap().as_slice(), ["BAD"]);
        assert_eq!(service.query_count("GOOD"), 1);
    }

    #[tokio::test]
    async fn test_progress_never_moves_backwards() {
        let service = Arc::new(FakeJobService::default());
        service.script("J1", vec![running("J1", 40), running("J1", 10)]);

        let monitor = monitor_with(Arc::clone(&service), 10);
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            monitor.on_status_change(move |_, status| {
                seen.lock().unwrap().push(status.progress);
            });
        }

        monitor.add("J1", None, None, None, Some(Duration::ZERO));
        monitor.poll_once().await;
        monitor.poll_once().await;

        assert_eq!(seen.lock().unwrap().as_slice(), [40, 40]);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_dispatch() {
        let service = Arc::new(FakeJobService::default());
        service.script("J1", vec![running("J1", 50)]);

        let monitor = monitor_with(Arc::clone(&service), 10);
        monitor.on_status_change(|_, _| panic!("handler bug"));
        let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            monitor.on_status_change(move |_, status| {
                seen.lock().unwrap().push(status.progress);
            });
        }

        monitor.add("J1", None, None, None, Some(Duration::ZERO));
        monitor.poll_once().await;

        // The panic was contained and later handlers still ran.
        assert_eq!(seen.lock().unwrap().as_slice(), [50]);
        assert!(monitor.is_tracked("J1"));
    }

    #[tokio::test]
    async fn test_status_falls_back_to_remote_and_fills_cache() {
        let service = Arc::new(FakeJobService::default());
        service.script("J1", vec![running("J1", 30)]);

        let monitor = monitor_with(Arc::clone(&service), 10);

        let status = monitor.status("J1", Some("W1")).await.unwrap();
        assert_eq!(status.progress, 30);
        assert_eq!(service.query_count("J1"), 1);

        // Second read is served from the cache.
        let again = monitor.status("J1", Some("W1")).await.unwrap();
        assert_eq!(again.progress, 30);
        assert_eq!(service.query_count("J1"), 1);
    }

    #[tokio::test]
    async fn test_spawned_loop_stops_on_shutdown() {
        let service = Arc::new(FakeJobService::default());
        let monitor = monitor_with(service, 10);

        let (tx, rx) = watch::channel(false);
        let handle = monitor.spawn(rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
