//! Engine configuration
//!
//! Defines all configurable parameters for the engine: remote connection
//! settings, retry policy, cache bounds and the monitor's polling cadence.

use std::time::Duration;

/// Engine configuration
///
/// All timeouts and intervals are configurable to allow tuning for different
/// deployment scenarios (dev vs prod, fast vs slow remote runners).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remote runner service base URL (e.g., "http://localhost:8000")
    pub remote_url: String,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// How many retries follow the first attempt for transient failures
    pub max_retries: u32,

    /// Delay unit for the client's linear backoff
    pub retry_base_delay: Duration,

    /// Maximum number of entries the result cache holds
    pub cache_max_size: usize,

    /// Default time-to-live for cached job statuses
    pub cache_default_ttl: Duration,

    /// How often the background sweep removes expired cache entries
    pub cache_sweep_interval: Duration,

    /// Maximum number of jobs tracked concurrently by the monitor
    pub monitor_capacity: usize,

    /// How often the monitor loop wakes to look for due jobs
    pub monitor_tick: Duration,

    /// Default maximum time a tracked job may take before timing out
    pub default_max_wait: Duration,

    /// Default interval between status checks of a tracked job
    pub default_poll_interval: Duration,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            request_timeout: Duration::from_secs(90),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(2),
            cache_max_size: 1000,
            cache_default_ttl: Duration::from_secs(3600),
            cache_sweep_interval: Duration::from_secs(300),
            monitor_capacity: 10,
            monitor_tick: Duration::from_secs(2),
            default_max_wait: Duration::from_secs(300),
            default_poll_interval: Duration::from_secs(5),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - GANTRY_REMOTE_URL (required)
    /// - GANTRY_REQUEST_TIMEOUT (optional, seconds, default: 90)
    /// - GANTRY_MAX_RETRIES (optional, default: 3)
    /// - GANTRY_RETRY_BASE_DELAY (optional, seconds, default: 2)
    /// - GANTRY_CACHE_MAX_SIZE (optional, default: 1000)
    /// - GANTRY_CACHE_TTL (optional, seconds, default: 3600)
    /// - GANTRY_CACHE_SWEEP_INTERVAL (optional, seconds, default: 300)
    /// - GANTRY_MONITOR_CAPACITY (optional, default: 10)
    /// - GANTRY_MONITOR_TICK (optional, seconds, default: 2)
    /// - GANTRY_JOB_MAX_WAIT (optional, seconds, default: 300)
    /// - GANTRY_JOB_POLL_INTERVAL (optional, seconds, default: 5)
    pub fn from_env() -> anyhow::Result<Self> {
        let remote_url = std::env::var("GANTRY_REMOTE_URL")
            .map_err(|_| anyhow::anyhow!("GANTRY_REMOTE_URL environment variable not set"))?;

        let mut config = Self::new(remote_url);

        if let Some(secs) = env_u64("GANTRY_REQUEST_TIMEOUT") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(retries) = env_u64("GANTRY_MAX_RETRIES") {
            config.max_retries = retries as u32;
        }
        if let Some(secs) = env_u64("GANTRY_RETRY_BASE_DELAY") {
            config.retry_base_delay = Duration::from_secs(secs);
        }
        if let Some(size) = env_u64("GANTRY_CACHE_MAX_SIZE") {
            config.cache_max_size = size as usize;
        }
        if let Some(secs) = env_u64("GANTRY_CACHE_TTL") {
            config.cache_default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("GANTRY_CACHE_SWEEP_INTERVAL") {
            config.cache_sweep_interval = Duration::from_secs(secs);
        }
        if let Some(size) = env_u64("GANTRY_MONITOR_CAPACITY") {
            config.monitor_capacity = size as usize;
        }
        if let Some(secs) = env_u64("GANTRY_MONITOR_TICK") {
            config.monitor_tick = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("GANTRY_JOB_MAX_WAIT") {
            config.default_max_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("GANTRY_JOB_POLL_INTERVAL") {
            config.default_poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.remote_url.is_empty() {
            anyhow::bail!("remote_url cannot be empty");
        }

        if !self.remote_url.starts_with("http://") && !self.remote_url.starts_with("https://") {
            anyhow::bail!("remote_url must start with http:// or https://");
        }

        if self.cache_max_size == 0 {
            anyhow::bail!("cache_max_size must be greater than 0");
        }

        if self.cache_sweep_interval.is_zero() {
            anyhow::bail!("cache_sweep_interval must be greater than 0");
        }

        if self.monitor_capacity == 0 {
            anyhow::bail!("monitor_capacity must be greater than 0");
        }

        if self.monitor_tick.is_zero() {
            anyhow::bail!("monitor_tick must be greater than 0");
        }

        if self.default_poll_interval.is_zero() {
            anyhow::bail!("default_poll_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://localhost:8000")
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok())
}
