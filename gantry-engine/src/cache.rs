//! Result cache
//!
//! Bounded, TTL-expiring store of the last known status per job, shielding
//! the remote runner from redundant status polls. Entries expire lazily on
//! read and in bulk through a periodic background sweep; when the cache is
//! full, the entry with the lowest cumulative access count is evicted.
//!
//! All operations go through one mutex around the underlying map. Critical
//! sections are O(1) except the bulk scans (`cleanup_expired`, `recent`,
//! `by_owner`), which stay cheap because the cache is bounded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info};

use gantry_core::domain::job::JobStatus;

/// Default bound on the number of cached entries
pub const DEFAULT_MAX_SIZE: usize = 1000;

/// Default time-to-live of a cached status
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    job_id: String,
    owner_id: Option<String>,
}

struct CacheEntry {
    status: JobStatus,
    created_at: Instant,
    expires_at: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    fn touch(&mut self) {
        self.access_count += 1;
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub expired_entries: usize,
    pub max_size: usize,
    pub usage_percent: f64,
    pub default_ttl_secs: u64,
}

/// Bounded, thread-safe store of recent job statuses
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    max_size: usize,
    default_ttl: Duration,
}

impl ResultCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            default_ttl,
        }
    }

    fn key(job_id: &str, owner_id: Option<&str>) -> CacheKey {
        CacheKey {
            job_id: job_id.to_string(),
            owner_id: owner_id.map(str::to_string),
        }
    }

    /// Returns the cached status, if present and not expired
    ///
    /// Expiry is checked at read time: reading an expired entry deletes it
    /// as a side effect. A hit bumps the entry's access counter. The caller
    /// receives a copy, never a reference into the cache.
    pub fn get(&self, job_id: &str, owner_id: Option<&str>) -> Option<JobStatus> {
        let key = Self::key(job_id, owner_id);
        let mut entries = self.entries.lock().unwrap();

        let expired = match entries.get_mut(&key) {
            Some(entry) if entry.is_expired() => true,
            Some(entry) => {
                entry.touch();
                return Some(entry.status.clone());
            }
            None => return None,
        };

        if expired {
            debug!("cache entry for job {} expired", job_id);
            entries.remove(&key);
        }
        None
    }

    /// Stores a status snapshot
    ///
    /// At capacity, inserting a new key first evicts the entry with the
    /// lowest cumulative access count among the current entries. `ttl`
    /// overrides the cache-wide default for this entry only.
    pub fn set(
        &self,
        job_id: &str,
        mut status: JobStatus,
        owner_id: Option<&str>,
        ttl: Option<Duration>,
    ) {
        if let Some(owner_id) = owner_id {
            status.owner_id = Some(owner_id.to_string());
        }

        let key = Self::key(job_id, owner_id);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Instant::now();

        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.max_size {
            Self::evict_coldest(&mut entries);
        }

        entries.insert(
            key,
            CacheEntry {
                status,
                created_at: now,
                expires_at: now + ttl,
                access_count: 0,
            },
        );
    }

    /// Removes the entry with the lowest access count; a recency/frequency
    /// proxy, not strict LRU.
    fn evict_coldest(entries: &mut HashMap<CacheKey, CacheEntry>) {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_count)
            .map(|(key, _)| key.clone());

        if let Some(key) = victim {
            debug!("evicting job {} from result cache", key.job_id);
            entries.remove(&key);
        }
    }

    /// Removes an entry; true if one was present
    pub fn delete(&self, job_id: &str, owner_id: Option<&str>) -> bool {
        let key = Self::key(job_id, owner_id);
        self.entries.lock().unwrap().remove(&key).is_some()
    }

    /// Whether a live (non-expired) entry exists for the key
    ///
    /// Delegates to `get`, so it triggers lazy expiry like any read.
    pub fn exists(&self, job_id: &str, owner_id: Option<&str>) -> bool {
        self.get(job_id, owner_id).is_some()
    }

    /// Scans all entries and removes those past expiry; returns the count
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();

        if removed > 0 {
            info!("removed {} expired entries from result cache", removed);
        }
        removed
    }

    /// Live statuses ordered by entry creation time, newest first
    pub fn recent(&self, limit: usize) -> Vec<JobStatus> {
        let entries = self.entries.lock().unwrap();
        let mut live: Vec<&CacheEntry> =
            entries.values().filter(|entry| !entry.is_expired()).collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        live.into_iter()
            .take(limit)
            .map(|entry| entry.status.clone())
            .collect()
    }

    /// All live statuses annotated with the given owner, unordered
    pub fn by_owner(&self, owner_id: &str) -> Vec<JobStatus> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|(key, entry)| {
                key.owner_id.as_deref() == Some(owner_id) && !entry.is_expired()
            })
            .map(|(_, entry)| entry.status.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
        info!("result cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock().unwrap();
        let total = entries.len();
        let expired = entries.values().filter(|entry| entry.is_expired()).count();

        CacheStats {
            entries: total,
            expired_entries: expired,
            max_size: self.max_size,
            usage_percent: (total as f64 / self.max_size as f64) * 100.0,
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }

    /// Starts the periodic sweep task
    ///
    /// One dedicated task removes expired entries every `interval`,
    /// independent of any caller. The task exits when the shutdown channel
    /// flips to true (or its sender is dropped), so tests and graceful
    /// shutdown can stop and join it deterministically.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            debug!("cache sweeper started (interval: {:?})", interval);
            let mut ticker = time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cache.cleanup_expired();
                    }
                    result = shutdown.changed() => {
                        if result.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("cache sweeper stopped");
        })
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }
}
