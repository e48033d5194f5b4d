//! Key-value cache of repository status snapshots.
//!
//! Entries are keyed by canonical repository path and hold the last computed
//! result, success or failure. Presence means "last known value", not
//! "current": the invalidator and primer keep entries honest.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::provider::StatusProvider;
use repowatch_daemon_protocol::StatusSnapshot;

/// Monotonic counters describing cache behavior. Monitoring data only; never
/// used for correctness decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub effective_prime_requests: u64,
    pub total_prime_requests: u64,
    pub effective_invalidation_requests: u64,
    pub total_invalidation_requests: u64,
    pub invalidate_all_requests: u64,
}

/// Thread-safe cache of status snapshots, filled through a [`StatusProvider`].
pub struct StatusCache {
    provider: Arc<dyn StatusProvider>,
    entries: Mutex<HashMap<String, Result<StatusSnapshot>>>,

    hits: AtomicU64,
    misses: AtomicU64,
    effective_prime_requests: AtomicU64,
    total_prime_requests: AtomicU64,
    effective_invalidation_requests: AtomicU64,
    total_invalidation_requests: AtomicU64,
    invalidate_all_requests: AtomicU64,
}

impl StatusCache {
    pub fn new(provider: Arc<dyn StatusProvider>) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            effective_prime_requests: AtomicU64::new(0),
            total_prime_requests: AtomicU64::new(0),
            effective_invalidation_requests: AtomicU64::new(0),
            total_invalidation_requests: AtomicU64::new(0),
            invalidate_all_requests: AtomicU64::new(0),
        }
    }

    /// Returns the status for a repository, computing and storing it on a
    /// miss. Failed computations are cached and replayed verbatim.
    ///
    /// The provider runs outside the cache lock, so a slow computation for
    /// one key never blocks lookups of other keys. Two concurrent misses for
    /// the same key may therefore both compute; the last write wins.
    pub fn get_status(&self, repository_path: &str) -> Result<StatusSnapshot> {
        if let Some(entry) = self.lock_entries().get(repository_path) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return entry.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(path = %repository_path, "cache miss, computing status");

        let status = self.provider.compute(repository_path);
        self.lock_entries()
            .insert(repository_path.to_string(), status.clone());
        status
    }

    /// Computes and stores an entry if one is not already present. Used by
    /// the primer to refill entries off the client-request path.
    pub fn prime_entry(&self, repository_path: &str) {
        self.total_prime_requests.fetch_add(1, Ordering::Relaxed);
        if self.lock_entries().contains_key(repository_path) {
            return;
        }

        self.effective_prime_requests.fetch_add(1, Ordering::Relaxed);
        debug!(path = %repository_path, "priming cache entry");

        let status = self.provider.compute(repository_path);
        self.lock_entries()
            .insert(repository_path.to_string(), status);
    }

    /// Removes the entry for a repository. Returns whether one was removed.
    pub fn invalidate_entry(&self, repository_path: &str) -> bool {
        self.total_invalidation_requests
            .fetch_add(1, Ordering::Relaxed);
        let invalidated = self.lock_entries().remove(repository_path).is_some();
        if invalidated {
            self.effective_invalidation_requests
                .fetch_add(1, Ordering::Relaxed);
            debug!(path = %repository_path, "invalidated cache entry");
        }
        invalidated
    }

    /// Clears every entry.
    pub fn invalidate_all(&self) {
        self.invalidate_all_requests.fetch_add(1, Ordering::Relaxed);
        self.lock_entries().clear();
        debug!("invalidated all cache entries");
    }

    /// Best-effort snapshot of the counters; each is read independently.
    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            effective_prime_requests: self.effective_prime_requests.load(Ordering::Relaxed),
            total_prime_requests: self.total_prime_requests.load(Ordering::Relaxed),
            effective_invalidation_requests: self
                .effective_invalidation_requests
                .load(Ordering::Relaxed),
            total_invalidation_requests: self.total_invalidation_requests.load(Ordering::Relaxed),
            invalidate_all_requests: self.invalidate_all_requests.load(Ordering::Relaxed),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Result<StatusSnapshot>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
