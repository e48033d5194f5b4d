//! Top-level coordinator wiring the cache, invalidator, and primer together.
//!
//! Ownership is one-directional: the service owns the cache and the
//! invalidator (which owns the primer and the watcher); the invalidator and
//! primer hold non-owning `Arc` references to the cache.

use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};

use tracing::warn;

use crate::cache::{CacheStatistics, StatusCache};
use crate::error::Result;
use crate::invalidator::CacheInvalidator;
use crate::primer::PrimerConfig;
use crate::provider::StatusProvider;
use repowatch_daemon_protocol::StatusSnapshot;

/// Cooperative "shutdown requested" flag, observable from any thread.
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Clone for ShutdownSignal {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    pub fn request(&self) {
        let (flag, wakeup) = &*self.inner;
        let mut requested = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *requested = true;
        wakeup.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        let (flag, _) = &*self.inner;
        *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Blocks until shutdown is requested.
    pub fn wait(&self) {
        let (flag, wakeup) = &*self.inner;
        let mut requested = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        while !*requested {
            requested = wakeup
                .wait(requested)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }
}

/// Services status requests against the cache and registers repositories for
/// monitoring as they are first seen.
pub struct StatusService {
    provider: Arc<dyn StatusProvider>,
    cache: Arc<StatusCache>,
    invalidator: CacheInvalidator,
    shutdown: ShutdownSignal,
}

impl StatusService {
    pub fn new(provider: Arc<dyn StatusProvider>, primer_config: PrimerConfig) -> Result<Self> {
        let cache = Arc::new(StatusCache::new(Arc::clone(&provider)));
        let invalidator = CacheInvalidator::new(Arc::clone(&cache), primer_config)?;
        Ok(Self {
            provider,
            cache,
            invalidator,
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Resolves the repository containing `path` and returns its status,
    /// cached or freshly computed. Successful lookups register the
    /// repository's directories for change monitoring; a registration
    /// failure degrades freshness, not the response.
    pub fn get_status(&self, path: &Path) -> Result<StatusSnapshot> {
        let repository_path = self.provider.discover_repository(path)?;
        let snapshot = self.cache.get_status(&repository_path)?;
        if let Err(err) = self.invalidator.monitor_repository_directories(&snapshot) {
            warn!(error = %err, "monitoring registration failed; status stays request-driven");
        }
        Ok(snapshot)
    }

    /// Invalidates the cache entry for the repository containing `path`.
    /// Returns whether an entry was removed.
    pub fn invalidate(&self, path: &Path) -> Result<bool> {
        let repository_path = self.provider.discover_repository(path)?;
        Ok(self.cache.invalidate_entry(&repository_path))
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.cache.statistics()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Joins the background workers. Called once the shutdown signal fires;
    /// dropping the service does the same.
    pub fn stop_background_workers(&self) {
        self.invalidator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusError;
    use crate::testutil::CountingProvider;
    use std::thread;
    use std::time::Duration;

    fn service_with(provider: Arc<CountingProvider>) -> StatusService {
        StatusService::new(provider, PrimerConfig::default()).expect("service")
    }

    #[test]
    fn repeated_requests_hit_the_cache() {
        let provider = Arc::new(CountingProvider::ok());
        let service = service_with(provider.clone());

        let first = service.get_status(Path::new("/repo")).expect("first");
        let second = service.get_status(Path::new("/repo")).expect("second");
        assert_eq!(first, second);
        assert_eq!(provider.calls(), 1);

        let stats = service.statistics();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn invalidate_resolves_through_discovery() {
        let provider = Arc::new(CountingProvider::ok());
        let service = service_with(provider.clone());

        service.get_status(Path::new("/repo")).expect("fill");
        assert!(service.invalidate(Path::new("/repo")).expect("invalidate"));
        assert!(!service.invalidate(Path::new("/repo")).expect("second"));

        service.get_status(Path::new("/repo")).expect("recompute");
        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn invalidate_all_clears_independent_repositories() {
        let provider = Arc::new(CountingProvider::ok());
        let service = service_with(provider.clone());

        service.get_status(Path::new("/a")).expect("a");
        service.get_status(Path::new("/b")).expect("b");
        service.invalidate_all();
        service.get_status(Path::new("/a")).expect("a again");
        service.get_status(Path::new("/b")).expect("b again");
        assert_eq!(provider.calls(), 4);
    }

    #[test]
    fn provider_failures_surface_verbatim() {
        let provider = Arc::new(CountingProvider::failing());
        let service = service_with(provider.clone());

        let err = service.get_status(Path::new("/repo")).unwrap_err();
        assert!(matches!(err, StatusError::Computation { .. }));
        let again = service.get_status(Path::new("/repo")).unwrap_err();
        assert_eq!(err, again);
        assert_eq!(provider.calls(), 1, "failure must be served from cache");
    }

    #[test]
    fn shutdown_signal_wakes_waiters() {
        let signal = ShutdownSignal::new();
        assert!(!signal.is_requested());

        let waiter_signal = signal.clone();
        let waiter = thread::spawn(move || waiter_signal.wait());
        thread::sleep(Duration::from_millis(50));
        signal.request();

        waiter.join().expect("waiter joins");
        assert!(signal.is_requested());
    }
}
