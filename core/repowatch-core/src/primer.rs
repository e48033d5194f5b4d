//! Background cache priming.
//!
//! Coalesces bursts of invalidations into one recomputation pass per
//! repository, run off the client-request path on a single worker thread.
//!
//! The debounce is additive: every schedule call pushes the shared deadline
//! further out by a fixed increment instead of resetting it relative to
//! "now". A lone change primes once the quiescence window elapses; a burst
//! keeps extending the deadline until the scheduling calls stop arriving.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::cache::StatusCache;

/// Timing knobs for the primer. Defaults match the daemon's baseline; tests
/// shrink them to milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct PrimerConfig {
    /// How far the deadline is pushed after a priming pass (and at startup).
    pub quiescence: Duration,
    /// How much each schedule call extends the deadline.
    pub increment: Duration,
    /// Upper bound on how long the worker sleeps between deadline checks.
    pub poll_interval: Duration,
}

impl Default for PrimerConfig {
    fn default() -> Self {
        Self {
            quiescence: Duration::from_secs(60),
            increment: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
        }
    }
}

struct PrimerState {
    deadline: Instant,
    pending: HashSet<String>,
    stop: bool,
}

struct PrimerShared {
    cache: Arc<StatusCache>,
    config: PrimerConfig,
    state: Mutex<PrimerState>,
    wakeup: Condvar,
}

impl PrimerShared {
    fn lock_state(&self) -> MutexGuard<'_, PrimerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Actively refills invalidated cache entries to reduce misses on client
/// requests. Thread-safe; owns one background worker for its lifetime.
pub struct CachePrimer {
    shared: Arc<PrimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CachePrimer {
    pub fn new(cache: Arc<StatusCache>, config: PrimerConfig) -> Self {
        let shared = Arc::new(PrimerShared {
            cache,
            config,
            state: Mutex::new(PrimerState {
                deadline: Instant::now() + config.quiescence,
                pending: HashSet::new(),
                stop: false,
            }),
            wakeup: Condvar::new(),
        });

        debug!("starting cache priming thread");
        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || run_worker(worker_shared));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Flags a repository for recomputation and extends the deadline by the
    /// configured increment. Callable from any thread, including the watcher
    /// callback thread.
    pub fn schedule_priming(&self, repository_path: &str) {
        let mut state = self.shared.lock_state();
        state.pending.insert(repository_path.to_string());
        state.deadline += self.shared.config.increment;
    }

    /// Signals the worker to stop and joins it. Idempotent; also runs on
    /// drop, so no in-flight recomputation outlives the primer.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock_state();
            state.stop = true;
        }
        self.shared.wakeup.notify_all();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for CachePrimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: Arc<PrimerShared>) {
    debug!("cache priming thread started");
    loop {
        let mut state = shared.lock_state();
        if state.stop {
            break;
        }

        let (guard, _timeout) = match shared
            .wakeup
            .wait_timeout(state, shared.config.poll_interval)
        {
            Ok(pair) => pair,
            Err(poisoned) => poisoned.into_inner(),
        };
        state = guard;
        if state.stop {
            break;
        }

        if state.deadline <= Instant::now() {
            // Capture exactly the repositories flagged so far; schedule calls
            // arriving after the swap land in the next pass.
            let pending = std::mem::take(&mut state.pending);
            drop(state);

            if !pending.is_empty() {
                debug!(count = pending.len(), "priming scheduled repositories");
                for repository_path in &pending {
                    shared.cache.prime_entry(repository_path);
                }
            }

            let mut state = shared.lock_state();
            state.deadline = Instant::now() + shared.config.quiescence;
        }
    }
    debug!("cache priming thread stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::CountingProvider;

    fn fast_config() -> PrimerConfig {
        PrimerConfig {
            quiescence: Duration::from_millis(150),
            increment: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn wait_for_calls(provider: &CountingProvider, expected: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if provider.calls() >= expected {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn single_schedule_primes_once_after_quiescence() {
        let provider = Arc::new(CountingProvider::ok());
        let cache = Arc::new(StatusCache::new(provider.clone()));
        let primer = CachePrimer::new(Arc::clone(&cache), fast_config());

        primer.schedule_priming("/repo/.git");
        thread::sleep(Duration::from_millis(40));
        assert_eq!(provider.calls(), 0, "must not prime before the deadline");

        assert!(wait_for_calls(&provider, 1, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(provider.calls(), 1, "one schedule means one recomputation");
        assert_eq!(cache.statistics().total_prime_requests, 1);
    }

    #[test]
    fn burst_of_schedules_extends_the_deadline_additively() {
        let provider = Arc::new(CountingProvider::ok());
        let cache = Arc::new(StatusCache::new(provider.clone()));
        let started = Instant::now();
        let primer = CachePrimer::new(Arc::clone(&cache), fast_config());

        primer.schedule_priming("/repo/.git");
        primer.schedule_priming("/repo/.git");
        primer.schedule_priming("/repo/.git");

        assert!(wait_for_calls(&provider, 1, Duration::from_secs(5)));
        // quiescence + 3 increments: 150ms + 3 * 50ms.
        assert!(
            started.elapsed() >= Duration::from_millis(300),
            "burst must defer priming by the cumulative extensions"
        );
        thread::sleep(Duration::from_millis(300));
        assert_eq!(provider.calls(), 1, "burst coalesces into one recomputation");
    }

    #[test]
    fn distinct_repositories_prime_in_one_pass() {
        let provider = Arc::new(CountingProvider::ok());
        let cache = Arc::new(StatusCache::new(provider.clone()));
        let primer = CachePrimer::new(Arc::clone(&cache), fast_config());

        primer.schedule_priming("/a/.git");
        primer.schedule_priming("/b/.git");

        assert!(wait_for_calls(&provider, 2, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(300));
        assert_eq!(provider.calls(), 2);
        assert_eq!(cache.statistics().effective_prime_requests, 2);
    }

    #[test]
    fn priming_skips_entries_that_are_already_live() {
        let provider = Arc::new(CountingProvider::ok());
        let cache = Arc::new(StatusCache::new(provider.clone()));
        let primer = CachePrimer::new(Arc::clone(&cache), fast_config());

        cache.get_status("/repo/.git").expect("fill");
        primer.schedule_priming("/repo/.git");

        let deadline = Instant::now() + Duration::from_secs(5);
        while cache.statistics().total_prime_requests == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = cache.statistics();
        assert_eq!(stats.total_prime_requests, 1);
        assert_eq!(stats.effective_prime_requests, 0);
        assert_eq!(provider.calls(), 1, "live entry must not be recomputed");
    }

    #[test]
    fn shutdown_wakes_the_worker_promptly() {
        let provider = Arc::new(CountingProvider::ok());
        let cache = Arc::new(StatusCache::new(provider));
        let config = PrimerConfig {
            poll_interval: Duration::from_secs(30),
            ..PrimerConfig::default()
        };
        let primer = CachePrimer::new(cache, config);

        let started = Instant::now();
        drop(primer);
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "drop must not wait out the poll interval"
        );
    }
}
