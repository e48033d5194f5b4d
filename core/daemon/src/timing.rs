//! Request timing statistics for status lookups.
//!
//! Kept separate from the cache counters: these measure the client-facing
//! request path, lock-protected on their own so statistics reads never touch
//! the cache lock.

use std::sync::RwLock;
use std::time::Duration;

const NANOS_PER_MILLISECOND: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingSnapshot {
    pub total_calls: u64,
    pub average_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug)]
struct TimingState {
    total_calls: u64,
    total_nanos: u128,
    min_nanos: u128,
    max_nanos: u128,
}

#[derive(Debug)]
pub struct RequestTimings {
    inner: RwLock<TimingState>,
}

impl Default for RequestTimings {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTimings {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(TimingState {
                total_calls: 0,
                total_nanos: 0,
                min_nanos: u128::MAX,
                max_nanos: 0,
            }),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let mut state = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let nanos = elapsed.as_nanos();
        state.total_calls += 1;
        state.total_nanos += nanos;
        state.min_nanos = state.min_nanos.min(nanos);
        state.max_nanos = state.max_nanos.max(nanos);
    }

    pub fn snapshot(&self) -> TimingSnapshot {
        let state = self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.total_calls == 0 {
            return TimingSnapshot::default();
        }
        TimingSnapshot {
            total_calls: state.total_calls,
            average_ms: (state.total_nanos / state.total_calls as u128) as f64
                / NANOS_PER_MILLISECOND,
            min_ms: state.min_nanos as f64 / NANOS_PER_MILLISECOND,
            max_ms: state.max_nanos as f64 / NANOS_PER_MILLISECOND,
        }
    }
}
