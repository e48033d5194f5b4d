//! Test support: a scriptable in-memory status provider.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::{Result, StatusError};
use crate::provider::StatusProvider;
use repowatch_daemon_protocol::StatusSnapshot;

/// Counts compute calls; optionally fails or sleeps per key.
pub(crate) struct CountingProvider {
    calls: AtomicUsize,
    fail: bool,
    delays: Mutex<HashMap<String, u64>>,
}

impl CountingProvider {
    pub fn ok() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: false,
            delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok()
        }
    }

    pub fn with_delay_for(self, repository_path: &str, millis: u64) -> Self {
        self.delays
            .lock()
            .expect("delays lock")
            .insert(repository_path.to_string(), millis);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn snapshot_for(repository_path: &str) -> StatusSnapshot {
        let path = Path::new(repository_path);
        let working_directory = if path.ends_with(".git") {
            path.parent().unwrap_or(path).to_string_lossy().into_owned()
        } else {
            repository_path.to_string()
        };
        StatusSnapshot {
            repository_path: repository_path.to_string(),
            working_directory,
            branch: "main".to_string(),
            ..StatusSnapshot::default()
        }
    }
}

impl StatusProvider for CountingProvider {
    fn discover_repository(&self, path: &Path) -> Result<String> {
        Ok(path.to_string_lossy().into_owned())
    }

    fn compute(&self, repository_path: &str) -> Result<StatusSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .delays
            .lock()
            .expect("delays lock")
            .get(repository_path)
            .copied();
        if let Some(millis) = delay {
            thread::sleep(Duration::from_millis(millis));
        }
        if self.fail {
            return Err(StatusError::Computation {
                path: repository_path.to_string(),
                details: "simulated failure".to_string(),
            });
        }
        Ok(Self::snapshot_for(repository_path))
    }
}
