//! End-to-end flow over real directories: a request fills the cache and
//! registers watches, a file change invalidates the entry, and the primer
//! refills it after the debounce quiesces.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use repowatch_core::{PrimerConfig, StatusProvider, StatusService, StatusSnapshot};
use tempfile::TempDir;

/// Provider bound to one on-disk fixture directory.
struct FixtureProvider {
    root: PathBuf,
    calls: AtomicUsize,
}

impl FixtureProvider {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            calls: AtomicUsize::new(0),
        }
    }

    fn key(&self) -> String {
        self.root.join(".git").to_string_lossy().into_owned()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StatusProvider for FixtureProvider {
    fn discover_repository(&self, _path: &Path) -> repowatch_core::Result<String> {
        Ok(self.key())
    }

    fn compute(&self, repository_path: &str) -> repowatch_core::Result<StatusSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(StatusSnapshot {
            repository_path: repository_path.to_string(),
            working_directory: self.root.to_string_lossy().into_owned(),
            branch: "main".to_string(),
            ..StatusSnapshot::default()
        })
    }
}

fn fast_config() -> PrimerConfig {
    PrimerConfig {
        quiescence: Duration::from_millis(150),
        increment: Duration::from_millis(30),
        poll_interval: Duration::from_millis(10),
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn working_tree_change_invalidates_then_reprimes() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join(".git")).expect("mkdir .git");

    let provider = Arc::new(FixtureProvider::new(dir.path()));
    let service =
        StatusService::new(Arc::clone(&provider) as Arc<dyn StatusProvider>, fast_config())
            .expect("service");

    service.get_status(dir.path()).expect("initial request");
    assert_eq!(provider.calls(), 1);

    // Let the watch registrations settle before generating events.
    thread::sleep(Duration::from_millis(100));
    fs::write(dir.path().join("file.txt"), "change").expect("write");

    assert!(
        wait_until(Duration::from_secs(10), || provider.calls() >= 2),
        "primer must recompute after the change quiesces"
    );
    // Allow any straggler events to coalesce into a final pass.
    thread::sleep(Duration::from_millis(500));

    let stats = service.statistics();
    assert!(stats.effective_invalidation_requests >= 1);
    assert_eq!(stats.misses, 1, "re-priming must not show up as misses");

    service.get_status(dir.path()).expect("warm request");
    let stats = service.statistics();
    assert!(stats.hits >= 1, "request after priming is served from cache");
}

#[test]
fn lock_file_churn_leaves_the_cache_warm() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join(".git")).expect("mkdir .git");

    let provider = Arc::new(FixtureProvider::new(dir.path()));
    let service =
        StatusService::new(Arc::clone(&provider) as Arc<dyn StatusProvider>, fast_config())
            .expect("service");

    service.get_status(dir.path()).expect("initial request");
    thread::sleep(Duration::from_millis(100));

    fs::write(dir.path().join(".git/index.lock"), "").expect("write lock");
    thread::sleep(Duration::from_millis(500));

    let stats = service.statistics();
    assert_eq!(stats.total_invalidation_requests, 0);
    assert_eq!(provider.calls(), 1, "lock file churn must not recompute");
}
