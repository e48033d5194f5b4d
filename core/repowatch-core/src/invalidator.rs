//! Event-driven cache invalidation.
//!
//! Subscribes each repository's working directory and metadata directory to
//! the directory watcher, filters out noisy changes, invalidates the matching
//! cache entry, and schedules debounced re-priming.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::cache::StatusCache;
use crate::error::Result;
use crate::primer::{CachePrimer, PrimerConfig};
use crate::watcher::{DirectoryWatcher, FileAction, WatchToken};
use repowatch_daemon_protocol::StatusSnapshot;

/// Invalidates cache entries in response to filesystem changes.
/// Thread-safe; owns the primer and the watcher.
pub struct CacheInvalidator {
    state: Arc<InvalidatorState>,
    watcher: DirectoryWatcher,
}

struct InvalidatorState {
    cache: Arc<StatusCache>,
    primer: CachePrimer,
    tokens: Mutex<HashMap<WatchToken, String>>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<StatusCache>, primer_config: PrimerConfig) -> Result<Self> {
        let state = Arc::new(InvalidatorState {
            primer: CachePrimer::new(Arc::clone(&cache), primer_config),
            cache,
            tokens: Mutex::new(HashMap::new()),
        });

        let callback_state = Arc::clone(&state);
        let watcher = DirectoryWatcher::new(
            move |token, path, action| callback_state.handle_file_change(token, path, action),
            || {
                warn!(
                    "change notifications were lost; cached status may be stale \
                     until the next invalidation or request"
                )
            },
        )?;

        Ok(Self { state, watcher })
    }

    /// Registers the snapshot's working directory and metadata directory for
    /// change monitoring. Idempotent per repository. A directory that cannot
    /// be watched is reported but does not affect the other registration or
    /// any other repository.
    pub fn monitor_repository_directories(&self, snapshot: &StatusSnapshot) -> Result<()> {
        let mut outcome = Ok(());
        for directory in [
            snapshot.working_directory.as_str(),
            snapshot.repository_path.as_str(),
        ] {
            if directory.is_empty() {
                continue;
            }
            match self.watcher.add_directory(Path::new(directory)) {
                Ok(token) => {
                    self.state
                        .lock_tokens()
                        .insert(token, snapshot.repository_path.clone());
                }
                Err(err) => {
                    warn!(
                        directory = %directory,
                        error = %err,
                        "failed to monitor repository directory"
                    );
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    /// Stops the owned primer's worker thread. Idempotent.
    pub fn shutdown(&self) {
        self.state.primer.shutdown();
    }

    #[cfg(test)]
    fn watched_token_count(&self) -> usize {
        self.state.lock_tokens().len()
    }
}

impl InvalidatorState {
    fn handle_file_change(&self, token: WatchToken, path: &Path, action: FileAction) {
        let repository_path = match self.lock_tokens().get(&token) {
            Some(repository_path) => repository_path.clone(),
            // A change for a token we never registered; nothing to do.
            None => return,
        };

        if should_ignore_file_change(path) {
            trace!(path = %path.display(), "ignoring noisy file change");
            return;
        }

        debug!(
            path = %path.display(),
            ?action,
            repository = %repository_path,
            "file change invalidates repository status"
        );
        self.cache.invalidate_entry(&repository_path);
        self.primer.schedule_priming(&repository_path);
    }

    fn lock_tokens(&self) -> MutexGuard<'_, HashMap<WatchToken, String>> {
        self.tokens
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Noise filter for change notifications. False negatives merely cost an
/// extra recomputation; false positives delay freshness until the next
/// request, so the list stays short and conservative.
pub fn should_ignore_file_change(path: &Path) -> bool {
    let file_name = match path.file_name().and_then(|name| name.to_str()) {
        Some(name) => name,
        None => return false,
    };

    // Lock files: index.lock, packed-refs.lock, shallow.lock, ...
    if file_name.ends_with(".lock") {
        return true;
    }

    // Editor and tooling scratch files.
    if file_name.ends_with('~')
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || file_name.ends_with(".swx")
        || file_name.starts_with(".#")
    {
        return true;
    }

    // Object-store writes always come paired with a ref or index update, so
    // the object directory itself is churn.
    let mut components = path.components();
    while let Some(component) = components.next() {
        if component.as_os_str() == ".git" {
            if let Some(next) = components.next() {
                if next.as_os_str() == "objects" {
                    return true;
                }
            }
            break;
        }
    }

    false
}
