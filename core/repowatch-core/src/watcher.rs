//! Directory change monitoring.
//!
//! Wraps the OS notification backend (`notify`) behind the token-based
//! interface the invalidator consumes: register a directory, get back an
//! opaque token, and receive `(token, path, action)` callbacks on one
//! dedicated callback thread. Backend errors and rescan signals surface as a
//! distinct "events lost" callback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, trace, warn};

use crate::error::{Result, StatusError};

/// Identifies one registered directory. Passed back with each notification.
pub type WatchToken = u32;

/// Action that triggered a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Added,
    Removed,
    Modified,
    RenamedFrom,
    RenamedTo,
    Unknown,
}

#[derive(Default)]
struct Registrations {
    directories: HashMap<PathBuf, WatchToken>,
    next_token: WatchToken,
}

/// Monitors directories for changes and delivers notifications by callback.
/// Thread-safe; callbacks are always invoked on the same thread.
pub struct DirectoryWatcher {
    backend: Mutex<Option<RecommendedWatcher>>,
    registrations: Arc<Mutex<Registrations>>,
    callback_thread: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    pub fn new<C, L>(on_change: C, on_events_lost: L) -> Result<Self>
    where
        C: Fn(WatchToken, &Path, FileAction) + Send + 'static,
        L: Fn() + Send + 'static,
    {
        let (sender, receiver) = channel();
        let backend = RecommendedWatcher::new(
            move |result: std::result::Result<Event, notify::Error>| {
                let _ = sender.send(result);
            },
            Config::default(),
        )
        .map_err(|err| StatusError::WatchInit {
            details: err.to_string(),
        })?;

        let registrations = Arc::new(Mutex::new(Registrations::default()));
        let thread_registrations = Arc::clone(&registrations);
        let callback_thread = thread::spawn(move || {
            run_callbacks(receiver, thread_registrations, on_change, on_events_lost);
        });

        Ok(Self {
            backend: Mutex::new(Some(backend)),
            registrations,
            callback_thread: Mutex::new(Some(callback_thread)),
        })
    }

    /// Registers a directory (recursively) for change notifications.
    /// Registering the same directory again returns the existing token.
    pub fn add_directory(&self, path: &Path) -> Result<WatchToken> {
        // Event paths arrive as real paths; register the canonical form so
        // prefix matching holds when the caller's path contains symlinks.
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let path = path.as_path();

        let mut registrations = lock(&self.registrations);
        if let Some(token) = registrations.directories.get(path) {
            return Ok(*token);
        }

        let mut backend = self
            .backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let watcher = backend.as_mut().ok_or_else(|| StatusError::Watch {
            path: path.display().to_string(),
            details: "watcher is shut down".to_string(),
        })?;
        watcher
            .watch(path, RecursiveMode::Recursive)
            .map_err(|err| StatusError::Watch {
                path: path.display().to_string(),
                details: err.to_string(),
            })?;

        let token = registrations.next_token;
        registrations.next_token += 1;
        registrations.directories.insert(path.to_path_buf(), token);
        debug!(path = %path.display(), token, "watching directory");
        Ok(token)
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        // Dropping the backend closes the event channel, which ends the
        // callback thread's receive loop.
        self.backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let handle = self
            .callback_thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn lock(registrations: &Arc<Mutex<Registrations>>) -> MutexGuard<'_, Registrations> {
    registrations
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_callbacks<C, L>(
    receiver: Receiver<std::result::Result<Event, notify::Error>>,
    registrations: Arc<Mutex<Registrations>>,
    on_change: C,
    on_events_lost: L,
) where
    C: Fn(WatchToken, &Path, FileAction),
    L: Fn(),
{
    debug!("watcher callback thread started");
    while let Ok(result) = receiver.recv() {
        match result {
            Ok(event) => {
                if event.need_rescan() {
                    warn!("notification backend requested rescan; events were lost");
                    on_events_lost();
                }
                dispatch_event(&event, &registrations, &on_change);
            }
            Err(err) => {
                warn!(error = %err, "notification backend error; treating as lost events");
                on_events_lost();
            }
        }
    }
    debug!("watcher callback thread stopping");
}

fn dispatch_event<C>(event: &Event, registrations: &Arc<Mutex<Registrations>>, on_change: &C)
where
    C: Fn(WatchToken, &Path, FileAction),
{
    if matches!(event.kind, EventKind::Access(_)) {
        return;
    }

    // A paired rename carries [from, to] in one event.
    if matches!(
        event.kind,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
    ) && event.paths.len() == 2
    {
        deliver(registrations, on_change, &event.paths[0], FileAction::RenamedFrom);
        deliver(registrations, on_change, &event.paths[1], FileAction::RenamedTo);
        return;
    }

    let action = action_for(&event.kind);
    for path in &event.paths {
        deliver(registrations, on_change, path, action);
    }
}

fn deliver<C>(
    registrations: &Arc<Mutex<Registrations>>,
    on_change: &C,
    path: &Path,
    action: FileAction,
) where
    C: Fn(WatchToken, &Path, FileAction),
{
    let token = resolve_token(&lock(registrations), path);
    match token {
        Some(token) => on_change(token, path, action),
        None => trace!(path = %path.display(), "change outside registered directories"),
    }
}

/// Resolves a changed path to the registration that covers it. With nested
/// registrations the longest (most specific) match wins.
fn resolve_token(registrations: &Registrations, path: &Path) -> Option<WatchToken> {
    registrations
        .directories
        .iter()
        .filter(|(directory, _)| path.starts_with(directory))
        .max_by_key(|(directory, _)| directory.as_os_str().len())
        .map(|(_, token)| *token)
}

fn action_for(kind: &EventKind) -> FileAction {
    match kind {
        EventKind::Create(_) => FileAction::Added,
        EventKind::Remove(_) => FileAction::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileAction::RenamedFrom,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileAction::RenamedTo,
        EventKind::Modify(_) => FileAction::Modified,
        _ => FileAction::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn same_directory_keeps_its_token() {
        let dir = TempDir::new().expect("tempdir");
        let watcher = DirectoryWatcher::new(|_, _, _| {}, || {}).expect("watcher");

        let first = watcher.add_directory(dir.path()).expect("first");
        let second = watcher.add_directory(dir.path()).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_directories_get_distinct_tokens() {
        let a = TempDir::new().expect("tempdir a");
        let b = TempDir::new().expect("tempdir b");
        let watcher = DirectoryWatcher::new(|_, _, _| {}, || {}).expect("watcher");

        let token_a = watcher.add_directory(a.path()).expect("a");
        let token_b = watcher.add_directory(b.path()).expect("b");
        assert_ne!(token_a, token_b);
    }

    #[test]
    fn missing_directory_fails_to_register() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("not-here");
        let watcher = DirectoryWatcher::new(|_, _, _| {}, || {}).expect("watcher");

        let err = watcher.add_directory(&missing).unwrap_err();
        assert!(matches!(err, StatusError::Watch { .. }));
    }

    #[test]
    fn nested_registrations_resolve_to_the_most_specific() {
        let mut registrations = Registrations::default();
        registrations
            .directories
            .insert(PathBuf::from("/repo"), 1);
        registrations
            .directories
            .insert(PathBuf::from("/repo/.git"), 2);

        assert_eq!(
            resolve_token(&registrations, Path::new("/repo/src/main.rs")),
            Some(1)
        );
        assert_eq!(
            resolve_token(&registrations, Path::new("/repo/.git/HEAD")),
            Some(2)
        );
        assert_eq!(resolve_token(&registrations, Path::new("/elsewhere")), None);
    }

    #[test]
    fn rename_actions_map_from_event_kinds() {
        assert_eq!(
            action_for(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            FileAction::RenamedFrom
        );
        assert_eq!(
            action_for(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            FileAction::RenamedTo
        );
        assert_eq!(
            action_for(&EventKind::Modify(ModifyKind::Data(
                notify::event::DataChange::Content
            ))),
            FileAction::Modified
        );
    }

    #[test]
    fn file_changes_reach_the_callback_with_the_right_token() {
        let dir = TempDir::new().expect("tempdir");
        let (sender, receiver) = mpsc::channel();
        let watcher = DirectoryWatcher::new(
            move |token, path, action| {
                let _ = sender.send((token, path.to_path_buf(), action));
            },
            || {},
        )
        .expect("watcher");

        let token = watcher.add_directory(dir.path()).expect("register");
        fs::write(dir.path().join("file.txt"), "change").expect("write");

        let (seen_token, seen_path, _action) = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("change notification");
        assert_eq!(seen_token, token);
        let canonical = fs::canonicalize(dir.path()).expect("canonicalize");
        assert!(seen_path.starts_with(&canonical));
    }
}
