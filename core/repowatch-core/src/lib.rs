//! # repowatch-core
//!
//! Core library for repowatch: a status cache for source-control working
//! copies, kept warm by filesystem-event invalidation and debounced
//! background re-priming.
//!
//! ## Design Principles
//!
//! - **Synchronous**: no async runtime; background work runs on dedicated
//!   threads (watcher callback thread, primer thread).
//! - **Thread-safe at the seams**: the cache, invalidator, and primer are all
//!   safe to call from any thread.
//! - **Failures are values**: a failed status computation is cached and
//!   replayed to callers verbatim; nothing here is fatal to the process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use repowatch_core::{GitStatusProvider, PrimerConfig, StatusService};
//! use std::sync::Arc;
//!
//! let service = StatusService::new(Arc::new(GitStatusProvider), PrimerConfig::default())?;
//! let snapshot = service.get_status(std::path::Path::new("/some/repo"))?;
//! ```

pub mod cache;
pub mod error;
pub mod invalidator;
pub mod primer;
pub mod provider;
pub mod service;
pub mod watcher;

#[cfg(test)]
mod testutil;

pub use cache::{CacheStatistics, StatusCache};
pub use error::{Result, StatusError};
pub use invalidator::CacheInvalidator;
pub use primer::{CachePrimer, PrimerConfig};
pub use provider::{GitStatusProvider, StatusProvider};
pub use service::{ShutdownSignal, StatusService};
pub use watcher::{DirectoryWatcher, FileAction, WatchToken};

// Re-export the wire types the cache stores, so embedders only need this crate.
pub use repowatch_daemon_protocol::{RenamePair, RepoWorkingState, StashEntry, StatusSnapshot};
