//! IPC protocol types and validation for repowatch-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to construct valid requests and decode status payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetStatus,
    GetCacheStatistics,
    InvalidateCacheEntry,
    InvalidateAllCacheEntries,
    GetHealth,
    Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Parameters for methods that address a repository by filesystem path
/// (`get_status`, `invalidate_cache_entry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathParams {
    pub path: String,
}

pub fn parse_path_params(params: Value) -> Result<PathParams, ErrorInfo> {
    let parsed: PathParams = serde_json::from_value(params)
        .map_err(|err| ErrorInfo::new("invalid_params", format!("params are invalid: {}", err)))?;
    if parsed.path.trim().is_empty() {
        return Err(ErrorInfo::new("invalid_params", "path must not be empty"));
    }
    Ok(parsed)
}

/// Ongoing repository operation, derived from the metadata directory
/// (an in-progress rebase, merge, etc.).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoWorkingState {
    #[default]
    Normal,
    Merge,
    Revert,
    RevertSequence,
    CherryPick,
    CherryPickSequence,
    Bisect,
    Rebase,
    RebaseInteractive,
    RebaseMerge,
    ApplyMailbox,
    ApplyMailboxOrRebase,
}

/// A rename recorded in the index or working tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamePair {
    pub old: String,
    pub new: String,
}

/// One stash entry: `index` is the position in the stash list, so clients can
/// render the conventional `stash@{N}` name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashEntry {
    pub index: usize,
    pub short_id: String,
    pub message: String,
}

/// The computed status of one repository at one point in time.
///
/// Immutable once constructed; the cache replaces snapshots wholesale on
/// recomputation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub repository_path: String,
    pub working_directory: String,
    pub state: RepoWorkingState,
    pub branch: String,
    pub upstream: String,
    pub upstream_gone: bool,
    pub ahead_by: usize,
    pub behind_by: usize,
    pub index_added: Vec<String>,
    pub index_modified: Vec<String>,
    pub index_deleted: Vec<String>,
    pub index_type_change: Vec<String>,
    pub index_renamed: Vec<RenamePair>,
    pub working_added: Vec<String>,
    pub working_modified: Vec<String>,
    pub working_deleted: Vec<String>,
    pub working_type_change: Vec<String>,
    pub working_unreadable: Vec<String>,
    pub working_renamed: Vec<RenamePair>,
    pub ignored: Vec<String>,
    pub conflicted: Vec<String>,
    pub stashes: Vec<StashEntry>,
}

/// Cache counters plus request timing, as reported by `get_cache_statistics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatisticsReport {
    pub total_get_status_requests: u64,
    pub average_milliseconds_in_get_status: f64,
    pub minimum_milliseconds_in_get_status: f64,
    pub maximum_milliseconds_in_get_status: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub effective_cache_primes: u64,
    pub total_cache_primes: u64,
    pub effective_cache_invalidations: u64,
    pub total_cache_invalidations: u64,
    pub full_cache_invalidations: u64,
}
