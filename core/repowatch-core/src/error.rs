//! Error types for repowatch-core operations.
//!
//! `StatusError` is `Clone` because failed computations are cached and
//! returned to later callers verbatim.

/// All errors that can occur while computing or maintaining status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatusError {
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: String },

    #[error("repository is unreadable: {path}: {details}")]
    RepositoryUnreadable { path: String, details: String },

    #[error("status computation failed: {path}: {details}")]
    Computation { path: String, details: String },

    #[error("failed to watch directory: {path}: {details}")]
    Watch { path: String, details: String },

    #[error("failed to initialize directory watcher: {details}")]
    WatchInit { details: String },
}

impl StatusError {
    /// Stable wire code for the error, used by the daemon's response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            StatusError::NotARepository { .. } => "not_a_repository",
            StatusError::RepositoryUnreadable { .. } => "repository_unreadable",
            StatusError::Computation { .. } => "status_error",
            StatusError::Watch { .. } | StatusError::WatchInit { .. } => "watch_error",
        }
    }
}

/// Convenience type alias for Results using StatusError.
pub type Result<T> = std::result::Result<T, StatusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = StatusError::NotARepository {
            path: "/tmp/nowhere".to_string(),
        };
        assert_eq!(err.code(), "not_a_repository");
        assert!(err.to_string().contains("/tmp/nowhere"));
    }
}
