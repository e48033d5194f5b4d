//! Status computation for git repositories.
//!
//! `StatusProvider` is the seam the cache fills misses through; the default
//! implementation reads repositories with libgit2 (`git2`).

use std::path::Path;

use git2::{DiffDelta, ErrorCode, Repository, RepositoryState, Status, StatusOptions};
use tracing::debug;

use crate::error::{Result, StatusError};
use repowatch_daemon_protocol::{RenamePair, RepoWorkingState, StashEntry, StatusSnapshot};

/// Computes repository status snapshots.
pub trait StatusProvider: Send + Sync {
    /// Resolves an arbitrary filesystem path to the canonical repository path
    /// used as the cache key.
    fn discover_repository(&self, path: &Path) -> Result<String>;

    /// Computes a fresh status snapshot for a repository previously resolved
    /// by [`StatusProvider::discover_repository`].
    fn compute(&self, repository_path: &str) -> Result<StatusSnapshot>;
}

/// `StatusProvider` backed by libgit2.
#[derive(Debug, Default)]
pub struct GitStatusProvider;

impl StatusProvider for GitStatusProvider {
    fn discover_repository(&self, path: &Path) -> Result<String> {
        let repo = Repository::discover(path).map_err(|err| match err.code() {
            ErrorCode::NotFound => StatusError::NotARepository {
                path: path.display().to_string(),
            },
            _ => StatusError::RepositoryUnreadable {
                path: path.display().to_string(),
                details: err.message().to_string(),
            },
        })?;
        Ok(repo.path().to_string_lossy().into_owned())
    }

    fn compute(&self, repository_path: &str) -> Result<StatusSnapshot> {
        debug!(path = %repository_path, "computing repository status");

        let mut repo = Repository::open(repository_path).map_err(|err| match err.code() {
            ErrorCode::NotFound => StatusError::NotARepository {
                path: repository_path.to_string(),
            },
            _ => StatusError::RepositoryUnreadable {
                path: repository_path.to_string(),
                details: err.message().to_string(),
            },
        })?;

        let working_directory = repo
            .workdir()
            .ok_or_else(|| StatusError::Computation {
                path: repository_path.to_string(),
                details: "bare repository has no working directory".to_string(),
            })?
            .to_string_lossy()
            .into_owned();

        let mut snapshot = StatusSnapshot {
            repository_path: repo.path().to_string_lossy().into_owned(),
            working_directory,
            state: working_state(repo.state()),
            ..StatusSnapshot::default()
        };

        collect_ref_status(&repo, &mut snapshot)?;
        collect_file_status(&repo, &mut snapshot)?;
        collect_stashes(&mut repo, &mut snapshot)?;

        Ok(snapshot)
    }
}

fn working_state(state: RepositoryState) -> RepoWorkingState {
    match state {
        RepositoryState::Clean => RepoWorkingState::Normal,
        RepositoryState::Merge => RepoWorkingState::Merge,
        RepositoryState::Revert => RepoWorkingState::Revert,
        RepositoryState::RevertSequence => RepoWorkingState::RevertSequence,
        RepositoryState::CherryPick => RepoWorkingState::CherryPick,
        RepositoryState::CherryPickSequence => RepoWorkingState::CherryPickSequence,
        RepositoryState::Bisect => RepoWorkingState::Bisect,
        RepositoryState::Rebase => RepoWorkingState::Rebase,
        RepositoryState::RebaseInteractive => RepoWorkingState::RebaseInteractive,
        RepositoryState::RebaseMerge => RepoWorkingState::RebaseMerge,
        RepositoryState::ApplyMailbox => RepoWorkingState::ApplyMailbox,
        RepositoryState::ApplyMailboxOrRebase => RepoWorkingState::ApplyMailboxOrRebase,
    }
}

fn collect_ref_status(repo: &Repository, snapshot: &mut StatusSnapshot) -> Result<()> {
    match repo.head() {
        Ok(head) => {
            if head.is_branch() {
                snapshot.branch = head.shorthand().unwrap_or("HEAD").to_string();
                if let (Some(refname), Some(local)) = (head.name(), head.target()) {
                    collect_upstream(repo, refname, local, snapshot)?;
                }
            } else {
                // Detached HEAD: report the short commit id instead of a branch.
                snapshot.branch = head
                    .target()
                    .map(|oid| short_id(&oid.to_string()))
                    .unwrap_or_else(|| "HEAD".to_string());
            }
        }
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            // Unborn branch: the name is only recorded in the symbolic HEAD.
            if let Ok(head_ref) = repo.find_reference("HEAD") {
                if let Some(target) = head_ref.symbolic_target() {
                    snapshot.branch = target.trim_start_matches("refs/heads/").to_string();
                }
            }
        }
        Err(err) => {
            return Err(StatusError::Computation {
                path: snapshot.repository_path.clone(),
                details: err.message().to_string(),
            })
        }
    }
    Ok(())
}

fn collect_upstream(
    repo: &Repository,
    refname: &str,
    local: git2::Oid,
    snapshot: &mut StatusSnapshot,
) -> Result<()> {
    let upstream_ref = match repo.branch_upstream_name(refname) {
        Ok(buf) => match buf.as_str() {
            Some(name) => name.to_string(),
            None => return Ok(()),
        },
        // No upstream configured for this branch.
        Err(_) => return Ok(()),
    };

    snapshot.upstream = upstream_ref
        .trim_start_matches("refs/remotes/")
        .to_string();

    match repo.find_reference(&upstream_ref) {
        Ok(reference) => {
            if let Some(upstream) = reference.target() {
                let (ahead, behind) =
                    repo.graph_ahead_behind(local, upstream)
                        .map_err(|err| StatusError::Computation {
                            path: snapshot.repository_path.clone(),
                            details: err.message().to_string(),
                        })?;
                snapshot.ahead_by = ahead;
                snapshot.behind_by = behind;
            }
        }
        // Configured but the ref is gone (e.g. remote branch deleted).
        Err(_) => snapshot.upstream_gone = true,
    }
    Ok(())
}

fn collect_file_status(repo: &Repository, snapshot: &mut StatusSnapshot) -> Result<()> {
    let mut options = StatusOptions::new();
    options
        .include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_ignored(true)
        .include_unreadable(true)
        .renames_head_to_index(true)
        .renames_index_to_workdir(true)
        .exclude_submodules(true);

    let statuses = repo
        .statuses(Some(&mut options))
        .map_err(|err| StatusError::Computation {
            path: snapshot.repository_path.clone(),
            details: err.message().to_string(),
        })?;

    for entry in statuses.iter() {
        let flags = entry.status();
        let path = String::from_utf8_lossy(entry.path_bytes()).into_owned();

        if flags.contains(Status::CONFLICTED) {
            snapshot.conflicted.push(path);
            continue;
        }
        if flags.contains(Status::IGNORED) {
            snapshot.ignored.push(path);
            continue;
        }

        if flags.contains(Status::INDEX_NEW) {
            snapshot.index_added.push(path.clone());
        }
        if flags.contains(Status::INDEX_MODIFIED) {
            snapshot.index_modified.push(path.clone());
        }
        if flags.contains(Status::INDEX_DELETED) {
            snapshot.index_deleted.push(path.clone());
        }
        if flags.contains(Status::INDEX_TYPECHANGE) {
            snapshot.index_type_change.push(path.clone());
        }
        if flags.contains(Status::INDEX_RENAMED) {
            if let Some(pair) = rename_pair(entry.head_to_index()) {
                snapshot.index_renamed.push(pair);
            }
        }

        if flags.contains(Status::WT_NEW) {
            snapshot.working_added.push(path.clone());
        }
        if flags.contains(Status::WT_MODIFIED) {
            snapshot.working_modified.push(path.clone());
        }
        if flags.contains(Status::WT_DELETED) {
            snapshot.working_deleted.push(path.clone());
        }
        if flags.contains(Status::WT_TYPECHANGE) {
            snapshot.working_type_change.push(path.clone());
        }
        if flags.contains(Status::WT_UNREADABLE) {
            snapshot.working_unreadable.push(path.clone());
        }
        if flags.contains(Status::WT_RENAMED) {
            if let Some(pair) = rename_pair(entry.index_to_workdir()) {
                snapshot.working_renamed.push(pair);
            }
        }
    }

    Ok(())
}

fn collect_stashes(repo: &mut Repository, snapshot: &mut StatusSnapshot) -> Result<()> {
    let mut stashes = Vec::new();
    repo.stash_foreach(|index, message, oid| {
        stashes.push(StashEntry {
            index,
            short_id: short_id(&oid.to_string()),
            message: message.to_string(),
        });
        true
    })
    .map_err(|err| StatusError::Computation {
        path: snapshot.repository_path.clone(),
        details: err.message().to_string(),
    })?;
    snapshot.stashes = stashes;
    Ok(())
}

fn rename_pair(delta: Option<DiffDelta<'_>>) -> Option<RenamePair> {
    let delta = delta?;
    let old = delta.old_file().path()?.to_string_lossy().into_owned();
    let new = delta.new_file().path()?.to_string_lossy().into_owned();
    Some(RenamePair { old, new })
}

fn short_id(id: &str) -> String {
    id.chars().take(7).collect()
}
