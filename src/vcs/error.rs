//! engine-level error types
//!
//! Storage and adapter errors pass through; the variants added here are
//! the preconditions only the facade can check (detached HEAD, empty
//! pending set, unknown connection).

use thiserror::Error;

use crate::adapter::AdapterError;
use crate::storage::error::StorageError;
use crate::storage::types::InvalidNameError;

/// the main error type for engine operations
#[derive(Debug, Error)]
pub enum VcsError {
    /// error from the storage layer
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// error from the database adapter
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// invalid branch/tag/connection name supplied by the caller
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// no engine registered under this connection id
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// the requested stash entry does not exist
    #[error("stash entry not found: {0}")]
    StashNotFound(String),

    /// commit or stash attempted with no pending changes
    #[error("nothing to commit")]
    NothingToCommit,

    /// the source branch is already reachable from the target
    #[error("already up to date with {0}")]
    NothingToMerge(String),

    /// bisect range where the good commit is not an ancestor of the bad
    #[error("{good} is not an ancestor of {bad}")]
    NotAncestor { good: String, bad: String },

    /// a branch-mutating operation attempted while HEAD is detached
    #[error("HEAD is detached; checkout a branch first")]
    DetachedHead,

    /// a revision string that names no branch, tag, or commit
    #[error("invalid revision: {0}")]
    InvalidRevision(String),
}

impl VcsError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        match self {
            VcsError::Storage(e) => e.is_not_found(),
            VcsError::ConnectionNotFound(_)
            | VcsError::StashNotFound(_)
            | VcsError::InvalidRevision(_) => true,
            _ => false,
        }
    }

    /// check if this error is a name collision
    pub fn is_conflict(&self) -> bool {
        matches!(self, VcsError::Storage(e) if e.is_conflict())
    }
}

/// result type alias for engine operations
pub type VcsResult<T> = Result<T, VcsError>;
