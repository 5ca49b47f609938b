//! Storage layer error types
//!
//! All errors that can occur during storage operations are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages.

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// a content-addressed object was not found
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the requested branch was not found
    #[error("branch not found: {0}")]
    BranchNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// delete attempted on a protected branch without force
    #[error("branch is protected: {0}")]
    ProtectedBranch(String),

    /// delete attempted on the currently checked-out branch
    #[error("branch is checked out: {0}")]
    BranchCheckedOut(String),

    /// the requested tag was not found
    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// tag already exists
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// invalid branch/tag/connection name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// stored bytes failed an integrity check
    #[error("corrupted data at {key}: {reason}")]
    CorruptedData { key: String, reason: String },

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (filesystem-backed stores)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::BranchNotFound(_)
                | StorageError::TagNotFound(_)
        )
    }

    /// check if this error is a name collision
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::BranchAlreadyExists(_) | StorageError::TagAlreadyExists(_)
        )
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
