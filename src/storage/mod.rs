//! persistent storage for the version graph
//!
//! Layering, bottom up:
//! - `kv`: the byte-oriented collaborator interface plus the built-in
//!   memory and file backends
//! - `object`: content-addressed, write-once objects over a keyspace
//! - `snapshot`: materialized database state and its on-disk manifest form
//! - `commit`: the immutable graph nodes and history traversal
//! - `refs`: the mutable pointers (branches, tags, HEAD) and the reflog
//!
//! Everything above this module speaks in the types re-exported here.

pub mod commit;
pub mod error;
pub mod kv;
pub mod object;
pub mod refs;
pub mod snapshot;
pub mod types;

pub use commit::{get_commit, history, is_ancestor, Commit, CommitBuilder, HistoryIter};
pub use error::{StorageError, StorageResult};
pub use kv::{FileKv, Keyspace, KvStore, MemoryKv};
pub use object::{hash_bytes, ObjectStore};
pub use refs::{Branch, HeadState, RefAction, RefManager, ReflogEntry, Tag, TagKind};
pub use snapshot::{
    read_snapshot, write_snapshot, ColumnDef, DataTree, SchemaTree, Snapshot, TableData,
    TableSchema,
};
pub use types::{
    Author, BranchName, Change, ChangeOperation, ChangeType, CommitId, ConnectionId,
    InvalidNameError, TagName, TreeId,
};
