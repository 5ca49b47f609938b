//! the uncommitted change set
//!
//! Pending changes are tracked per branch, so switching branches switches
//! the pending set too. A detached HEAD gets its own slot; every detached
//! position shares it, which matches the short-lived way detached state
//! is used (inspect, then go back to a branch).

use crate::storage::error::StorageResult;
use crate::storage::kv::Keyspace;
use crate::storage::refs::HeadState;
use crate::storage::types::Change;

/// slot name used while HEAD is detached
const DETACHED_SLOT: &str = "_detached";

/// Per-branch storage of not-yet-committed changes.
pub struct PendingStore {
    keys: Keyspace,
}

impl PendingStore {
    pub fn new(keys: &Keyspace) -> Self {
        Self {
            keys: keys.scoped("pending"),
        }
    }

    fn slot(head: &HeadState) -> &str {
        match head {
            HeadState::Branch(name) => name.as_str(),
            HeadState::Detached(_) => DETACHED_SLOT,
        }
    }

    /// The pending changes for the given head, oldest first.
    pub fn get(&self, head: &HeadState) -> StorageResult<Vec<Change>> {
        Ok(self.keys.get_json(Self::slot(head))?.unwrap_or_default())
    }

    /// Append one change, returning the new pending count.
    pub fn append(&self, head: &HeadState, change: Change) -> StorageResult<usize> {
        let mut changes = self.get(head)?;
        changes.push(change);
        self.keys.put_json(Self::slot(head), &changes)?;
        Ok(changes.len())
    }

    /// Replace the pending set.
    pub fn set(&self, head: &HeadState, changes: &[Change]) -> StorageResult<()> {
        self.keys.put_json(Self::slot(head), &changes)
    }

    /// Drop all pending changes for the given head.
    pub fn clear(&self, head: &HeadState) -> StorageResult<()> {
        self.keys.delete(Self::slot(head))
    }
}
