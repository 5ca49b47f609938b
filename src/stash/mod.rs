//! stashing of uncommitted change sets
//!
//! A stash entry shelves the pending change list so the working state can
//! move (checkout, merge) without committing. Entry ids carry a
//! monotonic sequence prefix, so lexicographic key order is creation
//! order and "latest" is just the last key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use ulid::Ulid;

use crate::storage::error::StorageResult;
use crate::storage::kv::Keyspace;
use crate::storage::types::{BranchName, Change, CommitId};

/// A shelved set of pending changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StashEntry {
    pub id: String,
    /// the branch the changes were shelved from
    pub branch: BranchName,
    /// the branch head at the time of shelving
    pub base_commit: CommitId,
    pub changes: Vec<Change>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// LIFO store of stash entries for one connection.
pub struct StashManager {
    keys: Keyspace,
    limit: Option<usize>,
}

impl StashManager {
    /// Create a stash manager over a connection's keyspace.
    ///
    /// With a `limit`, saving beyond it evicts the oldest entry.
    pub fn new(keys: &Keyspace, limit: Option<usize>) -> Self {
        Self {
            keys: keys.scoped("stash"),
            limit,
        }
    }

    fn next_seq(&self) -> StorageResult<u64> {
        // sequence continues past removals, so ids never collide
        Ok(self
            .keys
            .list("")?
            .last()
            .and_then(|id| id.split('-').next())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|n| n + 1)
            .unwrap_or(0))
    }

    /// Shelve a change set, returning the new entry.
    pub fn save(
        &self,
        branch: BranchName,
        base_commit: CommitId,
        changes: Vec<Change>,
        message: Option<String>,
    ) -> StorageResult<StashEntry> {
        let entry = StashEntry {
            id: format!("{:010}-{}", self.next_seq()?, Ulid::new()),
            branch,
            base_commit,
            changes,
            message,
            created_at: Utc::now(),
        };
        self.keys.put_json(&entry.id, &entry)?;
        debug!(id = %entry.id, count = entry.changes.len(), "stash save");

        if let Some(limit) = self.limit {
            let mut ids = self.keys.list("")?;
            while ids.len() > limit {
                let oldest = ids.remove(0);
                self.keys.delete(&oldest)?;
                debug!(id = %oldest, "stash evicted");
            }
        }
        Ok(entry)
    }

    /// Fetch an entry by id, or the most recent one when `id` is `None`.
    pub fn entry(&self, id: Option<&str>) -> StorageResult<Option<StashEntry>> {
        match id {
            Some(id) => self.keys.get_json(id),
            None => match self.keys.list("")?.last() {
                Some(latest) => self.keys.get_json(latest),
                None => Ok(None),
            },
        }
    }

    /// All entries, newest first.
    pub fn list(&self) -> StorageResult<Vec<StashEntry>> {
        let mut entries = Vec::new();
        for id in self.keys.list("")? {
            if let Some(entry) = self.keys.get_json::<StashEntry>(&id)? {
                entries.push(entry);
            }
        }
        entries.reverse();
        Ok(entries)
    }

    /// Drop an entry. Returns whether it existed.
    pub fn remove(&self, id: &str) -> StorageResult<bool> {
        let existed = self.keys.contains(id)?;
        if existed {
            self.keys.delete(id)?;
            debug!(id = %id, "stash drop");
        }
        Ok(existed)
    }

    /// Number of stashed entries.
    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.keys.list("")?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }
}
