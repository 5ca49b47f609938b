//! attribution of table state to commits
//!
//! Blame answers "which commit last touched this table". It walks history
//! newest first along first parents and stops at the first commit whose
//! change list names the target. Merge commits carry no changes of their
//! own, so attribution lands on real work, not on the merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::commit::HistoryIter;
use crate::storage::error::StorageResult;
use crate::storage::object::ObjectStore;
use crate::storage::types::{Author, Change, CommitId};

/// Who last touched a table, if anyone in reachable history did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlameOutcome {
    Attributed {
        commit_id: CommitId,
        author: Author,
        timestamp: DateTime<Utc>,
        /// the change within that commit that touched the table
        change: Change,
    },
    /// no commit in reachable history names the table
    Unattributed,
}

impl BlameOutcome {
    pub fn is_attributed(&self) -> bool {
        matches!(self, BlameOutcome::Attributed { .. })
    }
}

/// Find the most recent commit touching `target`, starting at `from`.
pub fn blame(store: &ObjectStore, from: CommitId, target: &str) -> StorageResult<BlameOutcome> {
    for commit in HistoryIter::new(store, from) {
        let commit = commit?;
        if let Some(change) = commit.changes.iter().find(|c| c.touches(target)) {
            return Ok(BlameOutcome::Attributed {
                commit_id: commit.id,
                author: commit.author,
                timestamp: commit.timestamp,
                change: change.clone(),
            });
        }
    }
    Ok(BlameOutcome::Unattributed)
}

/// Every commit touching `target`, newest first, up to `limit`.
pub fn blame_log(
    store: &ObjectStore,
    from: CommitId,
    target: &str,
    limit: Option<usize>,
) -> StorageResult<Vec<CommitId>> {
    let mut hits = Vec::new();
    for commit in HistoryIter::new(store, from) {
        let commit = commit?;
        if commit.changes.iter().any(|c| c.touches(target)) {
            hits.push(commit.id);
            if limit.is_some_and(|n| hits.len() >= n) {
                break;
            }
        }
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::CommitBuilder;
    use crate::storage::kv::{Keyspace, MemoryKv};
    use crate::storage::snapshot::{write_snapshot, Snapshot};
    use crate::storage::types::ChangeOperation;
    use std::sync::Arc;

    fn setup() -> ObjectStore {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn");
        ObjectStore::new(&keys)
    }

    fn commit_touching(
        store: &ObjectStore,
        parent: Option<&CommitId>,
        table: Option<&str>,
        msg: &str,
    ) -> CommitId {
        let tree = write_snapshot(store, &Snapshot::empty()).unwrap();
        let changes = table
            .map(|t| vec![Change::schema(ChangeOperation::Alter, t, None)])
            .unwrap_or_default();
        let mut builder = CommitBuilder::new(store)
            .tree(tree)
            .message(msg)
            .changes(changes);
        if let Some(p) = parent {
            builder = builder.parent(p.clone());
        }
        builder.commit().unwrap().id
    }

    #[test]
    fn test_attributes_most_recent_toucher() {
        let store = setup();
        let a = commit_touching(&store, None, Some("users"), "create users");
        let b = commit_touching(&store, Some(&a), Some("users"), "alter users");
        let c = commit_touching(&store, Some(&b), Some("orders"), "create orders");

        match blame(&store, c, "users").unwrap() {
            BlameOutcome::Attributed { commit_id, .. } => assert_eq!(commit_id, b),
            BlameOutcome::Unattributed => panic!("expected attribution"),
        }
    }

    #[test]
    fn test_unattributed_table() {
        let store = setup();
        let a = commit_touching(&store, None, Some("users"), "create users");

        let outcome = blame(&store, a, "ghost").unwrap();
        assert_eq!(outcome, BlameOutcome::Unattributed);
    }

    #[test]
    fn test_skips_untouching_commits() {
        let store = setup();
        let a = commit_touching(&store, None, Some("users"), "create users");
        let b = commit_touching(&store, Some(&a), None, "merge");

        match blame(&store, b, "users").unwrap() {
            BlameOutcome::Attributed { commit_id, change, .. } => {
                assert_eq!(commit_id, a);
                assert_eq!(change.target, "users");
            }
            BlameOutcome::Unattributed => panic!("expected attribution"),
        }
    }

    #[test]
    fn test_blame_log_orders_and_limits() {
        let store = setup();
        let a = commit_touching(&store, None, Some("users"), "one");
        let b = commit_touching(&store, Some(&a), Some("orders"), "two");
        let c = commit_touching(&store, Some(&b), Some("users"), "three");

        let hits = blame_log(&store, c.clone(), "users", None).unwrap();
        assert_eq!(hits, vec![c.clone(), a]);

        let limited = blame_log(&store, c.clone(), "users", Some(1)).unwrap();
        assert_eq!(limited, vec![c]);
    }
}
