//! best-effort rollback against the tracked database
//!
//! Rolling back never rewrites history. The coordinator:
//! 1. collects the commits between the branch head and the target
//! 2. synthesizes inverse statements for their changes, newest first
//! 3. executes the executable ones through the adapter, continuing past
//!    failures and recording everything
//! 4. writes a compensation commit whose tree is the target's snapshot
//!    and moves the branch onto it
//!
//! The report tells the caller exactly which statements ran, which were
//! skipped, and which failed, so manual repair starts from facts.

pub mod inverse;

use tracing::{debug, warn};

use crate::adapter::{ConnectionHandle, DatabaseAdapter};
use crate::storage::commit::{get_commit, history, CommitBuilder};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::object::ObjectStore;
use crate::storage::refs::{RefAction, RefManager};
use crate::storage::snapshot::{read_snapshot, write_snapshot};
use crate::storage::types::{Author, BranchName, Change, CommitId};

use inverse::{synthesize, Inverse};

/// Per-statement timeout used when the caller does not override it.
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 30_000;

/// Where to roll back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackTarget {
    /// a specific commit on the branch's first-parent history
    Commit(CommitId),
    /// n commits before the branch head (`Offset(1)` undoes the head)
    Offset(usize),
}

/// A change whose inverse could not be executed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedInverse {
    pub change: Change,
    pub reason: String,
}

/// A synthesized statement the database rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStatement {
    pub sql: String,
    pub error: String,
}

/// Full account of one rollback or revert.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub target_commit: CommitId,
    /// absent when there was nothing to undo
    pub compensation_commit: Option<CommitId>,
    pub executed: Vec<String>,
    pub skipped: Vec<SkippedInverse>,
    pub failed: Vec<FailedStatement>,
}

impl RollbackReport {
    /// Whether every change was undone by an executed statement.
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }
}

struct UndoRun<'a> {
    adapter: &'a dyn DatabaseAdapter,
    handle: &'a ConnectionHandle,
    timeout_ms: u64,
    executed: Vec<String>,
    skipped: Vec<SkippedInverse>,
    failed: Vec<FailedStatement>,
    undone: Vec<Change>,
}

impl<'a> UndoRun<'a> {
    fn new(adapter: &'a dyn DatabaseAdapter, handle: &'a ConnectionHandle, timeout_ms: u64) -> Self {
        Self {
            adapter,
            handle,
            timeout_ms,
            executed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            undone: Vec::new(),
        }
    }

    /// Undo one commit's changes in reverse application order.
    fn undo_changes(&mut self, changes: &[Change]) {
        for change in changes.iter().rev() {
            match synthesize(change) {
                Inverse::Statement(sql) => {
                    match self.adapter.execute_query(self.handle, &sql, self.timeout_ms) {
                        Ok(_) => {
                            debug!(sql = %sql, "rollback statement executed");
                            self.executed.push(sql);
                        }
                        Err(e) => {
                            warn!(sql = %sql, error = %e, "rollback statement failed, continuing");
                            self.failed.push(FailedStatement {
                                sql,
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Inverse::Placeholder(hint) => {
                    self.skipped.push(SkippedInverse {
                        change: change.clone(),
                        reason: hint,
                    });
                }
                Inverse::Unrecoverable(reason) => {
                    self.skipped.push(SkippedInverse {
                        change: change.clone(),
                        reason,
                    });
                }
            }
            self.undone.push(change.as_rollback());
        }
    }
}

/// Roll a branch back to an earlier commit.
///
/// The branch ends up on a new compensation commit whose tree equals the
/// target's, with one rollback record per undone change. Rolling back to
/// the current head is a no-op.
#[allow(clippy::too_many_arguments)]
pub fn rollback(
    store: &ObjectStore,
    refs: &RefManager,
    adapter: &dyn DatabaseAdapter,
    handle: &ConnectionHandle,
    branch: &BranchName,
    target: RollbackTarget,
    author: Author,
    timeout_ms: u64,
) -> StorageResult<RollbackReport> {
    let head = refs.get_branch(branch)?.head;
    let log = history(store, head.clone(), None)?;

    let index = match &target {
        RollbackTarget::Commit(id) => log
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| StorageError::CommitNotFound(id.to_string()))?,
        RollbackTarget::Offset(n) => {
            if *n >= log.len() {
                return Err(StorageError::CommitNotFound(format!("HEAD~{}", n)));
            }
            *n
        }
    };
    let target_commit = &log[index];

    if index == 0 {
        return Ok(RollbackReport {
            target_commit: target_commit.id.clone(),
            compensation_commit: None,
            executed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        });
    }

    let mut run = UndoRun::new(adapter, handle, timeout_ms);
    for commit in &log[..index] {
        run.undo_changes(&commit.changes);
    }

    let message = format!(
        "Rollback to: {} ({})",
        target_commit.summary(),
        target_commit.id.short()
    );
    let compensation = CommitBuilder::new(store)
        .tree(target_commit.tree_id.clone())
        .parent(head)
        .message(message.clone())
        .author(author)
        .changes(run.undone)
        .commit()?;

    refs.update_branch(branch, compensation.id.clone(), RefAction::Rollback, message)?;
    debug!(
        branch = %branch,
        target = %target_commit.id.short(),
        executed = run.executed.len(),
        skipped = run.skipped.len(),
        failed = run.failed.len(),
        "rollback complete"
    );

    Ok(RollbackReport {
        target_commit: target_commit.id.clone(),
        compensation_commit: Some(compensation.id),
        executed: run.executed,
        skipped: run.skipped,
        failed: run.failed,
    })
}

/// Undo a single commit without touching the commits after it.
///
/// The reverted commit's tables are restored to their state in its first
/// parent; everything else keeps the branch head's state.
pub fn revert(
    store: &ObjectStore,
    refs: &RefManager,
    adapter: &dyn DatabaseAdapter,
    handle: &ConnectionHandle,
    branch: &BranchName,
    commit_id: &CommitId,
    author: Author,
    timeout_ms: u64,
) -> StorageResult<RollbackReport> {
    let head = refs.get_branch(branch)?.head;
    let target = get_commit(store, commit_id)?;

    let mut run = UndoRun::new(adapter, handle, timeout_ms);
    run.undo_changes(&target.changes);

    // restore only the reverted commit's tables, from its parent's tree
    let mut snapshot = read_snapshot(store, &get_commit(store, &head)?.tree_id)?;
    let parent_snapshot = match target.first_parent() {
        Some(parent) => read_snapshot(store, &get_commit(store, parent)?.tree_id)?,
        None => Default::default(),
    };
    let mut tables: Vec<&str> = target
        .changes
        .iter()
        .map(|c| c.table_name.as_deref().unwrap_or(c.target.as_str()))
        .collect();
    tables.sort();
    tables.dedup();
    for table in tables {
        snapshot.set_table_from(table, &parent_snapshot);
    }
    let tree = write_snapshot(store, &snapshot)?;

    let message = format!("Revert: {} ({})", target.summary(), target.id.short());
    let compensation = CommitBuilder::new(store)
        .tree(tree)
        .parent(head)
        .message(message.clone())
        .author(author)
        .changes(run.undone)
        .commit()?;

    refs.update_branch(branch, compensation.id.clone(), RefAction::Rollback, message)?;

    Ok(RollbackReport {
        target_commit: target.id,
        compensation_commit: Some(compensation.id),
        executed: run.executed,
        skipped: run.skipped,
        failed: run.failed,
    })
}
