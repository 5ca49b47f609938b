//! the version control engine facade
//!
//! `VersionControl` ties the layers together for one connection: it owns
//! the object store, refs, stash and pending set over a shared keyspace,
//! and exposes the whole operation surface (track/commit/log, branches
//! and tags, checkout, diff, merge, stash, bisect, blame, rollback).
//!
//! The facade is not internally synchronized. `ConnectionStore` hands
//! each engine out behind a mutex; callers going around it must
//! serialize mutations per connection themselves.

pub mod error;
pub mod pending;
pub mod store;

pub use error::{VcsError, VcsResult};
pub use store::ConnectionStore;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::adapter::{ConnectionHandle, DatabaseAdapter};
use crate::bisect::BisectSession;
use crate::blame::BlameOutcome;
use crate::diff::{diff_snapshots, SnapshotDiff};
use crate::merge::{
    analyze, plan_merge, AppliedStrategy, MergeAnalysis, MergeConflict, MergeResult,
    MergeStrategy, Resolution,
};
use crate::rollback::{RollbackReport, RollbackTarget, DEFAULT_STATEMENT_TIMEOUT_MS};
use crate::stash::{StashEntry, StashManager};
use crate::storage::commit::{get_commit, history, Commit, CommitBuilder, HistoryIter};
use crate::storage::kv::Keyspace;
use crate::storage::object::ObjectStore;
use crate::storage::refs::{HeadState, RefAction, RefManager, ReflogEntry, Tag, TagKind};
use crate::storage::snapshot::{read_snapshot, write_snapshot, Snapshot};
use crate::storage::types::{
    Author, BranchName, Change, ChangeOperation, ChangeType, CommitId, TagName,
};
use crate::storage::Branch;

use pending::PendingStore;

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// stash entries kept before the oldest is evicted
    pub stash_limit: Option<usize>,
    /// per-statement timeout for rollback SQL
    pub statement_timeout_ms: u64,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            stash_limit: None,
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
        }
    }
}

/// A commit position, for diff and reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revision {
    Head,
    /// n first-parent steps before HEAD
    Offset(usize),
    Id(CommitId),
}

/// The engine for one tracked connection.
pub struct VersionControl {
    store: ObjectStore,
    refs: RefManager,
    stash: StashManager,
    pending: PendingStore,
    config: VcsConfig,
}

impl VersionControl {
    /// Open the engine over a connection keyspace, initializing the graph
    /// (empty root commit on a protected main) on first use.
    pub fn open(keys: &Keyspace, config: VcsConfig) -> VcsResult<Self> {
        let store = ObjectStore::new(keys);
        let refs = RefManager::new(keys);
        let stash = StashManager::new(keys, config.stash_limit);
        let pending = PendingStore::new(keys);

        if !refs.is_initialized()? {
            let tree = write_snapshot(&store, &Snapshot::empty())?;
            let root = CommitBuilder::new(&store)
                .tree(tree)
                .message("Initial commit")
                .author(Author::system())
                .commit()?;
            refs.init(root.id.clone())?;
            info!(root = %root.id.short(), "initialized version graph");
        }

        Ok(Self {
            store,
            refs,
            stash,
            pending,
            config,
        })
    }

    fn snapshot_of(&self, id: &CommitId) -> VcsResult<Snapshot> {
        let commit = get_commit(&self.store, id)?;
        Ok(read_snapshot(&self.store, &commit.tree_id)?)
    }

    fn current_branch_required(&self) -> VcsResult<BranchName> {
        self.refs.current_branch()?.ok_or(VcsError::DetachedHead)
    }

    // ==================== tracking and commits ====================

    /// Record a change into the pending set, returning the new count.
    pub fn track(&self, change: Change) -> VcsResult<usize> {
        let head = self.refs.head()?;
        Ok(self.pending.append(&head, change)?)
    }

    /// The uncommitted changes for the current head.
    pub fn pending_changes(&self) -> VcsResult<Vec<Change>> {
        Ok(self.pending.get(&self.refs.head()?)?)
    }

    /// Discard all pending changes for the current head.
    pub fn clear_pending(&self) -> VcsResult<()> {
        Ok(self.pending.clear(&self.refs.head()?)?)
    }

    /// Commit the pending changes onto the current branch.
    ///
    /// The new tree is the head snapshot with the changes applied.
    pub fn commit(&self, message: impl Into<String>, author: Author) -> VcsResult<Commit> {
        let head = self.refs.head()?;
        let changes = self.pending.get(&head)?;
        if changes.is_empty() {
            return Err(VcsError::NothingToCommit);
        }
        let head_id = self.refs.resolve_head()?;
        let mut snapshot = self.snapshot_of(&head_id)?;
        snapshot.apply_changes(&changes);

        let commit = self.commit_snapshot(message, author, snapshot, changes)?;
        self.pending.clear(&head)?;
        Ok(commit)
    }

    /// Commit a caller-captured snapshot with its change list.
    ///
    /// For callers that mirror actual database state instead of relying on
    /// change application. Does not touch the pending set.
    pub fn commit_snapshot(
        &self,
        message: impl Into<String>,
        author: Author,
        snapshot: Snapshot,
        changes: Vec<Change>,
    ) -> VcsResult<Commit> {
        let branch = self.current_branch_required()?;
        let head_id = self.refs.resolve_head()?;
        let tree = write_snapshot(&self.store, &snapshot)?;

        let commit = CommitBuilder::new(&self.store)
            .tree(tree)
            .parent(head_id)
            .message(message)
            .author(author)
            .changes(changes)
            .commit()?;
        self.refs.update_branch(
            &branch,
            commit.id.clone(),
            RefAction::Commit,
            format!("commit: {}", commit.summary()),
        )?;
        debug!(commit = %commit.id.short(), branch = %branch, "committed");
        Ok(commit)
    }

    /// First-parent history from HEAD, newest first.
    pub fn log(&self, limit: Option<usize>) -> VcsResult<Vec<Commit>> {
        Ok(history(&self.store, self.refs.resolve_head()?, limit)?)
    }

    /// Load one commit.
    pub fn get_commit(&self, id: &CommitId) -> VcsResult<Commit> {
        Ok(get_commit(&self.store, id)?)
    }

    /// Resolve a revision to its commit.
    pub fn resolve_revision(&self, revision: &Revision) -> VcsResult<Commit> {
        match revision {
            Revision::Head => Ok(get_commit(&self.store, &self.refs.resolve_head()?)?),
            Revision::Id(id) => Ok(get_commit(&self.store, id)?),
            Revision::Offset(n) => {
                let log = history(&self.store, self.refs.resolve_head()?, Some(n + 1))?;
                log.into_iter()
                    .nth(*n)
                    .ok_or_else(|| VcsError::InvalidRevision(format!("HEAD~{}", n)))
            }
        }
    }

    /// The materialized state at a revision.
    pub fn snapshot_at(&self, revision: &Revision) -> VcsResult<Snapshot> {
        let commit = self.resolve_revision(revision)?;
        Ok(read_snapshot(&self.store, &commit.tree_id)?)
    }

    // ==================== branches, tags, checkout ====================

    pub fn head(&self) -> VcsResult<HeadState> {
        Ok(self.refs.head()?)
    }

    pub fn current_branch(&self) -> VcsResult<Option<BranchName>> {
        Ok(self.refs.current_branch()?)
    }

    pub fn branches(&self) -> VcsResult<Vec<Branch>> {
        Ok(self.refs.list_branches()?)
    }

    /// Create a branch at the given commit, or at HEAD.
    pub fn create_branch(&self, name: &BranchName, at: Option<CommitId>) -> VcsResult<()> {
        let at = match at {
            Some(id) => {
                // fail early on a dangling id
                get_commit(&self.store, &id)?;
                id
            }
            None => self.refs.resolve_head()?,
        };
        Ok(self.refs.create_branch(name, at)?)
    }

    pub fn delete_branch(&self, name: &BranchName, force: bool) -> VcsResult<()> {
        Ok(self.refs.delete_branch(name, force)?)
    }

    /// Check out a branch, tag, or commit id.
    ///
    /// Branch names win over tags; anything else is tried as a commit id
    /// and detaches HEAD. Returns the snapshot at the new position.
    pub fn checkout(&self, refspec: &str) -> VcsResult<Snapshot> {
        if let Ok(name) = BranchName::new(refspec) {
            if self.refs.branch_exists(&name)? {
                let head = self.refs.checkout_branch(&name)?;
                return self.snapshot_of(&head);
            }
        }
        if let Ok(tag) = TagName::new(refspec) {
            if self.refs.tag_exists(&tag)? {
                let tag = self.refs.get_tag(&tag)?;
                self.refs.checkout_detached(tag.commit.clone())?;
                return self.snapshot_of(&tag.commit);
            }
        }
        let id = CommitId::new(refspec);
        match get_commit(&self.store, &id) {
            Ok(commit) => {
                self.refs.checkout_detached(commit.id)?;
                Ok(read_snapshot(&self.store, &commit.tree_id)?)
            }
            Err(_) => Err(VcsError::InvalidRevision(refspec.to_string())),
        }
    }

    /// Tag a commit (or HEAD). A message makes the tag annotated.
    pub fn create_tag(
        &self,
        name: &TagName,
        at: Option<CommitId>,
        message: Option<String>,
    ) -> VcsResult<()> {
        let at = match at {
            Some(id) => {
                get_commit(&self.store, &id)?;
                id
            }
            None => self.refs.resolve_head()?,
        };
        let kind = if message.is_some() {
            TagKind::Annotated
        } else {
            TagKind::Lightweight
        };
        Ok(self.refs.create_tag(name, at, kind, message)?)
    }

    pub fn tags(&self) -> VcsResult<Vec<Tag>> {
        Ok(self.refs.list_tags()?)
    }

    pub fn delete_tag(&self, name: &TagName) -> VcsResult<()> {
        Ok(self.refs.delete_tag(name)?)
    }

    /// The full ref mutation audit trail, oldest first.
    pub fn reflog(&self) -> VcsResult<Vec<ReflogEntry>> {
        Ok(self.refs.reflog()?)
    }

    // ==================== diff, blame, bisect ====================

    /// Structural diff between two revisions.
    pub fn diff(&self, from: &Revision, to: &Revision) -> VcsResult<SnapshotDiff> {
        let from = self.snapshot_at(from)?;
        let to = self.snapshot_at(to)?;
        Ok(diff_snapshots(&from, &to))
    }

    /// The most recent commit touching a table, from HEAD.
    pub fn blame(&self, target: &str) -> VcsResult<BlameOutcome> {
        Ok(crate::blame::blame(
            &self.store,
            self.refs.resolve_head()?,
            target,
        )?)
    }

    /// Start a bisect between a known-good and a known-bad commit.
    pub fn bisect_start(&self, good: &CommitId, bad: &CommitId) -> VcsResult<BisectSession> {
        BisectSession::start(&self.store, good, bad)?.ok_or_else(|| VcsError::NotAncestor {
            good: good.to_string(),
            bad: bad.to_string(),
        })
    }

    // ==================== merge ====================

    fn finish_merge(
        &self,
        branch: &BranchName,
        parents: Vec<CommitId>,
        snapshot: Snapshot,
        message: String,
        author: Author,
        changes: Vec<Change>,
        strategy: AppliedStrategy,
    ) -> VcsResult<MergeResult> {
        let tree = write_snapshot(&self.store, &snapshot)?;
        let commit = CommitBuilder::new(&self.store)
            .tree(tree)
            .parents(parents)
            .message(&message)
            .author(author)
            .changes(changes)
            .commit()?;
        self.refs
            .update_branch(branch, commit.id.clone(), RefAction::Merge, message)?;
        Ok(MergeResult {
            merged: true,
            commit: Some(commit),
            strategy,
            conflicts: Vec::new(),
        })
    }

    fn merge_inner(
        &self,
        source: &BranchName,
        author: Author,
        settle: impl FnOnce(
            &Snapshot,
            &Snapshot,
            &Snapshot,
        ) -> (
            AppliedStrategy,
            Result<(Snapshot, Vec<Change>), Vec<MergeConflict>>,
        ),
    ) -> VcsResult<MergeResult> {
        let target = self.current_branch_required()?;
        let target_head = self.refs.resolve_head()?;
        let source_head = self.refs.get_branch(source)?.head;

        match analyze(&self.store, &target_head, &source_head)? {
            MergeAnalysis::AlreadyMerged => Err(VcsError::NothingToMerge(source.to_string())),
            MergeAnalysis::FastForward => {
                self.refs.update_branch(
                    &target,
                    source_head,
                    RefAction::Merge,
                    format!("merge {}: fast-forward", source),
                )?;
                Ok(MergeResult {
                    merged: true,
                    commit: None,
                    strategy: AppliedStrategy::FastForward,
                    conflicts: Vec::new(),
                })
            }
            MergeAnalysis::Diverged(base) => {
                let base_snapshot = if base.as_str().is_empty() {
                    Snapshot::empty()
                } else {
                    self.snapshot_of(&base)?
                };
                let current = self.snapshot_of(&target_head)?;
                let incoming = self.snapshot_of(&source_head)?;

                match settle(&base_snapshot, &current, &incoming) {
                    (strategy, Err(conflicts)) => Ok(MergeResult {
                        merged: false,
                        commit: None,
                        strategy,
                        conflicts,
                    }),
                    (strategy, Ok((snapshot, changes))) => self.finish_merge(
                        &target,
                        vec![target_head, source_head],
                        snapshot,
                        format!("Merge branch '{}' into {}", source, target),
                        author,
                        changes,
                        strategy,
                    ),
                }
            }
        }
    }

    /// Merge a branch into the currently checked-out branch (the merge
    /// target is always HEAD's branch; checkout the target first).
    ///
    /// `Recursive` stops on conflicts and reports them. `Ours`/`Theirs`
    /// skip conflict detection entirely: the merge commit's tree is the
    /// target's (respectively the source's) whole tree, with both heads
    /// as parents.
    pub fn merge(
        &self,
        source: &BranchName,
        strategy: MergeStrategy,
        author: Author,
    ) -> VcsResult<MergeResult> {
        self.merge_inner(source, author, |base, current, incoming| match strategy {
            MergeStrategy::Recursive => {
                let plan = plan_merge(base, current, incoming);
                if plan.conflicts.is_empty() {
                    (AppliedStrategy::Recursive, Ok((plan.snapshot, Vec::new())))
                } else {
                    (AppliedStrategy::Recursive, Err(plan.conflicts))
                }
            }
            MergeStrategy::Ours => (AppliedStrategy::Ours, Ok((current.clone(), Vec::new()))),
            MergeStrategy::Theirs => (AppliedStrategy::Theirs, Ok((incoming.clone(), Vec::new()))),
        })
    }

    /// Merge with explicit per-table conflict resolutions, into the
    /// currently checked-out branch.
    ///
    /// Tables missing from the map stay conflicted and block the merge.
    /// Each applied resolution is recorded as a change on the merge commit.
    pub fn merge_resolved(
        &self,
        source: &BranchName,
        resolutions: &BTreeMap<String, Resolution>,
        author: Author,
    ) -> VcsResult<MergeResult> {
        self.merge_inner(source, author, |base, current, incoming| {
            let mut plan = plan_merge(base, current, incoming);
            let changes = plan
                .conflicts
                .iter()
                .filter_map(|c| {
                    resolutions
                        .get(&c.target)
                        .map(|r| resolution_change(c, *r))
                })
                .collect();
            plan.resolve_with(resolutions, current, incoming);
            if plan.conflicts.is_empty() {
                (AppliedStrategy::Recursive, Ok((plan.snapshot, changes)))
            } else {
                (AppliedStrategy::Recursive, Err(plan.conflicts))
            }
        })
    }

    // ==================== stash ====================

    /// Shelve the pending changes, clearing the pending set.
    pub fn stash_save(&self, message: Option<String>) -> VcsResult<StashEntry> {
        let branch = self.current_branch_required()?;
        let head = self.refs.head()?;
        let changes = self.pending.get(&head)?;
        if changes.is_empty() {
            return Err(VcsError::NothingToCommit);
        }
        let base = self.refs.resolve_head()?;
        let entry = self.stash.save(branch, base, changes, message)?;
        self.pending.clear(&head)?;
        Ok(entry)
    }

    /// Restore a stash entry (the latest by default) into the pending set,
    /// keeping the entry. Applying twice appends twice.
    pub fn stash_apply(&self, id: Option<&str>) -> VcsResult<StashEntry> {
        let entry = self
            .stash
            .entry(id)?
            .ok_or_else(|| VcsError::StashNotFound(id.unwrap_or("latest").to_string()))?;

        let head = self.refs.head()?;
        let mut changes = self.pending.get(&head)?;
        changes.extend(entry.changes.iter().cloned());
        self.pending.set(&head, &changes)?;
        Ok(entry)
    }

    /// Restore a stash entry (the latest by default) into the pending set
    /// and drop it.
    pub fn stash_pop(&self, id: Option<&str>) -> VcsResult<StashEntry> {
        let entry = self.stash_apply(id)?;
        self.stash.remove(&entry.id)?;
        Ok(entry)
    }

    /// All stash entries, newest first.
    pub fn stash_list(&self) -> VcsResult<Vec<StashEntry>> {
        Ok(self.stash.list()?)
    }

    /// Drop a stash entry without restoring it.
    pub fn stash_drop(&self, id: &str) -> VcsResult<()> {
        if !self.stash.remove(id)? {
            return Err(VcsError::StashNotFound(id.to_string()));
        }
        Ok(())
    }

    // ==================== history surgery ====================

    /// Hard reset the current branch to a revision, discarding pending
    /// changes.
    pub fn reset(&self, revision: &Revision) -> VcsResult<CommitId> {
        let branch = self.current_branch_required()?;
        let commit = self.resolve_revision(revision)?;
        self.refs.update_branch(
            &branch,
            commit.id.clone(),
            RefAction::Reset,
            format!("reset: moving to {}", commit.id.short()),
        )?;
        self.pending.clear(&self.refs.head()?)?;
        Ok(commit.id)
    }

    /// Apply one commit's changes onto the current branch as a new commit.
    pub fn cherry_pick(&self, id: &CommitId, author: Author) -> VcsResult<Commit> {
        let branch = self.current_branch_required()?;
        let source = get_commit(&self.store, id)?;
        let head_id = self.refs.resolve_head()?;

        let mut snapshot = self.snapshot_of(&head_id)?;
        snapshot.apply_changes(&source.changes);
        let tree = write_snapshot(&self.store, &snapshot)?;

        let commit = CommitBuilder::new(&self.store)
            .tree(tree)
            .parent(head_id)
            .message(&source.message)
            .author(author)
            .changes(source.changes)
            .commit()?;
        self.refs.update_branch(
            &branch,
            commit.id.clone(),
            RefAction::CherryPick,
            format!("cherry-pick: {}", commit.summary()),
        )?;
        Ok(commit)
    }

    /// Replay the current branch's commits on top of another branch.
    ///
    /// Returns the new head. Falls back to fast-forward (or a no-op) when
    /// one side already contains the other.
    pub fn rebase(&self, onto: &BranchName, author: Author) -> VcsResult<CommitId> {
        let branch = self.current_branch_required()?;
        let current_head = self.refs.resolve_head()?;
        let onto_head = self.refs.get_branch(onto)?.head;

        let base = crate::merge::merge_base(&self.store, &current_head, &onto_head)?;
        if base.as_ref() == Some(&onto_head) {
            return Ok(current_head);
        }
        if base.as_ref() == Some(&current_head) {
            self.refs.update_branch(
                &branch,
                onto_head.clone(),
                RefAction::Rebase,
                format!("rebase onto {}: fast-forward", onto),
            )?;
            return Ok(onto_head);
        }

        let mut replay = Vec::new();
        for commit in HistoryIter::new(&self.store, current_head) {
            let commit = commit?;
            if Some(&commit.id) == base.as_ref() {
                break;
            }
            replay.push(commit);
        }
        replay.reverse();

        let mut snapshot = self.snapshot_of(&onto_head)?;
        let mut parent = onto_head;
        for old in replay {
            snapshot.apply_changes(&old.changes);
            let tree = write_snapshot(&self.store, &snapshot)?;
            let commit = CommitBuilder::new(&self.store)
                .tree(tree)
                .parent(parent)
                .message(&old.message)
                .author(author.clone())
                .changes(old.changes)
                .commit()?;
            parent = commit.id;
        }

        self.refs.update_branch(
            &branch,
            parent.clone(),
            RefAction::Rebase,
            format!("rebase onto {}", onto),
        )?;
        Ok(parent)
    }

    // ==================== rollback ====================

    /// Roll the current branch back to an earlier commit, executing
    /// inverse SQL through the adapter. Pending changes are discarded.
    pub fn rollback(
        &self,
        adapter: &dyn DatabaseAdapter,
        handle: &ConnectionHandle,
        target: RollbackTarget,
        author: Author,
    ) -> VcsResult<RollbackReport> {
        let branch = self.current_branch_required()?;
        let report = crate::rollback::rollback(
            &self.store,
            &self.refs,
            adapter,
            handle,
            &branch,
            target,
            author,
            self.config.statement_timeout_ms,
        )?;
        self.pending.clear(&self.refs.head()?)?;
        Ok(report)
    }

    /// Undo a single commit on the current branch. Pending changes are
    /// discarded.
    pub fn revert(
        &self,
        adapter: &dyn DatabaseAdapter,
        handle: &ConnectionHandle,
        id: &CommitId,
        author: Author,
    ) -> VcsResult<RollbackReport> {
        let branch = self.current_branch_required()?;
        let report = crate::rollback::revert(
            &self.store,
            &self.refs,
            adapter,
            handle,
            &branch,
            id,
            author,
            self.config.statement_timeout_ms,
        )?;
        self.pending.clear(&self.refs.head()?)?;
        Ok(report)
    }
}

fn resolution_change(conflict: &MergeConflict, resolution: Resolution) -> Change {
    let side = match resolution {
        Resolution::Current => "current",
        Resolution::Incoming => "incoming",
    };
    let operation = match conflict.conflict_type {
        ChangeType::Schema => ChangeOperation::Alter,
        ChangeType::Data => ChangeOperation::Update,
    };
    Change {
        change_type: conflict.conflict_type,
        operation,
        target: conflict.target.clone(),
        table_name: Some(conflict.target.clone()),
        description: format!("Resolved conflict on {} using {}", conflict.target, side),
        query: None,
        affected_rows: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterConfig, RecordingAdapter};
    use crate::storage::kv::MemoryKv;
    use std::sync::Arc;

    fn setup() -> VersionControl {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn");
        VersionControl::open(&keys, VcsConfig::default()).unwrap()
    }

    fn create(table: &str) -> Change {
        Change::schema(
            ChangeOperation::Create,
            table,
            Some(format!("CREATE TABLE {} (id INT)", table)),
        )
    }

    fn commit_table(vcs: &VersionControl, table: &str) -> Commit {
        vcs.track(create(table)).unwrap();
        vcs.commit(format!("create {}", table), Author::system())
            .unwrap()
    }

    #[test]
    fn test_open_initializes_main() {
        let vcs = setup();
        assert_eq!(vcs.current_branch().unwrap(), Some(BranchName::main()));

        let log = vcs.log(None).unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].is_root());
        assert_eq!(log[0].message, "Initial commit");
    }

    #[test]
    fn test_reopen_keeps_history() {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn");
        let vcs = VersionControl::open(&keys, VcsConfig::default()).unwrap();
        commit_table(&vcs, "users");
        drop(vcs);

        let vcs = VersionControl::open(&keys, VcsConfig::default()).unwrap();
        assert_eq!(vcs.log(None).unwrap().len(), 2);
    }

    #[test]
    fn test_track_and_commit() {
        let vcs = setup();
        assert_eq!(vcs.track(create("users")).unwrap(), 1);
        assert_eq!(vcs.pending_changes().unwrap().len(), 1);

        let commit = vcs.commit("create users", Author::system()).unwrap();
        assert_eq!(commit.changes.len(), 1);
        assert!(vcs.pending_changes().unwrap().is_empty());

        let snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(snapshot.has_table("users"));
    }

    #[test]
    fn test_commit_with_nothing_pending() {
        let vcs = setup();
        let result = vcs.commit("empty", Author::system());
        assert!(matches!(result, Err(VcsError::NothingToCommit)));
    }

    #[test]
    fn test_commit_on_detached_head() {
        let vcs = setup();
        let root = vcs.log(None).unwrap()[0].id.clone();
        commit_table(&vcs, "users");

        vcs.checkout(root.as_str()).unwrap();
        vcs.track(create("orders")).unwrap();
        let result = vcs.commit("on detached", Author::system());
        assert!(matches!(result, Err(VcsError::DetachedHead)));
    }

    #[test]
    fn test_branches_isolate_state() {
        let vcs = setup();
        commit_table(&vcs, "users");

        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        vcs.checkout("feature").unwrap();
        commit_table(&vcs, "orders");

        let snapshot = vcs.checkout("main").unwrap();
        assert!(snapshot.has_table("users"));
        assert!(!snapshot.has_table("orders"));
    }

    #[test]
    fn test_checkout_tag_and_commit_detach() {
        let vcs = setup();
        let first = commit_table(&vcs, "users");
        commit_table(&vcs, "orders");

        let v1 = TagName::new("v1").unwrap();
        vcs.create_tag(&v1, Some(first.id.clone()), Some("first".into()))
            .unwrap();

        let snapshot = vcs.checkout("v1").unwrap();
        assert!(snapshot.has_table("users"));
        assert!(!snapshot.has_table("orders"));
        assert_eq!(vcs.current_branch().unwrap(), None);

        vcs.checkout("main").unwrap();
        vcs.checkout(first.id.as_str()).unwrap();
        assert_eq!(vcs.current_branch().unwrap(), None);

        let result = vcs.checkout("no-such-ref");
        assert!(matches!(result, Err(VcsError::InvalidRevision(_))));
    }

    #[test]
    fn test_diff_between_revisions() {
        let vcs = setup();
        commit_table(&vcs, "users");
        commit_table(&vcs, "orders");

        let diff = vcs.diff(&Revision::Offset(1), &Revision::Head).unwrap();
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].table, "orders");

        let empty = vcs.diff(&Revision::Head, &Revision::Head).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_merge_fast_forward() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        vcs.checkout("feature").unwrap();
        let tip = commit_table(&vcs, "users");

        vcs.checkout("main").unwrap();
        let result = vcs
            .merge(&feature, MergeStrategy::Recursive, Author::system())
            .unwrap();

        assert!(result.merged);
        assert_eq!(result.strategy, AppliedStrategy::FastForward);
        assert!(result.commit.is_none());
        assert_eq!(vcs.log(Some(1)).unwrap()[0].id, tip.id);
    }

    #[test]
    fn test_merge_already_merged() {
        let vcs = setup();
        commit_table(&vcs, "users");
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, Some(vcs.log(None).unwrap()[1].id.clone()))
            .unwrap();

        let result = vcs.merge(&feature, MergeStrategy::Recursive, Author::system());
        assert!(matches!(result, Err(VcsError::NothingToMerge(_))));
    }

    #[test]
    fn test_merge_diverged_clean() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        commit_table(&vcs, "users");
        vcs.checkout("feature").unwrap();
        commit_table(&vcs, "orders");
        vcs.checkout("main").unwrap();

        let result = vcs
            .merge(&feature, MergeStrategy::Recursive, Author::system())
            .unwrap();
        assert!(result.merged);
        let commit = result.commit.unwrap();
        assert!(commit.is_merge());

        let snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(snapshot.has_table("users"));
        assert!(snapshot.has_table("orders"));
    }

    #[test]
    fn test_merge_conflict_stops_recursive() {
        let vcs = setup();
        commit_table(&vcs, "users");
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();

        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("a".into())))
            .unwrap();
        vcs.commit("alter on main", Author::system()).unwrap();

        vcs.checkout("feature").unwrap();
        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("b".into())))
            .unwrap();
        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("c".into())))
            .unwrap();
        vcs.commit("alters on feature", Author::system()).unwrap();
        vcs.checkout("main").unwrap();

        let head_before = vcs.log(Some(1)).unwrap()[0].id.clone();
        let result = vcs
            .merge(&feature, MergeStrategy::Recursive, Author::system())
            .unwrap();

        assert!(!result.merged);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].target, "users");
        // the branch did not move
        assert_eq!(vcs.log(Some(1)).unwrap()[0].id, head_before);
    }

    #[test]
    fn test_merge_ours_takes_whole_target_tree() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        commit_table(&vcs, "users");
        vcs.checkout("feature").unwrap();
        commit_table(&vcs, "orders");
        vcs.checkout("main").unwrap();
        let target_snapshot = vcs.snapshot_at(&Revision::Head).unwrap();

        let result = vcs
            .merge(&feature, MergeStrategy::Ours, Author::system())
            .unwrap();
        assert!(result.merged);
        assert_eq!(result.strategy, AppliedStrategy::Ours);
        assert_eq!(result.commit.as_ref().unwrap().parent_ids.len(), 2);

        // the tree is the target's, untouched by the source branch
        let merged = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(merged.has_table("users"));
        assert!(!merged.has_table("orders"));
        assert_eq!(merged, target_snapshot);
    }

    #[test]
    fn test_merge_theirs_takes_whole_source_tree() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        commit_table(&vcs, "users");
        vcs.checkout("feature").unwrap();
        commit_table(&vcs, "orders");
        let source_snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        vcs.checkout("main").unwrap();

        let result = vcs
            .merge(&feature, MergeStrategy::Theirs, Author::system())
            .unwrap();
        assert!(result.merged);
        assert_eq!(result.strategy, AppliedStrategy::Theirs);
        assert!(result.commit.as_ref().unwrap().is_merge());

        let merged = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(merged.has_table("orders"));
        assert!(!merged.has_table("users"));
        assert_eq!(merged, source_snapshot);
    }

    #[test]
    fn test_merge_resolved_records_resolutions() {
        let vcs = setup();
        commit_table(&vcs, "users");
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();

        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("a".into())))
            .unwrap();
        vcs.commit("alter on main", Author::system()).unwrap();

        vcs.checkout("feature").unwrap();
        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("b".into())))
            .unwrap();
        vcs.track(Change::schema(ChangeOperation::Alter, "users", Some("c".into())))
            .unwrap();
        vcs.commit("alters on feature", Author::system()).unwrap();
        vcs.checkout("main").unwrap();

        // an empty resolution map leaves the conflict standing
        let unresolved = vcs
            .merge_resolved(&feature, &BTreeMap::new(), Author::system())
            .unwrap();
        assert!(!unresolved.merged);

        let mut resolutions = BTreeMap::new();
        resolutions.insert("users".to_string(), Resolution::Incoming);
        let result = vcs
            .merge_resolved(&feature, &resolutions, Author::system())
            .unwrap();

        assert!(result.merged);
        let commit = result.commit.unwrap();
        assert_eq!(commit.changes.len(), 1);
        assert!(commit.changes[0].description.contains("using incoming"));
    }

    #[test]
    fn test_stash_save_and_pop() {
        let vcs = setup();
        vcs.track(create("users")).unwrap();
        vcs.track(Change::data(ChangeOperation::Insert, "users", None, Some(2)))
            .unwrap();
        let before = vcs.pending_changes().unwrap();

        let entry = vcs.stash_save(Some("wip".into())).unwrap();
        assert!(vcs.pending_changes().unwrap().is_empty());
        assert_eq!(entry.changes, before);

        vcs.stash_pop(None).unwrap();
        assert_eq!(vcs.pending_changes().unwrap(), before);
        assert!(vcs.stash_list().unwrap().is_empty());
    }

    #[test]
    fn test_stash_apply_keeps_entry() {
        let vcs = setup();
        vcs.track(create("users")).unwrap();
        let entry = vcs.stash_save(None).unwrap();
        assert_eq!(entry.base_commit, vcs.log(Some(1)).unwrap()[0].id);

        vcs.stash_apply(None).unwrap();
        assert_eq!(vcs.pending_changes().unwrap().len(), 1);
        assert_eq!(vcs.stash_list().unwrap().len(), 1);

        // applying again appends again
        vcs.stash_apply(None).unwrap();
        assert_eq!(vcs.pending_changes().unwrap().len(), 2);
    }

    #[test]
    fn test_stash_empty_pending() {
        let vcs = setup();
        assert!(matches!(vcs.stash_save(None), Err(VcsError::NothingToCommit)));
        assert!(matches!(vcs.stash_pop(None), Err(VcsError::StashNotFound(_))));
        assert!(matches!(vcs.stash_drop("0"), Err(VcsError::StashNotFound(_))));
    }

    #[test]
    fn test_reset_discards_pending() {
        let vcs = setup();
        commit_table(&vcs, "users");
        vcs.track(create("orders")).unwrap();

        let target = vcs.log(None).unwrap()[1].id.clone();
        let moved_to = vcs.reset(&Revision::Id(target.clone())).unwrap();

        assert_eq!(moved_to, target);
        assert_eq!(vcs.log(Some(1)).unwrap()[0].id, target);
        assert!(vcs.pending_changes().unwrap().is_empty());
    }

    #[test]
    fn test_cherry_pick() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        vcs.checkout("feature").unwrap();
        let picked = commit_table(&vcs, "orders");

        vcs.checkout("main").unwrap();
        commit_table(&vcs, "users");
        let commit = vcs.cherry_pick(&picked.id, Author::system()).unwrap();

        assert_eq!(commit.message, picked.message);
        assert_ne!(commit.id, picked.id);
        let snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(snapshot.has_table("users"));
        assert!(snapshot.has_table("orders"));
    }

    #[test]
    fn test_rebase_replays_commits() {
        let vcs = setup();
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        commit_table(&vcs, "users");

        vcs.checkout("feature").unwrap();
        commit_table(&vcs, "orders");
        let new_head = vcs.rebase(&BranchName::main(), Author::system()).unwrap();

        // linear history: orders replayed on top of users
        let log = vcs.log(None).unwrap();
        assert_eq!(log[0].id, new_head);
        assert_eq!(log[0].message, "create orders");
        assert_eq!(log[1].message, "create users");

        let snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(snapshot.has_table("users"));
        assert!(snapshot.has_table("orders"));
    }

    #[test]
    fn test_blame_through_facade() {
        let vcs = setup();
        commit_table(&vcs, "users");
        let latest = commit_table(&vcs, "orders");

        match vcs.blame("orders").unwrap() {
            BlameOutcome::Attributed { commit_id, .. } => assert_eq!(commit_id, latest.id),
            BlameOutcome::Unattributed => panic!("expected attribution"),
        }
        assert!(!vcs.blame("ghost").unwrap().is_attributed());
    }

    #[test]
    fn test_bisect_not_ancestor() {
        let vcs = setup();
        let bad = commit_table(&vcs, "users").id;
        let result = vcs.bisect_start(&CommitId::new("stranger"), &bad);
        assert!(matches!(result, Err(VcsError::NotAncestor { .. })));
    }

    #[test]
    fn test_rollback_clears_pending() {
        let vcs = setup();
        let target = commit_table(&vcs, "users").id;
        commit_table(&vcs, "orders");
        vcs.track(create("pending_table")).unwrap();

        let adapter = RecordingAdapter::new();
        let handle = adapter.connect(&AdapterConfig::default()).unwrap();
        let report = vcs
            .rollback(
                &adapter,
                &handle,
                RollbackTarget::Commit(target.clone()),
                Author::system(),
            )
            .unwrap();

        assert_eq!(report.target_commit, target);
        assert!(vcs.pending_changes().unwrap().is_empty());

        // the compensation commit restores the target's state
        let snapshot = vcs.snapshot_at(&Revision::Head).unwrap();
        assert!(snapshot.has_table("users"));
        assert!(!snapshot.has_table("orders"));
        let head = vcs.log(Some(1)).unwrap().remove(0);
        assert!(head.message.starts_with("Rollback to:"));
    }

    #[test]
    fn test_reflog_covers_all_mutations() {
        let vcs = setup();
        let before = vcs.reflog().unwrap().len();

        commit_table(&vcs, "users");
        let feature = BranchName::new("feature").unwrap();
        vcs.create_branch(&feature, None).unwrap();
        vcs.checkout("feature").unwrap();

        let log = vcs.reflog().unwrap();
        assert_eq!(log.len(), before + 3);
        assert_eq!(log[log.len() - 1].action, RefAction::Checkout);
        assert_eq!(log[log.len() - 2].action, RefAction::BranchCreate);
        assert_eq!(log[log.len() - 3].action, RefAction::Commit);
    }
}
