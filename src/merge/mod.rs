//! three-way merge over snapshots
//!
//! The pipeline:
//! 1. `analyze` classifies the two heads: already merged, fast-forwardable,
//!    or diverged (with the merge base found by BFS over the DAG)
//! 2. `plan_merge` builds the merged snapshot table by table from the base,
//!    collecting a conflict for every table both sides changed differently
//! 3. explicit resolutions settle the remaining conflicts
//!
//! Conflict granularity is the table. Both sides touching a table with an
//! identical result is not a conflict. The `Ours`/`Theirs` strategies never
//! enter the pipeline at all: they take one head's whole tree.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::diff::diff_snapshots;
use crate::storage::commit::{get_commit, Commit};
use crate::storage::error::StorageResult;
use crate::storage::object::ObjectStore;
use crate::storage::snapshot::Snapshot;
use crate::storage::types::{ChangeType, CommitId};

/// How the caller wants divergence settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeStrategy {
    /// merge cleanly or stop and report conflicts
    #[default]
    Recursive,
    /// record the merge but keep the current branch's whole tree
    Ours,
    /// record the merge and take the incoming branch's whole tree
    Theirs,
}

/// How the merge was actually performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppliedStrategy {
    FastForward,
    Recursive,
    Ours,
    Theirs,
}

/// One table both sides changed differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub conflict_type: ChangeType,
    /// the table in conflict
    pub target: String,
    pub base_value: serde_json::Value,
    pub current_value: serde_json::Value,
    pub incoming_value: serde_json::Value,
}

/// Which side wins a conflicted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    Current,
    Incoming,
}

/// Outcome of a merge request.
#[derive(Debug, Clone)]
pub struct MergeResult {
    pub merged: bool,
    /// the merge commit, absent on fast-forward and on conflict
    pub commit: Option<Commit>,
    pub strategy: AppliedStrategy,
    pub conflicts: Vec<MergeConflict>,
}

/// How two heads relate for merging purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeAnalysis {
    /// the source is already reachable from the target
    AlreadyMerged,
    /// the target is an ancestor of the source; its ref can just move
    FastForward,
    /// real divergence, carrying the merge base
    Diverged(CommitId),
}

/// Find the nearest common ancestor of two commits.
///
/// Alternating BFS from both sides; the first commit discovered by both
/// walks is the base. Returns `None` only for disconnected histories,
/// which cannot happen for commits in the same connection graph.
pub fn merge_base(
    store: &ObjectStore,
    a: &CommitId,
    b: &CommitId,
) -> StorageResult<Option<CommitId>> {
    let mut queue_a = VecDeque::from([a.clone()]);
    let mut queue_b = VecDeque::from([b.clone()]);
    let mut seen_a: HashSet<CommitId> = HashSet::new();
    let mut seen_b: HashSet<CommitId> = HashSet::new();

    while !queue_a.is_empty() || !queue_b.is_empty() {
        if let Some(id) = queue_a.pop_front() {
            if seen_b.contains(&id) {
                return Ok(Some(id));
            }
            if seen_a.insert(id.clone()) {
                queue_a.extend(get_commit(store, &id)?.parent_ids);
            }
        }
        if let Some(id) = queue_b.pop_front() {
            if seen_a.contains(&id) {
                return Ok(Some(id));
            }
            if seen_b.insert(id.clone()) {
                queue_b.extend(get_commit(store, &id)?.parent_ids);
            }
        }
    }
    Ok(None)
}

/// Classify how `source_head` merges into `target_head`.
pub fn analyze(
    store: &ObjectStore,
    target_head: &CommitId,
    source_head: &CommitId,
) -> StorageResult<MergeAnalysis> {
    let base = merge_base(store, target_head, source_head)?;
    let analysis = match base {
        Some(base) if &base == source_head => MergeAnalysis::AlreadyMerged,
        Some(base) if &base == target_head => MergeAnalysis::FastForward,
        Some(base) => MergeAnalysis::Diverged(base),
        // disconnected histories merge from the empty state
        None => MergeAnalysis::Diverged(CommitId::default()),
    };
    debug!(
        target = %target_head.short(),
        source = %source_head.short(),
        ?analysis,
        "merge analysis"
    );
    Ok(analysis)
}

/// Merged snapshot plus the tables that could not be auto-merged.
///
/// Conflicted tables are left at their base state in `snapshot` until a
/// strategy or an explicit resolution settles them.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub snapshot: Snapshot,
    pub conflicts: Vec<MergeConflict>,
}

fn conflict_type(current: &Snapshot, incoming: &Snapshot, table: &str) -> ChangeType {
    if current.schema.tables.get(table) != incoming.schema.tables.get(table) {
        ChangeType::Schema
    } else {
        ChangeType::Data
    }
}

/// Build the merged snapshot from the three states.
pub fn plan_merge(base: &Snapshot, current: &Snapshot, incoming: &Snapshot) -> MergePlan {
    let current_diff = diff_snapshots(base, current);
    let incoming_diff = diff_snapshots(base, incoming);

    let current_tables: HashSet<String> = current_diff.touched_tables().into_iter().collect();
    let incoming_tables: HashSet<String> = incoming_diff.touched_tables().into_iter().collect();

    let mut snapshot = base.clone();
    let mut conflicts = Vec::new();

    let mut all: Vec<&String> = current_tables.union(&incoming_tables).collect();
    all.sort();

    for table in all {
        let in_current = current_tables.contains(table);
        let in_incoming = incoming_tables.contains(table);

        if in_current && !in_incoming {
            snapshot.set_table_from(table, current);
        } else if in_incoming && !in_current {
            snapshot.set_table_from(table, incoming);
        } else {
            // both sides touched it; identical outcomes merge silently
            let current_value = current.table_value(table);
            let incoming_value = incoming.table_value(table);
            if current_value == incoming_value {
                snapshot.set_table_from(table, current);
            } else {
                conflicts.push(MergeConflict {
                    conflict_type: conflict_type(current, incoming, table),
                    target: table.clone(),
                    base_value: base.table_value(table),
                    current_value,
                    incoming_value,
                });
            }
        }
    }

    MergePlan {
        snapshot,
        conflicts,
    }
}

impl MergePlan {
    /// Settle conflicts from a per-table resolution map.
    ///
    /// Tables missing from the map stay conflicted.
    pub fn resolve_with(
        &mut self,
        resolutions: &BTreeMap<String, Resolution>,
        current: &Snapshot,
        incoming: &Snapshot,
    ) {
        let mut remaining = Vec::new();
        for conflict in self.conflicts.drain(..) {
            match resolutions.get(&conflict.target) {
                Some(Resolution::Current) => {
                    self.snapshot.set_table_from(&conflict.target, current);
                }
                Some(Resolution::Incoming) => {
                    self.snapshot.set_table_from(&conflict.target, incoming);
                }
                None => remaining.push(conflict),
            }
        }
        self.conflicts = remaining;
    }
}
