//! binary search for the first bad commit
//!
//! A session starts from a known-good and a known-bad commit and walks the
//! first-parent chain between them. The candidate list is kept oldest
//! first; its last element is always a known-bad commit, so when one
//! candidate remains it is the first bad commit.
//!
//! The midpoint is biased low, so the known-bad tail is never re-tested
//! and the search finishes in at most ceil(log2(n)) verdicts.

use tracing::debug;

use crate::storage::commit::HistoryIter;
use crate::storage::error::StorageResult;
use crate::storage::object::ObjectStore;
use crate::storage::types::CommitId;

/// The caller's test verdict for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BisectVerdict {
    Good,
    Bad,
    /// candidate cannot be tested (environment broken at that commit)
    Skip,
}

/// An in-progress bisect over one commit range.
#[derive(Debug, Clone)]
pub struct BisectSession {
    /// oldest first; the last element is always known bad
    candidates: Vec<CommitId>,
    steps: usize,
}

impl BisectSession {
    /// Start a session over the commits after `good` up to and including
    /// `bad`, following first parents.
    ///
    /// Returns `None` when `good` is not a first-parent ancestor of `bad`,
    /// in which case the range is meaningless.
    pub fn start(
        store: &ObjectStore,
        good: &CommitId,
        bad: &CommitId,
    ) -> StorageResult<Option<BisectSession>> {
        let mut candidates = Vec::new();
        let mut reached_good = false;

        for commit in HistoryIter::new(store, bad.clone()) {
            let commit = commit?;
            if &commit.id == good {
                reached_good = true;
                break;
            }
            candidates.push(commit.id);
        }
        if !reached_good {
            return Ok(None);
        }

        candidates.reverse();
        debug!(good = %good.short(), bad = %bad.short(), range = candidates.len(), "bisect start");
        Ok(Some(BisectSession {
            candidates,
            steps: 0,
        }))
    }

    fn midpoint(&self) -> usize {
        (self.candidates.len() - 1) / 2
    }

    /// The commit to test next, or `None` when the search is finished.
    pub fn next_candidate(&self) -> Option<&CommitId> {
        if self.candidates.len() > 1 {
            Some(&self.candidates[self.midpoint()])
        } else {
            None
        }
    }

    /// The first bad commit, once the search has narrowed to one.
    pub fn first_bad(&self) -> Option<&CommitId> {
        if self.candidates.len() == 1 {
            self.candidates.first()
        } else {
            None
        }
    }

    /// Record the verdict for the current candidate.
    ///
    /// Ignored once the search is finished.
    pub fn mark(&mut self, verdict: BisectVerdict) {
        if self.candidates.len() <= 1 {
            return;
        }
        let mid = self.midpoint();
        match verdict {
            BisectVerdict::Good => {
                self.candidates.drain(..=mid);
            }
            BisectVerdict::Bad => {
                self.candidates.truncate(mid + 1);
            }
            BisectVerdict::Skip => {
                self.candidates.remove(mid);
            }
        }
        self.steps += 1;
        debug!(remaining = self.candidates.len(), steps = self.steps, "bisect mark");
    }

    /// Commits still under suspicion.
    pub fn remaining(&self) -> usize {
        self.candidates.len()
    }

    /// Verdicts recorded so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn is_done(&self) -> bool {
        self.candidates.len() <= 1
    }
}
