//! Branch, tag and HEAD management, plus the reflog.
//!
//! Refs are the only mutable pointers in the engine:
//! - branches move on commit/merge/reset/rollback
//! - tags are created once and never move
//! - HEAD names the current branch, or a commit when detached
//!
//! Every mutating call here appends exactly one reflog entry before
//! returning success, which makes the reflog a superset audit trail of all
//! graph-visible mutations. Reflog entries are never edited or deleted.
//!
//! Callers must serialize mutations per connection: a branch update is a
//! read-then-write, and two racing writers can silently lose an update.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::kv::Keyspace;
use crate::storage::types::{BranchName, CommitId, TagName};

/// A mutable branch pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub name: BranchName,
    pub head: CommitId,
    pub protected: bool,
}

/// Whether a tag carries an annotation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagKind {
    Lightweight,
    Annotated,
}

/// An immutable tag pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: TagName,
    pub commit: CommitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub kind: TagKind,
}

/// What HEAD currently points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadState {
    Branch(BranchName),
    Detached(CommitId),
}

impl HeadState {
    /// the branch name, if not detached
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            HeadState::Branch(name) => Some(name),
            HeadState::Detached(_) => None,
        }
    }
}

/// The kind of mutation a reflog entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefAction {
    Checkout,
    Commit,
    Merge,
    Reset,
    Rebase,
    CherryPick,
    Rollback,
    BranchCreate,
    BranchDelete,
    TagCreate,
    TagDelete,
}

/// One append-only audit record of a ref mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    /// the ref that moved ("HEAD", a branch name, or a tag name)
    pub reference: String,
    pub old_commit: Option<CommitId>,
    pub new_commit: Option<CommitId>,
    pub action: RefAction,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Manages branches, tags, HEAD and the reflog for one connection.
pub struct RefManager {
    keys: Keyspace,
}

impl RefManager {
    const HEAD_KEY: &'static str = "HEAD";

    /// Create a ref manager over a connection's keyspace.
    pub fn new(keys: &Keyspace) -> Self {
        Self { keys: keys.clone() }
    }

    fn branch_key(name: &BranchName) -> String {
        format!("refs/heads/{}", name)
    }

    fn tag_key(name: &TagName) -> String {
        format!("refs/tags/{}", name)
    }

    /// Check whether this connection's refs have been initialized.
    pub fn is_initialized(&self) -> StorageResult<bool> {
        self.keys.contains(Self::HEAD_KEY)
    }

    /// Initialize refs: create the protected main branch at the root commit
    /// and point HEAD at it.
    pub fn init(&self, root: CommitId) -> StorageResult<()> {
        let main = BranchName::main();
        let branch = Branch {
            name: main.clone(),
            head: root.clone(),
            protected: true,
        };
        self.keys.put_json(&Self::branch_key(&main), &branch)?;
        self.keys
            .put_json(Self::HEAD_KEY, &HeadState::Branch(main.clone()))?;
        self.append_reflog(ReflogEntry {
            reference: main.to_string(),
            old_commit: None,
            new_commit: Some(root),
            action: RefAction::BranchCreate,
            message: "initialize repository".to_string(),
            timestamp: Utc::now(),
        })
    }

    // ==================== HEAD ====================

    /// Get the current HEAD state.
    pub fn head(&self) -> StorageResult<HeadState> {
        self.keys
            .get_json(Self::HEAD_KEY)?
            .ok_or_else(|| StorageError::Internal("refs not initialized".to_string()))
    }

    /// Resolve HEAD to a commit id.
    pub fn resolve_head(&self) -> StorageResult<CommitId> {
        match self.head()? {
            HeadState::Branch(name) => Ok(self.get_branch(&name)?.head),
            HeadState::Detached(commit) => Ok(commit),
        }
    }

    /// The currently checked-out branch, if HEAD is not detached.
    pub fn current_branch(&self) -> StorageResult<Option<BranchName>> {
        Ok(self.head()?.branch().cloned())
    }

    /// Move HEAD to a branch. Appends a `Checkout` entry.
    pub fn checkout_branch(&self, name: &BranchName) -> StorageResult<CommitId> {
        let old = self.resolve_head()?;
        let branch = self.get_branch(name)?;
        self.keys
            .put_json(Self::HEAD_KEY, &HeadState::Branch(name.clone()))?;
        debug!(branch = %name, commit = %branch.head.short(), "checkout");
        self.append_reflog(ReflogEntry {
            reference: "HEAD".to_string(),
            old_commit: Some(old),
            new_commit: Some(branch.head.clone()),
            action: RefAction::Checkout,
            message: format!("checkout: moving to {}", name),
            timestamp: Utc::now(),
        })?;
        Ok(branch.head)
    }

    /// Detach HEAD at a commit. Appends a `Checkout` entry.
    pub fn checkout_detached(&self, commit: CommitId) -> StorageResult<()> {
        let old = self.resolve_head()?;
        self.keys
            .put_json(Self::HEAD_KEY, &HeadState::Detached(commit.clone()))?;
        debug!(commit = %commit.short(), "checkout detached");
        self.append_reflog(ReflogEntry {
            reference: "HEAD".to_string(),
            old_commit: Some(old),
            new_commit: Some(commit.clone()),
            action: RefAction::Checkout,
            message: format!("checkout: detached at {}", commit.short()),
            timestamp: Utc::now(),
        })
    }

    // ==================== Branches ====================

    /// Look up a branch.
    pub fn get_branch(&self, name: &BranchName) -> StorageResult<Branch> {
        self.keys
            .get_json(&Self::branch_key(name))?
            .ok_or_else(|| StorageError::BranchNotFound(name.to_string()))
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, name: &BranchName) -> StorageResult<bool> {
        self.keys.contains(&Self::branch_key(name))
    }

    /// List all branches, sorted by name.
    pub fn list_branches(&self) -> StorageResult<Vec<Branch>> {
        let mut branches = Vec::new();
        for key in self.keys.list("refs/heads/")? {
            if let Some(branch) = self.keys.get_json::<Branch>(&key)? {
                branches.push(branch);
            }
        }
        Ok(branches)
    }

    /// Create a new branch pointing at the given commit.
    pub fn create_branch(&self, name: &BranchName, at: CommitId) -> StorageResult<()> {
        if self.branch_exists(name)? {
            return Err(StorageError::BranchAlreadyExists(name.to_string()));
        }
        let branch = Branch {
            name: name.clone(),
            head: at.clone(),
            protected: false,
        };
        self.keys.put_json(&Self::branch_key(name), &branch)?;
        debug!(branch = %name, commit = %at.short(), "create branch");
        self.append_reflog(ReflogEntry {
            reference: name.to_string(),
            old_commit: None,
            new_commit: Some(at),
            action: RefAction::BranchCreate,
            message: format!("branch: created {}", name),
            timestamp: Utc::now(),
        })
    }

    /// Move a branch to a new commit, recording why.
    pub fn update_branch(
        &self,
        name: &BranchName,
        target: CommitId,
        action: RefAction,
        message: impl Into<String>,
    ) -> StorageResult<()> {
        let mut branch = self.get_branch(name)?;
        let old = branch.head.clone();
        branch.head = target.clone();
        self.keys.put_json(&Self::branch_key(name), &branch)?;
        debug!(branch = %name, from = %old.short(), to = %target.short(), ?action, "update branch");
        self.append_reflog(ReflogEntry {
            reference: name.to_string(),
            old_commit: Some(old),
            new_commit: Some(target),
            action,
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    /// Delete a branch.
    ///
    /// Protected branches need `force`; the checked-out branch can never
    /// be deleted.
    pub fn delete_branch(&self, name: &BranchName, force: bool) -> StorageResult<()> {
        let branch = self.get_branch(name)?;
        if branch.protected && !force {
            return Err(StorageError::ProtectedBranch(name.to_string()));
        }
        if self.current_branch()?.as_ref() == Some(name) {
            return Err(StorageError::BranchCheckedOut(name.to_string()));
        }
        self.keys.delete(&Self::branch_key(name))?;
        debug!(branch = %name, "delete branch");
        self.append_reflog(ReflogEntry {
            reference: name.to_string(),
            old_commit: Some(branch.head),
            new_commit: None,
            action: RefAction::BranchDelete,
            message: format!("branch: deleted {}", name),
            timestamp: Utc::now(),
        })
    }

    // ==================== Tags ====================

    /// Look up a tag.
    pub fn get_tag(&self, name: &TagName) -> StorageResult<Tag> {
        self.keys
            .get_json(&Self::tag_key(name))?
            .ok_or_else(|| StorageError::TagNotFound(name.to_string()))
    }

    /// Check if a tag exists.
    pub fn tag_exists(&self, name: &TagName) -> StorageResult<bool> {
        self.keys.contains(&Self::tag_key(name))
    }

    /// List all tags, sorted by name.
    pub fn list_tags(&self) -> StorageResult<Vec<Tag>> {
        let mut tags = Vec::new();
        for key in self.keys.list("refs/tags/")? {
            if let Some(tag) = self.keys.get_json::<Tag>(&key)? {
                tags.push(tag);
            }
        }
        Ok(tags)
    }

    /// Create a tag. Tags never move; re-creating a name is an error.
    pub fn create_tag(
        &self,
        name: &TagName,
        commit: CommitId,
        kind: TagKind,
        message: Option<String>,
    ) -> StorageResult<()> {
        if self.tag_exists(name)? {
            return Err(StorageError::TagAlreadyExists(name.to_string()));
        }
        let tag = Tag {
            name: name.clone(),
            commit: commit.clone(),
            message,
            kind,
        };
        self.keys.put_json(&Self::tag_key(name), &tag)?;
        debug!(tag = %name, commit = %commit.short(), "create tag");
        self.append_reflog(ReflogEntry {
            reference: name.to_string(),
            old_commit: None,
            new_commit: Some(commit),
            action: RefAction::TagCreate,
            message: format!("tag: created {}", name),
            timestamp: Utc::now(),
        })
    }

    /// Delete a tag ref. The underlying commit is untouched.
    pub fn delete_tag(&self, name: &TagName) -> StorageResult<()> {
        let tag = self.get_tag(name)?;
        self.keys.delete(&Self::tag_key(name))?;
        debug!(tag = %name, "delete tag");
        self.append_reflog(ReflogEntry {
            reference: name.to_string(),
            old_commit: Some(tag.commit),
            new_commit: None,
            action: RefAction::TagDelete,
            message: format!("tag: deleted {}", name),
            timestamp: Utc::now(),
        })
    }

    // ==================== Reflog ====================

    /// Read the full reflog, oldest first.
    pub fn reflog(&self) -> StorageResult<Vec<ReflogEntry>> {
        let mut entries = Vec::new();
        for key in self.keys.list("reflog/")? {
            if let Some(entry) = self.keys.get_json::<ReflogEntry>(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn append_reflog(&self, entry: ReflogEntry) -> StorageResult<()> {
        let seq = self.keys.list("reflog/")?.len();
        self.keys.put_json(&format!("reflog/{:010}", seq), &entry)
    }
}
