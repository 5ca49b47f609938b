//! RevDB - Version Control for Database State
//!
//! This crate tracks an external database's schema and data as a DAG of
//! immutable commits, with branches, tags, a reflog, three-way merge,
//! stash, bisect, blame, and best-effort rollback through a pluggable
//! database adapter. The engine never connects to a database itself;
//! persistence goes through a key-value collaborator and SQL execution
//! through the adapter trait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use revdb::storage::{Author, Change, ChangeOperation, Keyspace, MemoryKv};
//! use revdb::vcs::{VcsConfig, VersionControl};
//!
//! let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn1");
//! let vcs = VersionControl::open(&keys, VcsConfig::default()).unwrap();
//!
//! vcs.track(Change::schema(
//!     ChangeOperation::Create,
//!     "users",
//!     Some("CREATE TABLE users (id INT)".into()),
//! )).unwrap();
//! vcs.commit("create users table", Author::new("alice", "alice@example.com")).unwrap();
//! ```

#![allow(dead_code)] // Many methods are for public API extensibility

pub mod adapter;
pub mod bisect;
pub mod blame;
pub mod diff;
pub mod merge;
pub mod rollback;
pub mod stash;
pub mod storage;
pub mod vcs;
