//! The key-value storage collaborator.
//!
//! The engine persists everything — objects, refs, reflog, stashes, pending
//! change sets — through this byte-oriented interface. Any backing is
//! acceptable as long as `put` is durable before the call returns:
//! - `MemoryKv` for tests and ephemeral engines
//! - `FileKv` for a local file tree
//!
//! Keys are slash-separated paths of validated components, so a file tree
//! can mirror them directly.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::error::{StorageError, StorageResult};

/// Byte-oriented get/put/delete/list storage.
///
/// `list` returns keys in lexicographic order.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;
    /// Deleting a missing key is a no-op.
    fn delete(&self, key: &str) -> StorageResult<()>;
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// validate a storage key: slash-separated, no empty or traversal components
fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::Internal("empty storage key".to_string()));
    }
    for part in key.split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(StorageError::Internal(format!("invalid storage key: {}", key)));
        }
    }
    Ok(())
}

/// In-memory store backed by a sorted map.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self.entries.read();
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// File-tree store: each key maps to a file under the root directory.
///
/// Writes go through a temp file followed by a rename, so a crash never
/// leaves a half-written value behind.
pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    /// Open (or create) a store rooted at the given directory.
    pub fn open(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    fn collect_keys(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> StorageResult<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel.is_empty() {
                name
            } else {
                format!("{}/{}", rel, name)
            };
            if entry.file_type()?.is_dir() {
                self.collect_keys(&entry.path(), &child_rel, out)?;
            } else {
                out.push(child_rel);
            }
        }
        Ok(())
    }
}

impl KvStore for FileKv {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.exists() {
            self.collect_keys(&self.root, "", &mut keys)?;
        }
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

/// A prefixed view over a shared `KvStore`.
///
/// Every engine component works through a keyspace scoped to its connection
/// (and sub-area), so no component can read or write outside its namespace.
#[derive(Clone)]
pub struct Keyspace {
    kv: Arc<dyn KvStore>,
    prefix: String,
}

impl Keyspace {
    /// Create a keyspace over the given store. An empty prefix is the root.
    pub fn new(kv: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            kv,
            prefix: prefix.into(),
        }
    }

    /// Narrow this keyspace to a sub-area.
    pub fn scoped(&self, sub: &str) -> Keyspace {
        let prefix = if self.prefix.is_empty() {
            sub.to_string()
        } else {
            format!("{}/{}", self.prefix, sub)
        };
        Keyspace {
            kv: self.kv.clone(),
            prefix,
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    pub fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.kv.get(&self.full_key(key))
    }

    pub fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.kv.put(&self.full_key(key), value)
    }

    pub fn delete(&self, key: &str) -> StorageResult<()> {
        self.kv.delete(&self.full_key(key))
    }

    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List keys under a sub-prefix, relative to this keyspace.
    pub fn list(&self, sub_prefix: &str) -> StorageResult<Vec<String>> {
        let full = self.full_key(sub_prefix);
        let keys = self.kv.list(&full)?;
        let strip = if self.prefix.is_empty() {
            0
        } else {
            self.prefix.len() + 1
        };
        Ok(keys.into_iter().map(|k| k[strip..].to_string()).collect())
    }

    /// Read and deserialize a JSON value.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a JSON value.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.put(key, &bytes)
    }
}
