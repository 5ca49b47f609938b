//! Content-addressed object storage.
//!
//! Commits and snapshot subtrees are immutable: their id is the SHA-256 of
//! their serialized form, and re-putting identical content is a no-op that
//! returns the same id. No update or delete is exposed — immutability is
//! enforced by the interface, not by caller discipline.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::kv::Keyspace;

/// Compute the lowercase-hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write-once, content-addressed store for commit and snapshot bytes.
#[derive(Clone)]
pub struct ObjectStore {
    keys: Keyspace,
}

impl ObjectStore {
    /// Create an object store over the `objects/` area of a keyspace.
    pub fn new(keys: &Keyspace) -> Self {
        Self {
            keys: keys.scoped("objects"),
        }
    }

    /// Store bytes, returning their content id.
    ///
    /// Idempotent: identical content always yields the same id, and the
    /// duplicate write is skipped. This is also what gives snapshots their
    /// structural sharing — unchanged subtrees hash to existing objects.
    pub fn put(&self, bytes: &[u8]) -> StorageResult<String> {
        let id = hash_bytes(bytes);
        if !self.keys.contains(&id)? {
            self.keys.put(&id, bytes)?;
        }
        Ok(id)
    }

    /// Fetch the bytes for an object id.
    pub fn get(&self, id: &str) -> StorageResult<Vec<u8>> {
        self.keys
            .get(id)?
            .ok_or_else(|| StorageError::ObjectNotFound(id.to_string()))
    }

    /// Check whether an object exists.
    pub fn contains(&self, id: &str) -> StorageResult<bool> {
        self.keys.contains(id)
    }

    /// Serialize a value to canonical JSON and store it.
    pub fn put_json<T: Serialize>(&self, value: &T) -> StorageResult<String> {
        let bytes = serde_json::to_vec(value)?;
        self.put(&bytes)
    }

    /// Fetch and deserialize an object.
    pub fn get_json<T: DeserializeOwned>(&self, id: &str) -> StorageResult<T> {
        let bytes = self.get(id)?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptedData {
            key: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Number of stored objects (test/stat helper).
    pub fn object_count(&self) -> StorageResult<usize> {
        Ok(self.keys.list("")?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKv;
    use std::sync::Arc;

    fn setup() -> ObjectStore {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn");
        ObjectStore::new(&keys)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let store = setup();
        let id = store.put(b"payload").unwrap();
        assert_eq!(store.get(&id).unwrap(), b"payload");
        assert!(store.contains(&id).unwrap());
    }

    #[test]
    fn test_put_is_idempotent() {
        let store = setup();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.object_count().unwrap(), 1);
    }

    #[test]
    fn test_distinct_content_distinct_ids() {
        let store = setup();
        let a = store.put(b"one").unwrap();
        let b = store.put(b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.object_count().unwrap(), 2);
    }

    #[test]
    fn test_get_missing() {
        let store = setup();
        let err = store.get("deadbeef").unwrap_err();
        assert!(matches!(err, StorageError::ObjectNotFound(_)));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_hash_is_stable() {
        // store, load, re-hash: the id must be a pure function of content
        let store = setup();
        let id = store.put(b"stable").unwrap();
        let bytes = store.get(&id).unwrap();
        assert_eq!(hash_bytes(&bytes), id);
    }

    #[test]
    fn test_json_roundtrip() {
        let store = setup();
        let id = store.put_json(&("a", 1)).unwrap();
        let back: (String, u32) = store.get_json(&id).unwrap();
        assert_eq!(back, ("a".to_string(), 1));
    }
}
