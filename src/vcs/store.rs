//! the connection registry
//!
//! One engine per connection id, all over a shared key-value store. Each
//! engine lives under its own `connections/<id>/` keyspace, so connection
//! graphs never see each other. Engines are handed out behind a mutex,
//! which serializes mutations per connection while leaving connections
//! fully concurrent with each other.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::storage::kv::{Keyspace, KvStore};
use crate::storage::types::ConnectionId;
use crate::vcs::error::{VcsError, VcsResult};
use crate::vcs::{VcsConfig, VersionControl};

/// Registry of engines, keyed by connection id.
pub struct ConnectionStore {
    kv: Arc<dyn KvStore>,
    config: VcsConfig,
    engines: RwLock<HashMap<ConnectionId, Arc<Mutex<VersionControl>>>>,
}

impl ConnectionStore {
    pub fn new(kv: Arc<dyn KvStore>, config: VcsConfig) -> Self {
        Self {
            kv,
            config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    fn keyspace_for(&self, id: &ConnectionId) -> Keyspace {
        Keyspace::new(self.kv.clone(), format!("connections/{}", id))
    }

    /// Open (or re-open) the engine for a connection, registering it.
    ///
    /// First use initializes the connection's graph; later calls pick up
    /// whatever the store already holds.
    pub fn register(&self, id: &ConnectionId) -> VcsResult<Arc<Mutex<VersionControl>>> {
        if let Some(engine) = self.engines.read().get(id) {
            return Ok(engine.clone());
        }

        let mut engines = self.engines.write();
        // racing registration settled by whoever got the write lock first
        if let Some(engine) = engines.get(id) {
            return Ok(engine.clone());
        }
        let vcs = VersionControl::open(&self.keyspace_for(id), self.config.clone())?;
        let engine = Arc::new(Mutex::new(vcs));
        engines.insert(id.clone(), engine.clone());
        info!(connection = %id, "connection registered");
        Ok(engine)
    }

    /// Fetch a registered engine.
    pub fn get(&self, id: &ConnectionId) -> VcsResult<Arc<Mutex<VersionControl>>> {
        self.engines
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| VcsError::ConnectionNotFound(id.to_string()))
    }

    /// Unregister an engine. Its persisted graph stays in the store and
    /// comes back on the next `register`.
    pub fn remove(&self, id: &ConnectionId) -> VcsResult<()> {
        match self.engines.write().remove(id) {
            Some(_) => {
                info!(connection = %id, "connection removed");
                Ok(())
            }
            None => Err(VcsError::ConnectionNotFound(id.to_string())),
        }
    }

    /// Ids of all registered connections.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.engines.read().keys().cloned().collect()
    }
}
