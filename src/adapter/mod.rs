//! the database adapter collaborator
//!
//! The engine never talks to the tracked database directly. Rollback (the
//! only operation that executes SQL) goes through this trait, so callers
//! plug in their driver of choice and the engine stays driver-agnostic.
//!
//! Two built-in adapters ship with the crate:
//! - `NullAdapter` swallows every statement, for engines that only track
//! - `RecordingAdapter` captures statements and can inject failures, for
//!   tests

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

/// Connection parameters for the tracked database.
///
/// Opaque to the engine; only the adapter interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub read_only: bool,
}

/// An open adapter session, issued by `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionHandle(String);

impl ConnectionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of executing one statement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutcome {
    /// Result rows as JSON objects, empty for DDL/DML.
    pub rows: Vec<serde_json::Value>,
    /// Rows returned or affected.
    pub row_count: u64,
}

/// errors surfaced by an adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    /// could not establish a session
    #[error("connect failed: {0}")]
    Connect(String),

    /// the database rejected a statement
    #[error("query failed: {0}")]
    Query(String),

    /// the statement exceeded its timeout
    #[error("query timed out after {0}ms")]
    Timeout(u64),

    /// the handle was never issued or already disconnected
    #[error("unknown connection handle: {0}")]
    UnknownHandle(String),
}

/// result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Driver interface to the tracked database.
///
/// Implementations must be safe to share across threads; the engine may
/// hold one adapter behind several connections.
pub trait DatabaseAdapter: Send + Sync {
    /// Open a session against the configured database.
    fn connect(&self, config: &AdapterConfig) -> AdapterResult<ConnectionHandle>;

    /// Execute one SQL statement, failing after `timeout_ms`.
    fn execute_query(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        timeout_ms: u64,
    ) -> AdapterResult<QueryOutcome>;

    /// Close a session. Closing an unknown handle is an error.
    fn disconnect(&self, handle: &ConnectionHandle) -> AdapterResult<()>;
}

/// Adapter that accepts every statement and returns empty outcomes.
///
/// Useful when the engine is used purely for tracking and rollback SQL
/// should be discarded rather than executed.
#[derive(Default)]
pub struct NullAdapter;

impl NullAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl DatabaseAdapter for NullAdapter {
    fn connect(&self, _config: &AdapterConfig) -> AdapterResult<ConnectionHandle> {
        Ok(ConnectionHandle::new(Ulid::new().to_string()))
    }

    fn execute_query(
        &self,
        _handle: &ConnectionHandle,
        _sql: &str,
        _timeout_ms: u64,
    ) -> AdapterResult<QueryOutcome> {
        Ok(QueryOutcome::default())
    }

    fn disconnect(&self, _handle: &ConnectionHandle) -> AdapterResult<()> {
        Ok(())
    }
}

/// Test adapter that records every executed statement.
///
/// Statements containing a registered failure pattern return
/// `AdapterError::Query` instead of succeeding, which is how rollback's
/// continue-on-error behavior gets exercised.
#[derive(Default)]
pub struct RecordingAdapter {
    inner: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    sessions: HashMap<String, AdapterConfig>,
    executed: Vec<String>,
    fail_on: Vec<String>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make statements containing `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        self.inner.lock().fail_on.push(pattern.into());
    }

    /// All statements executed so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.inner.lock().executed.clone()
    }

    /// Number of open sessions.
    pub fn open_sessions(&self) -> usize {
        self.inner.lock().sessions.len()
    }
}

impl DatabaseAdapter for RecordingAdapter {
    fn connect(&self, config: &AdapterConfig) -> AdapterResult<ConnectionHandle> {
        let handle = ConnectionHandle::new(Ulid::new().to_string());
        self.inner
            .lock()
            .sessions
            .insert(handle.as_str().to_string(), config.clone());
        Ok(handle)
    }

    fn execute_query(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        _timeout_ms: u64,
    ) -> AdapterResult<QueryOutcome> {
        let mut state = self.inner.lock();
        if !state.sessions.contains_key(handle.as_str()) {
            return Err(AdapterError::UnknownHandle(handle.to_string()));
        }
        if let Some(pattern) = state.fail_on.iter().find(|p| sql.contains(p.as_str())) {
            let pattern = pattern.clone();
            return Err(AdapterError::Query(format!(
                "injected failure on '{}'",
                pattern
            )));
        }
        state.executed.push(sql.to_string());
        Ok(QueryOutcome::default())
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> AdapterResult<()> {
        let mut state = self.inner.lock();
        match state.sessions.remove(handle.as_str()) {
            Some(_) => Ok(()),
            None => Err(AdapterError::UnknownHandle(handle.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AdapterConfig {
        AdapterConfig {
            name: "test".into(),
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            username: "app".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_null_adapter_accepts_everything() {
        let adapter = NullAdapter::new();
        let handle = adapter.connect(&config()).unwrap();
        let outcome = adapter
            .execute_query(&handle, "DROP TABLE users", 1000)
            .unwrap();
        assert_eq!(outcome.row_count, 0);
        adapter.disconnect(&handle).unwrap();
    }

    #[test]
    fn test_recording_adapter_records_in_order() {
        let adapter = RecordingAdapter::new();
        let handle = adapter.connect(&config()).unwrap();

        adapter.execute_query(&handle, "one", 1000).unwrap();
        adapter.execute_query(&handle, "two", 1000).unwrap();
        assert_eq!(adapter.executed(), vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_recording_adapter_injected_failure() {
        let adapter = RecordingAdapter::new();
        adapter.fail_on("DROP TABLE users");
        let handle = adapter.connect(&config()).unwrap();

        adapter.execute_query(&handle, "SELECT 1", 1000).unwrap();
        let err = adapter
            .execute_query(&handle, "DROP TABLE users;", 1000)
            .unwrap_err();
        assert!(matches!(err, AdapterError::Query(_)));
        // failed statements are not recorded
        assert_eq!(adapter.executed().len(), 1);
    }

    #[test]
    fn test_unknown_handle() {
        let adapter = RecordingAdapter::new();
        let bogus = ConnectionHandle::new("bogus");
        let err = adapter.execute_query(&bogus, "SELECT 1", 1000).unwrap_err();
        assert!(matches!(err, AdapterError::UnknownHandle(_)));
        assert!(adapter.disconnect(&bogus).is_err());
    }

    #[test]
    fn test_disconnect_closes_session() {
        let adapter = RecordingAdapter::new();
        let handle = adapter.connect(&config()).unwrap();
        assert_eq!(adapter.open_sessions(), 1);

        adapter.disconnect(&handle).unwrap();
        assert_eq!(adapter.open_sessions(), 0);
        assert!(adapter.execute_query(&handle, "SELECT 1", 1000).is_err());
    }
}
