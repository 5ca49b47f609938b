//! Snapshots of the tracked database.
//!
//! A snapshot is the fully materialized state at a commit: a schema tree and
//! a data tree, each keyed by table name. All maps are `BTreeMap` so the
//! serialized form (and therefore the content hash) is deterministic.
//!
//! On disk a snapshot is a manifest of per-table object ids, so unchanged
//! tables are shared between commits rather than copied — the idempotent
//! object `put` deduplicates them. This keeps storage sub-linear in commit
//! count for the common case of commits touching few tables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::error::StorageResult;
use crate::storage::object::ObjectStore;
use crate::storage::types::{Change, ChangeOperation, ChangeType, TreeId};

/// One column of a tracked table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub data_type: String,
    pub nullable: bool,
}

/// Schema of a single table.
///
/// The engine does not parse SQL, so a change that carries no structural
/// detail (an `ALTER` with an opaque query) bumps `revision` instead; diff
/// and merge observe the bump the same way they would a column change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: BTreeMap<String, ColumnDef>,
    pub revision: u64,
    /// The original CREATE statement, when the tracking caller captured it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

/// Data of a single table: keyed rows plus a revision counter for data
/// changes that carry no row images.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: BTreeMap<String, serde_json::Value>,
    pub revision: u64,
}

/// The schema half of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaTree {
    pub tables: BTreeMap<String, TableSchema>,
}

/// The data half of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTree {
    pub tables: BTreeMap<String, TableData>,
}

/// Full materialized state at a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema: SchemaTree,
    pub data: DataTree,
}

impl Snapshot {
    /// The empty snapshot (root commit tree).
    pub fn empty() -> Self {
        Self::default()
    }

    /// All table names present in either tree, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schema.tables.keys().cloned().collect();
        for name in self.data.tables.keys() {
            if !self.schema.tables.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Check whether a table exists in either tree.
    pub fn has_table(&self, name: &str) -> bool {
        self.schema.tables.contains_key(name) || self.data.tables.contains_key(name)
    }

    /// The combined state of one table, for conflict comparison.
    pub fn table_value(&self, name: &str) -> serde_json::Value {
        serde_json::json!({
            "schema": self.schema.tables.get(name),
            "data": self.data.tables.get(name),
        })
    }

    /// Copy one table's state (or its absence) from another snapshot.
    pub fn set_table_from(&mut self, name: &str, other: &Snapshot) {
        match other.schema.tables.get(name) {
            Some(schema) => {
                self.schema.tables.insert(name.to_string(), schema.clone());
            }
            None => {
                self.schema.tables.remove(name);
            }
        }
        match other.data.tables.get(name) {
            Some(data) => {
                self.data.tables.insert(name.to_string(), data.clone());
            }
            None => {
                self.data.tables.remove(name);
            }
        }
    }

    /// Apply one tracked change to this snapshot.
    ///
    /// Rollback records never mutate the tree: compensation commits set
    /// their tree to the target commit's snapshot directly.
    pub fn apply_change(&mut self, change: &Change) {
        let table = change
            .table_name
            .clone()
            .unwrap_or_else(|| change.target.clone());

        match (change.change_type, change.operation) {
            (ChangeType::Schema, ChangeOperation::Create) => {
                self.schema.tables.insert(
                    table.clone(),
                    TableSchema {
                        definition: change.query.clone(),
                        ..Default::default()
                    },
                );
                self.data.tables.entry(table).or_default();
            }
            (ChangeType::Schema, ChangeOperation::Drop) => {
                self.schema.tables.remove(&table);
                self.data.tables.remove(&table);
            }
            (ChangeType::Schema, _) => {
                self.schema.tables.entry(table).or_default().revision += 1;
            }
            (ChangeType::Data, ChangeOperation::Rollback) => {}
            (ChangeType::Data, _) => {
                self.data.tables.entry(table).or_default().revision += 1;
            }
        }
    }

    /// Apply a sequence of changes in order.
    pub fn apply_changes(&mut self, changes: &[Change]) {
        for change in changes {
            self.apply_change(change);
        }
    }
}

/// On-disk form: per-table object ids instead of inline table state.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotManifest {
    schema: BTreeMap<String, String>,
    data: BTreeMap<String, String>,
}

/// Write a snapshot to the object store, returning its tree id.
pub fn write_snapshot(store: &ObjectStore, snapshot: &Snapshot) -> StorageResult<TreeId> {
    let mut manifest = SnapshotManifest {
        schema: BTreeMap::new(),
        data: BTreeMap::new(),
    };

    for (name, table) in &snapshot.schema.tables {
        let id = store.put_json(table)?;
        manifest.schema.insert(name.clone(), id);
    }
    for (name, table) in &snapshot.data.tables {
        let id = store.put_json(table)?;
        manifest.data.insert(name.clone(), id);
    }

    let id = store.put_json(&manifest)?;
    Ok(TreeId::new(id))
}

/// Read a snapshot back from its tree id.
pub fn read_snapshot(store: &ObjectStore, tree_id: &TreeId) -> StorageResult<Snapshot> {
    let manifest: SnapshotManifest = store.get_json(tree_id.as_str())?;

    let mut snapshot = Snapshot::empty();
    for (name, id) in &manifest.schema {
        let table: TableSchema = store.get_json(id)?;
        snapshot.schema.tables.insert(name.clone(), table);
    }
    for (name, id) in &manifest.data {
        let table: TableData = store.get_json(id)?;
        snapshot.data.tables.insert(name.clone(), table);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::{Keyspace, MemoryKv};
    use std::sync::Arc;

    fn setup() -> ObjectStore {
        let keys = Keyspace::new(Arc::new(MemoryKv::new()), "conn");
        ObjectStore::new(&keys)
    }

    fn create_users() -> Change {
        Change::schema(
            ChangeOperation::Create,
            "users",
            Some("CREATE TABLE users (id INT)".into()),
        )
    }

    #[test]
    fn test_apply_create_and_drop() {
        let mut snap = Snapshot::empty();

        snap.apply_change(&create_users());
        assert!(snap.has_table("users"));
        assert_eq!(
            snap.schema.tables["users"].definition.as_deref(),
            Some("CREATE TABLE users (id INT)")
        );

        snap.apply_change(&Change::schema(ChangeOperation::Drop, "users", None));
        assert!(!snap.has_table("users"));
    }

    #[test]
    fn test_apply_alter_bumps_revision() {
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());
        assert_eq!(snap.schema.tables["users"].revision, 0);

        snap.apply_change(&Change::schema(
            ChangeOperation::Alter,
            "users",
            Some("ALTER TABLE users ADD email TEXT".into()),
        ));
        assert_eq!(snap.schema.tables["users"].revision, 1);
    }

    #[test]
    fn test_apply_data_change() {
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());

        snap.apply_change(&Change::data(ChangeOperation::Insert, "users", None, Some(2)));
        assert_eq!(snap.data.tables["users"].revision, 1);
        // schema untouched by a data change
        assert_eq!(snap.schema.tables["users"].revision, 0);
    }

    #[test]
    fn test_table_names_and_value() {
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());
        snap.apply_change(&Change::schema(ChangeOperation::Create, "orders", None));

        assert_eq!(snap.table_names(), vec!["orders".to_string(), "users".to_string()]);

        let value = snap.table_value("users");
        assert!(value["schema"].is_object());
        let absent = snap.table_value("missing");
        assert!(absent["schema"].is_null());
    }

    #[test]
    fn test_write_read_roundtrip() {
        let store = setup();
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());
        snap.apply_change(&Change::data(ChangeOperation::Insert, "users", None, Some(1)));

        let tree_id = write_snapshot(&store, &snap).unwrap();
        let back = read_snapshot(&store, &tree_id).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_identical_snapshots_share_tree() {
        let store = setup();
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());

        let a = write_snapshot(&store, &snap).unwrap();
        let b = write_snapshot(&store, &snap.clone()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unchanged_tables_are_shared() {
        let store = setup();
        let mut snap = Snapshot::empty();
        snap.apply_change(&create_users());
        snap.apply_change(&Change::schema(ChangeOperation::Create, "orders", None));
        write_snapshot(&store, &snap).unwrap();
        let before = store.object_count().unwrap();

        // touch only one table: the other three table objects are reused
        snap.apply_change(&Change::data(ChangeOperation::Insert, "orders", None, Some(1)));
        write_snapshot(&store, &snap).unwrap();
        let after = store.object_count().unwrap();

        // one new table object plus one new manifest
        assert_eq!(after, before + 2);
    }
}
