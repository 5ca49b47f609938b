//! structural diff between two snapshots
//!
//! A diff classifies every table as added, removed, or modified, and for
//! modified tables breaks the change down by column and row key. Output
//! vectors are sorted by name so the result is deterministic.
//!
//! The merge engine reuses this module: tables touched on both sides of a
//! merge are exactly the tables appearing in both diffs against the base.

use serde::{Deserialize, Serialize};

use crate::storage::snapshot::{Snapshot, TableData, TableSchema};

/// Column-level breakdown of a schema change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDelta {
    pub columns_added: Vec<String>,
    pub columns_removed: Vec<String>,
    pub columns_modified: Vec<String>,
    /// set when the revision counter moved without a column-level change,
    /// i.e. an opaque schema statement was tracked
    pub revision_changed: bool,
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.columns_added.is_empty()
            && self.columns_removed.is_empty()
            && self.columns_modified.is_empty()
            && !self.revision_changed
    }
}

/// Row-level breakdown of a data change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDelta {
    pub rows_added: Vec<String>,
    pub rows_removed: Vec<String>,
    pub rows_modified: Vec<String>,
    pub revision_changed: bool,
}

impl DataDelta {
    pub fn is_empty(&self) -> bool {
        self.rows_added.is_empty()
            && self.rows_removed.is_empty()
            && self.rows_modified.is_empty()
            && !self.revision_changed
    }
}

/// The change to one table between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DataDelta>,
}

/// The full diff between a base and a target snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// tables present only in the target
    pub added: Vec<TableDiff>,
    /// tables present in both but different
    pub modified: Vec<TableDiff>,
    /// tables present only in the base
    pub removed: Vec<TableDiff>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// All tables this diff touches, sorted.
    pub fn touched_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .map(|d| d.table.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

fn schema_delta(base: &TableSchema, target: &TableSchema) -> SchemaDelta {
    let mut delta = SchemaDelta::default();
    for (name, def) in &target.columns {
        match base.columns.get(name) {
            None => delta.columns_added.push(name.clone()),
            Some(old) if old != def => delta.columns_modified.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in base.columns.keys() {
        if !target.columns.contains_key(name) {
            delta.columns_removed.push(name.clone());
        }
    }
    delta.revision_changed = base.revision != target.revision
        || base.definition != target.definition;
    delta
}

fn data_delta(base: &TableData, target: &TableData) -> DataDelta {
    let mut delta = DataDelta::default();
    for (key, row) in &target.rows {
        match base.rows.get(key) {
            None => delta.rows_added.push(key.clone()),
            Some(old) if old != row => delta.rows_modified.push(key.clone()),
            Some(_) => {}
        }
    }
    for key in base.rows.keys() {
        if !target.rows.contains_key(key) {
            delta.rows_removed.push(key.clone());
        }
    }
    delta.revision_changed = base.revision != target.revision;
    delta
}

/// Diff two snapshots, base against target.
pub fn diff_snapshots(base: &Snapshot, target: &Snapshot) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();

    let mut names = base.table_names();
    names.extend(target.table_names());
    names.sort();
    names.dedup();

    for name in names {
        let in_base = base.has_table(&name);
        let in_target = target.has_table(&name);

        if in_target && !in_base {
            let schema = target.schema.tables.get(&name).map(|s| SchemaDelta {
                columns_added: s.columns.keys().cloned().collect(),
                revision_changed: s.revision != 0 || s.definition.is_some(),
                ..Default::default()
            });
            let data = target.data.tables.get(&name).map(|d| DataDelta {
                rows_added: d.rows.keys().cloned().collect(),
                revision_changed: d.revision != 0,
                ..Default::default()
            });
            diff.added.push(TableDiff {
                table: name,
                schema,
                data,
            });
        } else if in_base && !in_target {
            let schema = base.schema.tables.get(&name).map(|s| SchemaDelta {
                columns_removed: s.columns.keys().cloned().collect(),
                ..Default::default()
            });
            let data = base.data.tables.get(&name).map(|d| DataDelta {
                rows_removed: d.rows.keys().cloned().collect(),
                ..Default::default()
            });
            diff.removed.push(TableDiff {
                table: name,
                schema,
                data,
            });
        } else {
            let schema = match (base.schema.tables.get(&name), target.schema.tables.get(&name)) {
                (Some(a), Some(b)) => Some(schema_delta(a, b)).filter(|d| !d.is_empty()),
                (None, Some(b)) => Some(SchemaDelta {
                    columns_added: b.columns.keys().cloned().collect(),
                    revision_changed: true,
                    ..Default::default()
                }),
                (Some(a), None) => Some(SchemaDelta {
                    columns_removed: a.columns.keys().cloned().collect(),
                    revision_changed: true,
                    ..Default::default()
                }),
                (None, None) => None,
            };
            let data = match (base.data.tables.get(&name), target.data.tables.get(&name)) {
                (Some(a), Some(b)) => Some(data_delta(a, b)).filter(|d| !d.is_empty()),
                (None, Some(b)) => Some(DataDelta {
                    rows_added: b.rows.keys().cloned().collect(),
                    revision_changed: true,
                    ..Default::default()
                }),
                (Some(a), None) => Some(DataDelta {
                    rows_removed: a.rows.keys().cloned().collect(),
                    revision_changed: true,
                    ..Default::default()
                }),
                (None, None) => None,
            };
            if schema.is_some() || data.is_some() {
                diff.modified.push(TableDiff {
                    table: name,
                    schema,
                    data,
                });
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Change, ChangeOperation};

    fn with_users() -> Snapshot {
        let mut snap = Snapshot::empty();
        snap.apply_change(&Change::schema(
            ChangeOperation::Create,
            "users",
            Some("CREATE TABLE users (id INT)".into()),
        ));
        snap
    }

    #[test]
    fn test_identical_snapshots_empty_diff() {
        let snap = with_users();
        let diff = diff_snapshots(&snap, &snap.clone());
        assert!(diff.is_empty());
    }

    #[test]
    fn test_added_table() {
        let base = Snapshot::empty();
        let target = with_users();

        let diff = diff_snapshots(&base, &target);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].table, "users");
        assert!(diff.modified.is_empty());
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn test_removed_table() {
        let base = with_users();
        let target = Snapshot::empty();

        let diff = diff_snapshots(&base, &target);
        assert_eq!(diff.removed.len(), 1);
        assert_eq!(diff.removed[0].table, "users");
    }

    #[test]
    fn test_modified_table_revision() {
        let base = with_users();
        let mut target = base.clone();
        target.apply_change(&Change::schema(
            ChangeOperation::Alter,
            "users",
            Some("ALTER TABLE users ADD email TEXT".into()),
        ));

        let diff = diff_snapshots(&base, &target);
        assert_eq!(diff.modified.len(), 1);
        let schema = diff.modified[0].schema.as_ref().unwrap();
        assert!(schema.revision_changed);
        assert!(schema.columns_added.is_empty());
    }

    #[test]
    fn test_data_change_does_not_touch_schema() {
        let base = with_users();
        let mut target = base.clone();
        target.apply_change(&Change::data(ChangeOperation::Insert, "users", None, Some(1)));

        let diff = diff_snapshots(&base, &target);
        assert_eq!(diff.modified.len(), 1);
        assert!(diff.modified[0].schema.is_none());
        assert!(diff.modified[0].data.as_ref().unwrap().revision_changed);
    }

    #[test]
    fn test_column_level_delta() {
        use crate::storage::snapshot::ColumnDef;

        let mut base = with_users();
        base.schema.tables.get_mut("users").unwrap().columns.insert(
            "id".into(),
            ColumnDef {
                data_type: "INT".into(),
                nullable: false,
            },
        );
        let mut target = base.clone();
        let table = target.schema.tables.get_mut("users").unwrap();
        table.columns.insert(
            "email".into(),
            ColumnDef {
                data_type: "TEXT".into(),
                nullable: true,
            },
        );
        table.columns.get_mut("id").unwrap().nullable = true;

        let diff = diff_snapshots(&base, &target);
        let schema = diff.modified[0].schema.as_ref().unwrap();
        assert_eq!(schema.columns_added, vec!["email".to_string()]);
        assert_eq!(schema.columns_modified, vec!["id".to_string()]);
        assert!(schema.columns_removed.is_empty());
    }

    #[test]
    fn test_row_level_delta() {
        let mut base = with_users();
        let rows = &mut base.data.tables.get_mut("users").unwrap().rows;
        rows.insert("1".into(), serde_json::json!({"name": "ada"}));
        rows.insert("2".into(), serde_json::json!({"name": "bob"}));

        let mut target = base.clone();
        let rows = &mut target.data.tables.get_mut("users").unwrap().rows;
        rows.remove("2");
        rows.insert("1".into(), serde_json::json!({"name": "ada lovelace"}));
        rows.insert("3".into(), serde_json::json!({"name": "cyd"}));

        let diff = diff_snapshots(&base, &target);
        let data = diff.modified[0].data.as_ref().unwrap();
        assert_eq!(data.rows_added, vec!["3".to_string()]);
        assert_eq!(data.rows_modified, vec!["1".to_string()]);
        assert_eq!(data.rows_removed, vec!["2".to_string()]);
    }

    #[test]
    fn test_touched_tables_sorted() {
        let mut base = Snapshot::empty();
        base.apply_change(&Change::schema(ChangeOperation::Create, "zebra", None));
        let mut target = base.clone();
        target.apply_change(&Change::schema(ChangeOperation::Drop, "zebra", None));
        target.apply_change(&Change::schema(ChangeOperation::Create, "apple", None));

        let diff = diff_snapshots(&base, &target);
        assert_eq!(
            diff.touched_tables(),
            vec!["apple".to_string(), "zebra".to_string()]
        );
    }
}
