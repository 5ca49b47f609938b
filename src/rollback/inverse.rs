//! inverse statement synthesis
//!
//! The engine stores opaque queries, so inversion is best effort:
//! - CREATE inverts to a guarded DROP
//! - DROP inverts to the original CREATE when the change captured it
//! - ALTER and all DML carry no before-image, so they get a placeholder
//!   hint or are declared unrecoverable
//!
//! Placeholders are SQL comments. They are reported to the caller but
//! never sent to the adapter.

use crate::storage::types::{Change, ChangeOperation, ChangeType};

/// Best-effort inverse of one tracked change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inverse {
    /// an executable compensating statement
    Statement(String),
    /// a comment-only hint for manual repair, never executed
    Placeholder(String),
    /// no inverse exists and no useful hint can be given
    Unrecoverable(String),
}

impl Inverse {
    pub fn is_executable(&self) -> bool {
        matches!(self, Inverse::Statement(_))
    }
}

/// Synthesize the inverse of a change.
pub fn synthesize(change: &Change) -> Inverse {
    let table = change
        .table_name
        .as_deref()
        .unwrap_or(change.target.as_str());

    match (change.change_type, change.operation) {
        (ChangeType::Schema, ChangeOperation::Create) => {
            Inverse::Statement(format!("DROP TABLE IF EXISTS {};", table))
        }
        (ChangeType::Schema, ChangeOperation::Drop) => match &change.query {
            Some(query) if query.to_uppercase().contains("CREATE TABLE") => {
                Inverse::Statement(query.clone())
            }
            _ => Inverse::Unrecoverable(format!(
                "original CREATE statement for {} was not captured",
                table
            )),
        },
        (ChangeType::Schema, ChangeOperation::Alter) => Inverse::Unrecoverable(format!(
            "ALTER on {} cannot be inverted without the prior definition",
            table
        )),
        (_, ChangeOperation::Rollback) => {
            Inverse::Unrecoverable("rollback records are not re-inverted".to_string())
        }
        (ChangeType::Data, ChangeOperation::Insert) => Inverse::Placeholder(format!(
            "-- cannot invert INSERT without row identity; delete the inserted row(s) from {} manually",
            table
        )),
        (ChangeType::Data, ChangeOperation::Update) => Inverse::Placeholder(format!(
            "-- cannot invert UPDATE without before-images; restore {} from a backup",
            table
        )),
        (ChangeType::Data, ChangeOperation::Delete) => Inverse::Placeholder(format!(
            "-- cannot invert DELETE without before-images; restore {} from a backup",
            table
        )),
        // remaining combinations are malformed records; treat like DML
        (ChangeType::Data, _) | (ChangeType::Schema, _) => Inverse::Unrecoverable(format!(
            "no inverse for {} {} on {}",
            change.change_type, change.operation, table
        )),
    }
}
