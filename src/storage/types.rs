//! core type-safe wrappers for the storage layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content hash of a serialized commit.
///
/// This makes sure we don't accidentally pass a tree ID where a commit ID
/// is expected. The inner value is the lowercase-hex SHA-256 of the
/// commit's serialized content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommitId(String);

impl CommitId {
    /// wrap an already-computed hash (or an id received from a caller)
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// get the full hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// short form of the commit ID
    pub fn short(&self) -> &str {
        if self.0.len() >= 8 {
            &self.0[..8]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash of a serialized snapshot manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeId(String);

impl TreeId {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated branch name.
///
/// Branch names become storage keys, so they have the same restrictions
/// the key-value layer enforces: no empty names, no path traversal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchName(String);

impl BranchName {
    /// the default branch name
    pub const MAIN: &'static str = "main";

    /// create a new BranchName, validating the input
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    /// create the main branch reference
    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// check if this is the main branch
    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated tag name, with the same restrictions as branch names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagName(String);

impl TagName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        validate_ref_name(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// shared validation for branch and tag names
fn validate_ref_name(name: &str) -> Result<(), InvalidNameError> {
    if name.is_empty() {
        return Err(InvalidNameError::Empty);
    }
    if name.len() > 128 {
        return Err(InvalidNameError::TooLong(name.len()));
    }
    if name.contains("..") || name.starts_with('/') || name.ends_with('/') {
        return Err(InvalidNameError::InvalidPath(name.to_string()));
    }
    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '/' && c != '.' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
        }
    }
    Ok(())
}

/// The unit of isolation: one commit graph exists per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidNameError> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        for (i, c) in id.chars().enumerate() {
            if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(id))
    }

    /// Generate a new ULID-based connection id.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// commit authorship, supplied by the caller and never validated here
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// create a new author
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default author for engine-generated commits
    pub fn system() -> Self {
        Self::new("revdb", "revdb@localhost")
    }
}

impl Default for Author {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// whether a change touched the schema or the data of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Schema,
    Data,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "SCHEMA"),
            Self::Data => write!(f, "DATA"),
        }
    }
}

/// the operation a change performed against the tracked database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeOperation {
    Create,
    Alter,
    Drop,
    Insert,
    Update,
    Delete,
    Rollback,
}

impl fmt::Display for ChangeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Rollback => "ROLLBACK",
        };
        write!(f, "{}", s)
    }
}

/// A tracked change against the external database.
///
/// Changes are produced by the diff engine or supplied directly by a caller
/// tracking a statement before commit. The `query` is opaque to the engine;
/// it is only replayed (or inverted) during rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub operation: ChangeOperation,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,
}

impl Change {
    /// create a schema change (CREATE, ALTER, DROP)
    pub fn schema(operation: ChangeOperation, table: impl Into<String>, query: Option<String>) -> Self {
        let table = table.into();
        Self {
            change_type: ChangeType::Schema,
            operation,
            target: table.clone(),
            table_name: Some(table.clone()),
            description: format!("{} table {}", operation, table),
            query,
            affected_rows: None,
        }
    }

    /// create a data change (INSERT, UPDATE, DELETE)
    pub fn data(
        operation: ChangeOperation,
        table: impl Into<String>,
        query: Option<String>,
        affected_rows: Option<u64>,
    ) -> Self {
        let table = table.into();
        let rows = affected_rows
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            change_type: ChangeType::Data,
            operation,
            target: table.clone(),
            table_name: Some(table.clone()),
            description: format!("{} {} row(s) in {}", operation, rows, table),
            query,
            affected_rows,
        }
    }

    /// check whether this change touched the given target
    pub fn touches(&self, target: &str) -> bool {
        self.target == target || self.table_name.as_deref() == Some(target)
    }

    /// the rollback record written when this change is undone
    pub fn as_rollback(&self) -> Self {
        let mut undone = self.clone();
        undone.operation = ChangeOperation::Rollback;
        undone.description = format!("Undone: {}", self.description);
        undone
    }
}

/// error type for invalid names (branches, tags, connections, keys)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::TooLong(len) => write!(f, "name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}
