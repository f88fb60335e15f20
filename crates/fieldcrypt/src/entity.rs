//! The in-memory view of a row that the codec and hook read and mutate.
//!
//! Entities are owned by the storage layer. The hook only touches the columns
//! named by the annotation registry: the protected value and its shadow.

use std::collections::BTreeMap;

use thiserror::Error;

/// Errors raised when an entity rejects a column write.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    /// The entity has no column with this name.
    #[error("{kind} has no column {column}")]
    UnknownColumn { kind: String, column: String },

    /// The column cannot hold a null value.
    #[error("{kind}.{column} is not nullable")]
    NotNullable { kind: String, column: String },
}

/// Column-level access to an entity being written.
pub trait Entity {
    /// Entity kind used to look up encryptable fields (usually the table name).
    fn kind(&self) -> &str;

    /// Current value of `column`. `None` for null or unknown columns.
    fn get(&self, column: &str) -> Option<&str>;

    /// Overwrite `column`.
    ///
    /// # Errors
    ///
    /// Returns an [`EntityError`] if the column does not exist or rejects the value.
    fn set(&mut self, column: &str, value: Option<String>) -> Result<(), EntityError>;
}

/// A schemaless entity: a kind plus a map of nullable text columns.
///
/// Used for rows that have no dedicated type, such as those read by the backfill
/// job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    kind: String,
    columns: BTreeMap<String, Option<String>>,
}

impl Record {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: Option<&str>) -> Self {
        self.columns.insert(column.into(), value.map(str::to_owned));
        self
    }
}

impl Entity for Record {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(|v| v.as_deref())
    }

    fn set(&mut self, column: &str, value: Option<String>) -> Result<(), EntityError> {
        self.columns.insert(column.to_owned(), value);
        Ok(())
    }
}
