//! Warehouse abstraction.
//!
//! The warehouse holds the analytical tables: normalized games and the audit
//! ledger of artifact interactions. Tables live inside datasets and are
//! addressed with a [`TableRef`].
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`sqlite::SqliteWarehouse`] | Local SQLite file via `sqlx` |
//! | [`memory::MemoryWarehouse`] | Tests and dry runs |
//!
//! Rows are JSON objects keyed by column name. Nested `Record` columns carry
//! JSON objects; the SQLite backend stores them as JSON text.

pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

pub type Row = Map<String, Value>;

/// Fully qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            table: table.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        validate_identifier(&self.dataset)?;
        validate_identifier(&self.table)
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    String,
    Int64,
    Float64,
    Bool,
    Date,
    Timestamp,
    Record(Vec<Field>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub mode: FieldMode,
}

impl Field {
    pub fn required(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mode: FieldMode::Required,
        }
    }

    pub fn nullable(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            mode: FieldMode::Nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a row against the schema: every key must be a declared column
    /// and every required column must be present and non-null.
    pub fn check_row(&self, table: &TableRef, row: &Row) -> Result<(), Error> {
        for key in row.keys() {
            if self.field(key).is_none() {
                return Err(Error::UnknownColumn {
                    table: table.to_string(),
                    column: key.clone(),
                });
            }
        }
        for field in &self.fields {
            if field.mode == FieldMode::Required
                && row.get(&field.name).map_or(true, Value::is_null)
            {
                return Err(Error::malformed(
                    &table.to_string(),
                    format!("required column '{}' is missing", field.name),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    async fn create_dataset(&self, dataset: &str, location: &str) -> Result<()>;

    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// Create `table` with `schema`, optionally partitioned on one of its columns.
    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        partition_field: Option<&str>,
    ) -> Result<()>;

    /// Distinct values of `column`, rendered as text.
    ///
    /// Integers render in decimal, so `game_id` values compare directly with
    /// `i64::to_string`.
    async fn distinct_values(&self, table: &TableRef, column: &str) -> Result<BTreeSet<String>>;

    /// Append rows. A failure leaves none of the rows visible.
    async fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<()>;
}

/// Serialize a value into a warehouse row.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("Expected a JSON object row, got {}", other),
    }
}

/// Text rendering used by [`Warehouse::distinct_values`].
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1".to_string() } else { "0".to_string() }),
        other => Some(other.to_string()),
    }
}

/// Dataset, table and column names: ASCII letters, digits and `_`, not
/// starting with a digit.
pub fn validate_identifier(name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}
