//! In-memory [`Warehouse`] for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{validate_identifier, value_text, Row, TableRef, TableSchema, Warehouse};
use crate::error::Error;

struct MemoryTable {
    schema: TableSchema,
    partition_field: Option<String>,
    rows: Vec<Row>,
}

#[derive(Default)]
pub struct MemoryWarehouse {
    datasets: RwLock<BTreeMap<String, String>>,
    tables: RwLock<BTreeMap<TableRef, MemoryTable>>,
    failing: RwLock<BTreeSet<TableRef>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row in `table`; empty if the table does not exist.
    pub fn rows(&self, table: &TableRef) -> Vec<Row> {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn partition_field(&self, table: &TableRef) -> Option<String> {
        self.tables
            .read()
            .unwrap()
            .get(table)
            .and_then(|t| t.partition_field.clone())
    }

    pub fn location(&self, dataset: &str) -> Option<String> {
        self.datasets.read().unwrap().get(dataset).cloned()
    }

    /// Make every subsequent append to `table` fail.
    pub fn fail_appends_to(&self, table: &TableRef) {
        self.failing.write().unwrap().insert(table.clone());
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        Ok(self.datasets.read().unwrap().contains_key(dataset))
    }

    async fn create_dataset(&self, dataset: &str, location: &str) -> Result<()> {
        validate_identifier(dataset)?;
        self.datasets
            .write()
            .unwrap()
            .entry(dataset.to_string())
            .or_insert_with(|| location.to_string());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        Ok(self.tables.read().unwrap().contains_key(table))
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        partition_field: Option<&str>,
    ) -> Result<()> {
        table.validate()?;
        if !self.dataset_exists(&table.dataset).await? {
            bail!("Dataset '{}' does not exist", table.dataset);
        }
        if let Some(field) = partition_field {
            if schema.field(field).is_none() {
                return Err(Error::UnknownColumn {
                    table: table.to_string(),
                    column: field.to_string(),
                }
                .into());
            }
        }
        self.tables
            .write()
            .unwrap()
            .entry(table.clone())
            .or_insert_with(|| MemoryTable {
                schema: schema.clone(),
                partition_field: partition_field.map(str::to_string),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn distinct_values(&self, table: &TableRef, column: &str) -> Result<BTreeSet<String>> {
        let tables = self.tables.read().unwrap();
        let t = tables
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        if t.schema.field(column).is_none() {
            return Err(Error::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }
        Ok(t.rows
            .iter()
            .filter_map(|row| row.get(column).and_then(value_text))
            .collect())
    }

    async fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<()> {
        if self.failing.read().unwrap().contains(table) {
            bail!("Injected append failure for {}", table);
        }
        let mut tables = self.tables.write().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        for row in rows {
            t.schema.check_row(table, row)?;
        }
        t.rows.extend(rows.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{to_row, Field, FieldKind};
    use serde_json::json;

    async fn setup() -> (MemoryWarehouse, TableRef) {
        let wh = MemoryWarehouse::new();
        let table = TableRef::new("chess_raw", "games");
        wh.create_dataset("chess_raw", "EU").await.unwrap();
        let schema = TableSchema::new(vec![
            Field::required("game_id", FieldKind::Int64),
            Field::nullable("eco", FieldKind::String),
        ]);
        wh.create_table(&table, &schema, Some("game_id")).await.unwrap();
        (wh, table)
    }

    #[tokio::test]
    async fn test_append_and_distinct() {
        let (wh, table) = setup().await;
        let rows = vec![
            to_row(&json!({"game_id": 1, "eco": "a"})).unwrap(),
            to_row(&json!({"game_id": 2})).unwrap(),
            to_row(&json!({"game_id": 1, "eco": "b"})).unwrap(),
        ];
        wh.append_rows(&table, &rows).await.unwrap();
        let ids = wh.distinct_values(&table, "game_id").await.unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(wh.rows(&table).len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_row_appends_nothing() {
        let (wh, table) = setup().await;
        let rows = vec![
            to_row(&json!({"game_id": 1})).unwrap(),
            to_row(&json!({"eco": "missing id"})).unwrap(),
        ];
        assert!(wh.append_rows(&table, &rows).await.is_err());
        assert!(wh.rows(&table).is_empty());
    }

    #[tokio::test]
    async fn test_create_table_requires_dataset() {
        let wh = MemoryWarehouse::new();
        let table = TableRef::new("nope", "games");
        let schema = TableSchema::new(vec![Field::required("x", FieldKind::Int64)]);
        assert!(wh.create_table(&table, &schema, None).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_table_errors() {
        let wh = MemoryWarehouse::new();
        let table = TableRef::new("chess_raw", "games");
        assert!(wh.distinct_values(&table, "game_id").await.is_err());
    }
}
