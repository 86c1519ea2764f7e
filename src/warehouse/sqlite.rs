//! SQLite-backed warehouse.
//!
//! Datasets are catalogued in `_datasets`, tables in `_tables` together with
//! their schema. A table `chess_raw.games` is stored physically as
//! `chess_raw__games`; its partition field, if any, gets an index.
//!
//! Value mapping:
//!
//! | Field kind | SQLite type |
//! |------------|-------------|
//! | `String`, `Date`, `Timestamp` | `TEXT` |
//! | `Int64`, `Bool` | `INTEGER` |
//! | `Float64` | `REAL` |
//! | `Record` | `TEXT` (JSON) |

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use tracing::debug;

use super::{validate_identifier, FieldKind, FieldMode, Row, TableRef, TableSchema, Warehouse};
use crate::db;
use crate::error::Error;

pub struct SqliteWarehouse {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteWarehouse {
    /// Open (or create) the warehouse file and its catalog tables.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _datasets (
                name TEXT PRIMARY KEY,
                location TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _tables (
                dataset TEXT NOT NULL,
                name TEXT NOT NULL,
                partition_field TEXT,
                schema_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (dataset, name),
                FOREIGN KEY (dataset) REFERENCES _datasets(name)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn load_schema(&self, table: &TableRef) -> Result<TableSchema> {
        let schema_json: Option<String> =
            sqlx::query_scalar("SELECT schema_json FROM _tables WHERE dataset = ? AND name = ?")
                .bind(&table.dataset)
                .bind(&table.table)
                .fetch_optional(&self.pool)
                .await?;
        let schema_json = schema_json.ok_or_else(|| Error::UnknownTable(table.to_string()))?;
        serde_json::from_str(&schema_json)
            .with_context(|| format!("Corrupt catalog entry for {}", table))
    }
}

fn physical_name(table: &TableRef) -> String {
    format!("{}__{}", table.dataset, table.table)
}

fn sql_type(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::String | FieldKind::Date | FieldKind::Timestamp | FieldKind::Record(_) => {
            "TEXT"
        }
        FieldKind::Int64 | FieldKind::Bool => "INTEGER",
        FieldKind::Float64 => "REAL",
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64()),
        },
        Value::String(s) => query.bind(s.clone()),
        // Records and arrays are stored as JSON text
        other => query.bind(other.to_string()),
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _datasets WHERE name = ?")
            .bind(dataset)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn create_dataset(&self, dataset: &str, location: &str) -> Result<()> {
        validate_identifier(dataset)?;
        sqlx::query("INSERT OR IGNORE INTO _datasets (name, location, created_at) VALUES (?, ?, ?)")
            .bind(dataset)
            .bind(location)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create dataset {}", dataset))?;
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _tables WHERE dataset = ? AND name = ?")
                .bind(&table.dataset)
                .bind(&table.table)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn create_table(
        &self,
        table: &TableRef,
        schema: &TableSchema,
        partition_field: Option<&str>,
    ) -> Result<()> {
        table.validate()?;
        for field in &schema.fields {
            validate_identifier(&field.name)?;
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
        if !self.dataset_exists(&table.dataset).await? {
            anyhow::bail!("Dataset '{}' does not exist", table.dataset);
        }
        if self.table_exists(table).await? {
            return Ok(());
        }

        let physical = physical_name(table);
        let columns: Vec<String> = schema
            .fields
            .iter()
            .map(|f| {
                let not_null = match f.mode {
                    FieldMode::Required => " NOT NULL",
                    FieldMode::Nullable => "",
                };
                format!("\"{}\" {}{}", f.name, sql_type(&f.kind), not_null)
            })
            .collect();

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
            physical,
            columns.join(", ")
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create table {}", table))?;

        if let Some(field) = partition_field {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{}_{}\" ON \"{}\"(\"{}\")",
                physical, field, physical, field
            ))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO _tables (dataset, name, partition_field, schema_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&table.dataset)
        .bind(&table.table)
        .bind(partition_field)
        .bind(serde_json::to_string(schema)?)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(table = %table, physical = %physical, "created table");
        Ok(())
    }

    async fn distinct_values(&self, table: &TableRef, column: &str) -> Result<BTreeSet<String>> {
        let schema = self.load_schema(table).await?;
        if schema.field(column).is_none() {
            return Err(Error::UnknownColumn {
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }

        let sql = format!(
            "SELECT DISTINCT CAST(\"{col}\" AS TEXT) FROM \"{tbl}\" WHERE \"{col}\" IS NOT NULL",
            col = column,
            tbl = physical_name(table)
        );
        let values: Vec<String> = sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query distinct {} from {}", column, table))?;
        Ok(values.into_iter().collect())
    }

    async fn append_rows(&self, table: &TableRef, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let schema = self.load_schema(table).await?;
        for row in rows {
            schema.check_row(table, row)?;
        }

        let physical = physical_name(table);
        let mut tx = self.pool.begin().await?;

        for row in rows {
            // Column order follows the schema; every name was validated at creation.
            let columns: Vec<&str> = schema
                .fields
                .iter()
                .filter(|f| row.contains_key(&f.name))
                .map(|f| f.name.as_str())
                .collect();
            let sql = format!(
                "INSERT INTO \"{}\" ({}) VALUES ({})",
                physical,
                columns
                    .iter()
                    .map(|c| format!("\"{}\"", c))
                    .collect::<Vec<_>>()
                    .join(", "),
                vec!["?"; columns.len()].join(", ")
            );

            let mut query = sqlx::query(&sql);
            for column in &columns {
                query = bind_value(query, &row[*column]);
            }
            query
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to append row to {}", table))?;
        }

        tx.commit().await?;
        Ok(())
    }
}
