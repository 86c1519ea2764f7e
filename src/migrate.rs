//! Warehouse schema bootstrap.
//!
//! Creates the dataset and the two tables the load pipeline writes to.
//! Safe to run on every start; existing objects are left untouched.

use anyhow::Result;
use tracing::info;

use crate::warehouse::{Field, FieldKind, TableRef, TableSchema, Warehouse};

pub const GAMES_TABLE: &str = "games";
pub const INTERACTIONS_TABLE: &str = "loading_completed";

/// The tables of one dataset.
#[derive(Debug, Clone)]
pub struct Tables {
    pub games: TableRef,
    pub interactions: TableRef,
}

impl Tables {
    pub fn new(dataset: &str) -> Self {
        Self {
            games: TableRef::new(dataset, GAMES_TABLE),
            interactions: TableRef::new(dataset, INTERACTIONS_TABLE),
        }
    }
}

fn player_side() -> FieldKind {
    FieldKind::Record(vec![
        Field::nullable("uuid", FieldKind::String),
        Field::required("username", FieldKind::String),
        Field::required("rating", FieldKind::Int64),
        Field::required("result", FieldKind::String),
    ])
}

pub fn games_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::required("game_id", FieldKind::Int64),
        Field::required("url", FieldKind::String),
        Field::required("game_date", FieldKind::Date),
        Field::required("ingested_dt", FieldKind::Timestamp),
        Field::nullable("time_control", FieldKind::String),
        Field::required("end_time", FieldKind::Int64),
        Field::nullable("rated", FieldKind::Bool),
        Field::nullable("time_class", FieldKind::String),
        Field::nullable("rules", FieldKind::String),
        Field::required("white", player_side()),
        Field::required("black", player_side()),
        Field::nullable(
            "accuracies",
            FieldKind::Record(vec![
                Field::nullable("white", FieldKind::Float64),
                Field::nullable("black", FieldKind::Float64),
            ]),
        ),
        Field::required("eco", FieldKind::String),
        Field::required("opening", FieldKind::String),
    ])
}

pub fn interactions_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::required("gcs_endpoint", FieldKind::String),
        Field::required("gcs_game_month", FieldKind::Date),
        Field::required("gcs_object_interaction_dt", FieldKind::Timestamp),
        Field::required("action_taken", FieldKind::String),
    ])
}

/// Create the dataset and both tables if they do not exist yet.
pub async fn ensure_schema(warehouse: &dyn Warehouse, dataset: &str, location: &str) -> Result<Tables> {
    let tables = Tables::new(dataset);

    if !warehouse.dataset_exists(dataset).await? {
        warehouse.create_dataset(dataset, location).await?;
        info!(dataset, location, "created dataset");
    }

    if !warehouse.table_exists(&tables.games).await? {
        warehouse
            .create_table(&tables.games, &games_schema(), Some("game_date"))
            .await?;
        info!(table = %tables.games, "created table");
    }

    if !warehouse.table_exists(&tables.interactions).await? {
        warehouse
            .create_table(
                &tables.interactions,
                &interactions_schema(),
                Some("gcs_game_month"),
            )
            .await?;
        info!(table = %tables.interactions, "created table");
    }

    Ok(tables)
}
