//! Set-difference bookkeeping against durable state.
//!
//! The object store is the ledger for ingestion (an artifact present means
//! the unit is done) and the warehouse audit table is the ledger for loading.
//! Both diffs are pure apart from the listing/query that feeds them.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::info;

use crate::models::FetchUnit;
use crate::store::ObjectStore;
use crate::warehouse::{TableRef, Warehouse};

/// Every key under `prefix`.
pub async fn list_existing(store: &dyn ObjectStore, prefix: &str) -> Result<BTreeSet<String>> {
    let keys = store.list(prefix).await?;
    info!(store = %store.describe(), prefix, count = keys.len(), "listed existing artifacts");
    Ok(keys.into_iter().collect())
}

/// Units whose artifact path is not in `existing`, deduplicated and sorted.
pub fn remaining(all_units: &[FetchUnit], existing: &BTreeSet<String>) -> Vec<FetchUnit> {
    all_units
        .iter()
        .filter(|unit| !existing.contains(&unit.artifact_path()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Candidates not yet present in `table.column`.
pub async fn missing_from_warehouse(
    warehouse: &dyn Warehouse,
    table: &TableRef,
    column: &str,
    candidates: &BTreeSet<String>,
) -> Result<BTreeSet<String>> {
    let present = warehouse.distinct_values(table, column).await?;
    let missing: BTreeSet<String> = candidates.difference(&present).cloned().collect();
    info!(
        table = %table,
        column,
        candidates = candidates.len(),
        missing = missing.len(),
        "compared candidates against warehouse"
    );
    Ok(missing)
}

/// Artifact paths recorded in the audit table, loaded or deleted.
///
/// An empty artifact is deleted from the bucket once its audit row lands, so
/// ingestion counts these paths as done too. Empty when the table does not
/// exist yet.
pub async fn audited_artifacts(
    warehouse: &dyn Warehouse,
    interactions: &TableRef,
) -> Result<BTreeSet<String>> {
    if !warehouse.table_exists(interactions).await? {
        return Ok(BTreeSet::new());
    }
    let audited = warehouse.distinct_values(interactions, "gcs_endpoint").await?;
    info!(table = %interactions, count = audited.len(), "listed audited artifacts");
    Ok(audited)
}
