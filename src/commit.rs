//! Durable commit of a load batch.
//!
//! Order is fixed: new games, then the audit rows, then purging of empty
//! artifacts. If either append fails nothing is deleted, so the next run sees
//! the same artifacts and retries them.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::migrate::Tables;
use crate::models::{ArtifactInteraction, GameRecord, InteractionAction};
use crate::store::ObjectStore;
use crate::warehouse::{to_row, Warehouse};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub games_appended: usize,
    pub interactions_appended: usize,
    pub artifacts_deleted: usize,
}

/// Append `new_records` and `interactions`, then delete the artifacts whose
/// interaction is `Deleted`.
pub async fn commit(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
    tables: &Tables,
    new_records: &[GameRecord],
    interactions: &[ArtifactInteraction],
) -> Result<CommitReport> {
    let mut report = CommitReport::default();

    if !new_records.is_empty() {
        let rows = new_records.iter().map(to_row).collect::<Result<Vec<_>>>()?;
        warehouse
            .append_rows(&tables.games, &rows)
            .await
            .with_context(|| format!("Failed to append games to {}", tables.games))?;
        report.games_appended = rows.len();
        info!(
            table = %tables.games,
            rows = rows.len(),
            partitions = distinct_dates(new_records).len(),
            "appended games"
        );
    }

    if !interactions.is_empty() {
        let rows = interactions.iter().map(to_row).collect::<Result<Vec<_>>>()?;
        warehouse
            .append_rows(&tables.interactions, &rows)
            .await
            .with_context(|| format!("Failed to append interactions to {}", tables.interactions))?;
        report.interactions_appended = rows.len();
        info!(table = %tables.interactions, rows = rows.len(), "appended interactions");
    }

    for interaction in interactions
        .iter()
        .filter(|i| i.action == InteractionAction::Deleted)
    {
        warn!(path = %interaction.artifact_path, "artifact has no games, deleting");
        store
            .delete(&interaction.artifact_path)
            .await
            .with_context(|| format!("Failed to delete {}", interaction.artifact_path))?;
        report.artifacts_deleted += 1;
    }

    Ok(report)
}

fn distinct_dates(records: &[GameRecord]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = records.iter().map(|r| r.game_date).collect();
    dates.sort();
    dates.dedup();
    dates
}
