//! Drop records the warehouse already has, then duplicates within the batch.
//!
//! The same game appears once per participant, so a batch built from several
//! players' archives routinely contains it twice. The warehouse does not
//! enforce uniqueness; this step does.

use std::collections::HashSet;

use anyhow::Result;
use tracing::info;

use crate::models::GameRecord;
use crate::warehouse::{TableRef, Warehouse};

/// Outcome of reconciling a candidate batch.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    pub records: Vec<GameRecord>,
    /// Candidates whose `game_id` was already in the warehouse.
    pub filtered_away: usize,
    /// Candidates dropped as repeats of an earlier candidate.
    pub duplicates_removed: usize,
}

/// Records from `candidates` whose `game_id` is not yet in `games_table`,
/// keeping only the first occurrence of each id.
pub async fn reconcile(
    warehouse: &dyn Warehouse,
    games_table: &TableRef,
    candidates: Vec<GameRecord>,
) -> Result<Reconciled> {
    let existing = warehouse.distinct_values(games_table, "game_id").await?;
    let total = candidates.len();

    let fresh: Vec<GameRecord> = candidates
        .into_iter()
        .filter(|record| !existing.contains(&record.game_id.to_string()))
        .collect();
    let filtered_away = total - fresh.len();

    let before_dedup = fresh.len();
    let records = dedup_first_seen(fresh);
    let duplicates_removed = before_dedup - records.len();

    info!(
        table = %games_table,
        candidates = total,
        existing = existing.len(),
        filtered_away,
        duplicates_removed,
        new_records = records.len(),
        "reconciled games against warehouse"
    );

    Ok(Reconciled {
        records,
        filtered_away,
        duplicates_removed,
    })
}

/// Keep the first record for each `game_id`, preserving order.
pub fn dedup_first_seen(records: Vec<GameRecord>) -> Vec<GameRecord> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.game_id))
        .collect()
}
