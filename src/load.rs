//! Load pipeline: object store → warehouse.
//!
//! Targets one month of player artifacts. Artifacts already recorded in the
//! audit table are skipped; the rest are transformed in path order,
//! reconciled against the games table and committed.

use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::commit::{commit, CommitReport};
use crate::context::Context;
use crate::ledger;
use crate::migrate::ensure_schema;
use crate::models::{FetchUnit, Period, TransformOutcome, PLAYER_PREFIX};
use crate::reconcile::reconcile;
use crate::settings::{AppEnv, RunSettings};
use crate::transform::transform;

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub period: Period,
    /// Player artifacts for the period found in the bucket.
    pub artifacts_listed: usize,
    /// Artifacts processed in this run.
    pub processed: usize,
    pub records_transformed: usize,
    pub new_records: usize,
    pub filtered_away: usize,
    pub duplicates_removed: usize,
    pub empty_artifacts: usize,
    /// `None` for TEST and DEV runs, which never commit.
    pub commit: Option<CommitReport>,
}

fn in_period(path: &str, period: Period) -> bool {
    FetchUnit::from_artifact_path(path)
        .map(|unit| unit.period == period)
        .unwrap_or(false)
}

pub async fn run_load(ctx: &Context, settings: &RunSettings) -> Result<LoadReport> {
    run_load_at(ctx, settings, Utc::now()).await
}

/// [`run_load`] with an explicit clock.
pub async fn run_load_at(
    ctx: &Context,
    settings: &RunSettings,
    now: DateTime<Utc>,
) -> Result<LoadReport> {
    let tables = ensure_schema(ctx.warehouse.as_ref(), &ctx.dataset, &ctx.location).await?;
    let period = settings.load_period(now.date_naive());

    let listed: BTreeSet<String> = ledger::list_existing(ctx.store.as_ref(), PLAYER_PREFIX)
        .await?
        .into_iter()
        .filter(|path| in_period(path, period))
        .collect();
    let artifacts_listed = listed.len();

    let pending: Vec<String> = match settings.app_env {
        AppEnv::Dev => settings.dev_testcase.iter().cloned().collect(),
        AppEnv::Prod | AppEnv::Test => {
            let missing = ledger::missing_from_warehouse(
                ctx.warehouse.as_ref(),
                &tables.interactions,
                "gcs_endpoint",
                &listed,
            )
            .await?;
            let mut pending: Vec<String> = missing.into_iter().collect();
            if let (AppEnv::Test, Some(volume)) = (settings.app_env, settings.test_volume) {
                pending.truncate(volume);
            }
            pending
        }
    };

    info!(
        app_env = settings.app_env.as_str(),
        period = %period,
        listed = artifacts_listed,
        pending = pending.len(),
        "load plan"
    );

    let mut candidates = Vec::new();
    let mut interactions = Vec::with_capacity(pending.len());
    let mut empty_artifacts = 0;
    for path in &pending {
        let content = ctx
            .store
            .read_text(path)
            .await
            .with_context(|| format!("Failed to read artifact {}", path))?;
        let (outcome, interaction) = transform(path, &content, now)?;
        match outcome {
            TransformOutcome::Records(records) => {
                info!(path = %path, games = records.len(), "transformed artifact");
                candidates.extend(records);
            }
            TransformOutcome::Empty => {
                warn!(path = %path, "artifact has no games");
                empty_artifacts += 1;
            }
        }
        interactions.push(interaction);
    }

    let records_transformed = candidates.len();
    let reconciled = reconcile(ctx.warehouse.as_ref(), &tables.games, candidates).await?;

    let commit_report = if settings.app_env.commits() {
        let report = commit(
            ctx.store.as_ref(),
            ctx.warehouse.as_ref(),
            &tables,
            &reconciled.records,
            &interactions,
        )
        .await?;
        info!(
            games = report.games_appended,
            interactions = report.interactions_appended,
            deleted = report.artifacts_deleted,
            "load committed"
        );
        Some(report)
    } else {
        info!(
            app_env = settings.app_env.as_str(),
            new_records = reconciled.records.len(),
            interactions = interactions.len(),
            "dry run, nothing committed"
        );
        None
    };

    Ok(LoadReport {
        period,
        artifacts_listed,
        processed: pending.len(),
        records_transformed,
        new_records: reconciled.records.len(),
        filtered_away: reconciled.filtered_away,
        duplicates_removed: reconciled.duplicates_removed,
        empty_artifacts,
        commit: commit_report,
    })
}
