//! Ingestion pipeline: upstream API → object store.
//!
//! 1. Fetch the current leaderboards and keep a timestamped snapshot.
//! 2. Build the roster and the fetch units for the requested months.
//! 3. Diff against the artifacts already in the bucket or in the audit table.
//! 4. Fetch and write each remaining unit, one at a time.
//!
//! A unit whose fetch fails is skipped; it is still missing from the bucket,
//! so the next run retries it.

use std::collections::BTreeSet;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::context::Context;
use crate::enumerate::{complete_periods, fetch_units, top_players};
use crate::error::Error;
use crate::ledger;
use crate::migrate::Tables;
use crate::models::{FetchUnit, Period, PLAYER_PREFIX};
use crate::settings::{AppEnv, RunSettings};

pub const LEADERBOARDS_PREFIX: &str = "leaderboards/";

/// The work an ingestion run would do.
#[derive(Debug, Clone)]
pub struct IngestPlan {
    pub players: usize,
    pub periods: Vec<Period>,
    /// Units before diffing against the bucket.
    pub planned: usize,
    pub already_present: usize,
    pub remaining: Vec<FetchUnit>,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub snapshot_path: String,
    pub players: usize,
    pub planned: usize,
    pub already_present: usize,
    pub written: usize,
    /// Units whose fetch gave up; retried on the next run.
    pub skipped: usize,
    /// Units that appeared in the bucket while this run was working.
    pub raced: usize,
}

/// Object-store path of a leaderboards snapshot taken at `now`.
pub fn snapshot_path(now: DateTime<Utc>) -> String {
    format!(
        "{}{}/{}",
        LEADERBOARDS_PREFIX,
        now.format("%Y-%m-%d"),
        now.format("%H-%M-%S")
    )
}

/// Upstream URL of a unit's monthly archive.
pub fn unit_url(base_url: &str, unit: &FetchUnit) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), unit.artifact_path())
}

/// Artifact paths that need no fetch: present in the bucket, or already
/// loaded (empty artifacts are deleted after loading).
async fn existing_artifacts(ctx: &Context) -> Result<BTreeSet<String>> {
    let mut existing = ledger::list_existing(ctx.store.as_ref(), PLAYER_PREFIX).await?;
    let tables = Tables::new(&ctx.dataset);
    let audited = ledger::audited_artifacts(ctx.warehouse.as_ref(), &tables.interactions).await?;
    existing.extend(audited);
    Ok(existing)
}

async fn fetch_leaderboards(ctx: &Context) -> Result<String> {
    let url = format!("{}/leaderboards", ctx.api.base_url.trim_end_matches('/'));
    ctx.fetcher
        .fetch(&url, &ctx.api.request_headers())
        .await
        .ok_or_else(|| anyhow::anyhow!("Leaderboards unavailable at {}", url))
}

fn build_plan(
    leaderboards_json: &str,
    settings: &RunSettings,
    existing: &BTreeSet<String>,
    today: chrono::NaiveDate,
) -> Result<IngestPlan> {
    let roster = top_players(leaderboards_json)?;
    let (start, end) = settings.date_range(today);
    let periods = complete_periods(start, end);

    let all_units = match settings.app_env {
        AppEnv::Dev => settings.dev_unit().into_iter().collect(),
        AppEnv::Prod | AppEnv::Test => fetch_units(&roster, &periods),
    };
    let planned = all_units.len();

    let mut remaining = ledger::remaining(&all_units, existing);
    let already_present = planned - remaining.len();
    if let (AppEnv::Test, Some(volume)) = (settings.app_env, settings.test_volume) {
        remaining.truncate(volume);
    }

    info!(
        app_env = settings.app_env.as_str(),
        players = roster.len(),
        start = %start,
        end = %end,
        periods = periods.len(),
        planned,
        already_present,
        remaining = remaining.len(),
        "ingestion plan"
    );

    Ok(IngestPlan {
        players: roster.len(),
        periods,
        planned,
        already_present,
        remaining,
    })
}

/// Work out the remaining units without fetching any archive or writing.
pub async fn plan(ctx: &Context, settings: &RunSettings, now: DateTime<Utc>) -> Result<IngestPlan> {
    let leaderboards = fetch_leaderboards(ctx).await?;
    let existing = existing_artifacts(ctx).await?;
    build_plan(&leaderboards, settings, &existing, now.date_naive())
}

pub async fn run_ingest(ctx: &Context, settings: &RunSettings) -> Result<IngestReport> {
    run_ingest_at(ctx, settings, Utc::now()).await
}

/// [`run_ingest`] with an explicit clock.
pub async fn run_ingest_at(
    ctx: &Context,
    settings: &RunSettings,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    let leaderboards = fetch_leaderboards(ctx).await?;
    let snapshot = snapshot_path(now);
    ctx.store
        .write_text(&snapshot, &leaderboards)
        .await
        .with_context(|| format!("Failed to write leaderboards snapshot {}", snapshot))?;
    info!(path = %snapshot, "stored leaderboards snapshot");

    let existing = existing_artifacts(ctx).await?;
    let plan = build_plan(&leaderboards, settings, &existing, now.date_naive())?;

    let mut report = IngestReport {
        snapshot_path: snapshot,
        players: plan.players,
        planned: plan.planned,
        already_present: plan.already_present,
        ..Default::default()
    };

    let headers = ctx.api.request_headers();
    let total = plan.remaining.len();
    for (i, unit) in plan.remaining.iter().enumerate() {
        let path = unit.artifact_path();

        if ctx.store.exists(&path).await? {
            warn!(path = %path, "artifact appeared since listing, skipping");
            report.raced += 1;
            continue;
        }

        let url = unit_url(&ctx.api.base_url, unit);
        let Some(body) = ctx.fetcher.fetch(&url, &headers).await else {
            report.skipped += 1;
            continue;
        };

        serde_json::from_str::<serde_json::Value>(&body)
            .map_err(|e| Error::malformed(&path, format!("upstream body is not JSON: {}", e)))?;

        ctx.store
            .write_text(&path, &body)
            .await
            .with_context(|| format!("Failed to write artifact {}", path))?;
        report.written += 1;
        info!(path = %path, progress = i + 1, total, "stored artifact");
    }

    info!(
        written = report.written,
        skipped = report.skipped,
        raced = report.raced,
        "ingestion complete"
    );
    Ok(report)
}
