//! Run monitor: one row per pipeline start, one per failure.
//!
//! Rows land in their own dataset so they survive independently of the
//! pipeline's tables. Delivering notifications from them is left to whatever
//! watches the warehouse.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::settings::AppEnv;
use crate::warehouse::{to_row, Field, FieldKind, TableRef, TableSchema, Warehouse};

pub const TRIGGERS_TABLE: &str = "run_triggers";
pub const FAILURES_TABLE: &str = "run_failures";

#[derive(Debug, Serialize)]
struct TriggerRow<'a> {
    run_id: &'a str,
    run_date: String,
    run_dt: String,
    pipeline: &'a str,
    environment: &'a str,
    hostname: &'a str,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct FailureRow<'a> {
    run_id: &'a str,
    run_failed_date: String,
    run_failed_dt: String,
    pipeline: &'a str,
    environment: &'a str,
    hostname: &'a str,
    error_message: String,
    error_chain: String,
}

fn triggers_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::required("run_id", FieldKind::String),
        Field::required("run_date", FieldKind::Date),
        Field::required("run_dt", FieldKind::Timestamp),
        Field::required("pipeline", FieldKind::String),
        Field::required("environment", FieldKind::String),
        Field::required("hostname", FieldKind::String),
        Field::required("version", FieldKind::String),
    ])
}

fn failures_schema() -> TableSchema {
    TableSchema::new(vec![
        Field::required("run_id", FieldKind::String),
        Field::required("run_failed_date", FieldKind::Date),
        Field::required("run_failed_dt", FieldKind::Timestamp),
        Field::required("pipeline", FieldKind::String),
        Field::required("environment", FieldKind::String),
        Field::required("hostname", FieldKind::String),
        Field::required("error_message", FieldKind::String),
        Field::required("error_chain", FieldKind::String),
    ])
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub struct RunMonitor {
    warehouse: Arc<dyn Warehouse>,
    triggers: TableRef,
    failures: TableRef,
    run_id: String,
    pipeline: String,
    environment: AppEnv,
    hostname: String,
}

impl RunMonitor {
    /// Ensure the monitor tables exist and record the start of a run.
    pub async fn start(
        warehouse: Arc<dyn Warehouse>,
        dataset: &str,
        location: &str,
        pipeline: &str,
        environment: AppEnv,
    ) -> Result<Self> {
        if !warehouse.dataset_exists(dataset).await? {
            warehouse.create_dataset(dataset, location).await?;
        }
        let triggers = TableRef::new(dataset, TRIGGERS_TABLE);
        let failures = TableRef::new(dataset, FAILURES_TABLE);
        if !warehouse.table_exists(&triggers).await? {
            warehouse
                .create_table(&triggers, &triggers_schema(), Some("run_date"))
                .await?;
        }
        if !warehouse.table_exists(&failures).await? {
            warehouse
                .create_table(&failures, &failures_schema(), Some("run_failed_date"))
                .await?;
        }

        let monitor = Self {
            warehouse,
            triggers,
            failures,
            run_id: Uuid::new_v4().to_string(),
            pipeline: pipeline.to_string(),
            environment,
            hostname: hostname(),
        };

        let now = Utc::now();
        let row = to_row(&TriggerRow {
            run_id: &monitor.run_id,
            run_date: now.date_naive().to_string(),
            run_dt: now.to_rfc3339(),
            pipeline: &monitor.pipeline,
            environment: monitor.environment.as_str(),
            hostname: &monitor.hostname,
            version: env!("CARGO_PKG_VERSION"),
        })?;
        monitor
            .warehouse
            .append_rows(&monitor.triggers, &[row])
            .await?;
        info!(run_id = %monitor.run_id, pipeline = %monitor.pipeline, "run trigger recorded");
        Ok(monitor)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn record_failure(&self, err: &anyhow::Error) -> Result<()> {
        let now = Utc::now();
        let chain = err
            .chain()
            .map(|cause| cause.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let row = to_row(&FailureRow {
            run_id: &self.run_id,
            run_failed_date: now.date_naive().to_string(),
            run_failed_dt: now.to_rfc3339(),
            pipeline: &self.pipeline,
            environment: self.environment.as_str(),
            hostname: &self.hostname,
            error_message: err.to_string(),
            error_chain: chain,
        })?;
        self.warehouse.append_rows(&self.failures, &[row]).await
    }

    /// Await `work`, recording a failure row if it errors. The pipeline's
    /// own error is returned either way.
    pub async fn watch<T, F>(&self, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = work.await;
        if let Err(ref err) = result {
            error!(run_id = %self.run_id, error = %format!("{:#}", err), "run failed");
            if let Err(record_err) = self.record_failure(err).await {
                error!(error = %record_err, "failed to record run failure");
            }
        }
        result
    }
}
