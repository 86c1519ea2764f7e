//! Wiring of capabilities for one run.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{ApiConfig, Config, MonitorConfig};
use crate::fetch::{Fetcher, ReqwestClient, RetryPolicy};
use crate::secrets;
use crate::settings::RunSettings;
use crate::store::{self, ObjectStore};
use crate::warehouse::sqlite::SqliteWarehouse;
use crate::warehouse::Warehouse;

/// Everything a pipeline needs, constructed once per run.
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub warehouse: Arc<dyn Warehouse>,
    pub fetcher: Fetcher,
    pub api: ApiConfig,
    pub dataset: String,
    pub location: String,
    pub monitor: MonitorConfig,
}

impl Context {
    /// Build production capabilities from the config file and run settings.
    ///
    /// `bucket_name`, `dataset_name` and `location` in the run settings
    /// override the config file.
    pub async fn from_config(config: &Config, settings: &RunSettings) -> Result<Self> {
        let warehouse: Arc<dyn Warehouse> =
            Arc::new(SqliteWarehouse::open(&config.warehouse.path).await?);
        Self::with_warehouse(config, settings, warehouse)
    }

    /// [`Context::from_config`] around an already opened warehouse.
    pub fn with_warehouse(
        config: &Config,
        settings: &RunSettings,
        warehouse: Arc<dyn Warehouse>,
    ) -> Result<Self> {
        let secrets = secrets::from_config(&config.secrets);
        let store = store::from_config(
            &config.storage,
            secrets.as_ref(),
            settings.bucket_name.as_deref(),
        )?;
        let client = Arc::new(ReqwestClient::new(&config.api)?);
        let fetcher = Fetcher::new(client, RetryPolicy::from_config(&config.retry));

        let ctx = Self {
            store,
            warehouse,
            fetcher,
            api: config.api.clone(),
            dataset: settings
                .dataset_name
                .clone()
                .unwrap_or_else(|| config.warehouse.dataset.clone()),
            location: settings
                .location
                .clone()
                .unwrap_or_else(|| config.warehouse.location.clone()),
            monitor: config.monitor.clone(),
        };

        info!(
            store = %ctx.store.describe(),
            warehouse = %ctx.warehouse.describe(),
            dataset = %ctx.dataset,
            "context ready"
        );
        Ok(ctx)
    }
}
