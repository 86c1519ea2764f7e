//! Per-run settings and the scheduler message that carries them.
//!
//! A scheduled run receives a base64-encoded JSON document (the `MESSAGE`
//! environment variable or `--message`). Manual runs fall back to the
//! `[run]` table of the config file. Both decode into [`RunSettings`] and are
//! validated before any work starts.

use anyhow::{Context, Result};
use base64::Engine;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::enumerate::{last_complete_period, select_date_range, DateSelection};
use crate::error::Error;
use crate::models::{FetchUnit, Period};

/// Deployment environment, which also selects the run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AppEnv {
    /// Full run; the load pipeline commits.
    #[default]
    #[serde(rename = "PROD", alias = "prod")]
    Prod,
    /// Work list truncated to `test_volume`; the load pipeline does not commit.
    #[serde(rename = "TEST", alias = "test")]
    Test,
    /// Only `dev_testcase` is processed; the load pipeline does not commit.
    #[serde(rename = "DEV", alias = "dev")]
    Dev,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Prod => "PROD",
            AppEnv::Test => "TEST",
            AppEnv::Dev => "DEV",
        }
    }

    pub fn commits(&self) -> bool {
        matches!(self, AppEnv::Prod)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateMode {
    /// Last complete calendar month.
    #[default]
    Default,
    /// `manual_start_date` ..= `manual_end_date`.
    Manual,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunSettings {
    #[serde(default)]
    pub app_env: AppEnv,
    #[serde(default, rename = "script_setting")]
    pub date_mode: DateMode,
    #[serde(default)]
    pub manual_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub manual_end_date: Option<NaiveDate>,
    /// Month whose artifacts the load pipeline targets; defaults to the last complete month.
    #[serde(default)]
    pub date_endpoint: Option<Period>,
    /// Maximum number of units/artifacts processed in TEST mode.
    #[serde(default)]
    pub test_volume: Option<usize>,
    /// The single artifact path processed in DEV mode.
    #[serde(default)]
    pub dev_testcase: Option<String>,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub dataset_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl RunSettings {
    pub fn validate(&self) -> Result<(), Error> {
        if self.date_mode == DateMode::Manual {
            match (self.manual_start_date, self.manual_end_date) {
                (Some(start), Some(end)) if start > end => {
                    return Err(Error::Settings(format!(
                        "manual_start_date {} is after manual_end_date {}",
                        start, end
                    )));
                }
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(Error::Settings(
                        "script_setting 'manual' requires manual_start_date and manual_end_date"
                            .to_string(),
                    ));
                }
            }
        }

        match self.app_env {
            AppEnv::Test => {
                if self.test_volume.unwrap_or(0) == 0 {
                    return Err(Error::Settings(
                        "app_env TEST requires test_volume >= 1".to_string(),
                    ));
                }
            }
            AppEnv::Dev => {
                let testcase = self.dev_testcase.as_deref().ok_or_else(|| {
                    Error::Settings("app_env DEV requires dev_testcase".to_string())
                })?;
                FetchUnit::from_artifact_path(testcase)?;
            }
            AppEnv::Prod => {}
        }

        Ok(())
    }

    pub fn date_selection(&self) -> DateSelection {
        match (self.date_mode, self.manual_start_date, self.manual_end_date) {
            (DateMode::Manual, Some(start), Some(end)) => DateSelection::Manual { start, end },
            _ => DateSelection::Default,
        }
    }

    /// Inclusive date range targeted by the ingestion pipeline.
    pub fn date_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        select_date_range(&self.date_selection(), today)
    }

    /// Month whose artifacts the load pipeline targets.
    pub fn load_period(&self, today: NaiveDate) -> Period {
        self.date_endpoint
            .unwrap_or_else(|| last_complete_period(today))
    }

    /// The DEV-mode fetch unit, if one is configured.
    pub fn dev_unit(&self) -> Option<FetchUnit> {
        self.dev_testcase
            .as_deref()
            .and_then(|path| FetchUnit::from_artifact_path(path).ok())
    }
}

/// Decode a base64-encoded JSON scheduler message into validated settings.
pub fn decode_message(encoded: &str) -> Result<RunSettings> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .context("Scheduler message is not valid base64")?;
    let text = String::from_utf8(bytes).context("Scheduler message is not UTF-8")?;
    let settings: RunSettings =
        serde_json::from_str(&text).context("Scheduler message is not valid settings JSON")?;
    settings.validate()?;
    Ok(settings)
}
