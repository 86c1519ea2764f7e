//! TOML configuration.
//!
//! ```toml
//! [storage]
//! backend = "fs"
//! root = "./data/bucket"
//!
//! [warehouse]
//! path = "./data/warehouse.sqlite"
//! dataset = "chess_raw"
//! location = "EU"
//!
//! [api]
//! user_agent = "checkmate (contact: ops@example.com)"
//!
//! [run]
//! app_env = "PROD"
//! ```
//!
//! Every component receives the pieces of [`Config`] it needs at
//! construction; nothing is read from process-global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::settings::RunSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Run settings used when no scheduler message is supplied.
    #[serde(default)]
    pub run: RunSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local directory tree; object keys map to relative paths.
    Fs { root: PathBuf },
    /// S3 REST API. Also serves MinIO and the GCS interoperability endpoint.
    S3(S3StorageConfig),
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_access_key_secret")]
    pub access_key_secret: String,
    #[serde(default = "default_secret_key_secret")]
    pub secret_key_secret: String,
    /// Per-request timeout for storage calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_access_key_secret() -> String {
    "storage-access-key-id".to_string()
}
fn default_secret_key_secret() -> String {
    "storage-secret-access-key".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub path: PathBuf,
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default = "default_location")]
    pub location: String,
}

fn default_dataset() -> String {
    "chess_raw".to_string()
}
fn default_location() -> String {
    "EU".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.chess.com/pub".to_string()
}
fn default_user_agent() -> String {
    format!("checkmate/{}", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    /// Headers sent with every upstream request.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        vec![("User-Agent".to_string(), self.user_agent.clone())]
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    3_000
}
fn default_max_delay_ms() -> u64 {
    120_000
}
fn default_jitter_ms() -> u64 {
    1_000
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SecretsConfig {
    /// `get_secret("storage-access-key-id")` reads `STORAGE_ACCESS_KEY_ID`.
    #[default]
    Env,
    /// One file per secret, named after the secret, under `dir`.
    File { dir: PathBuf },
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_monitor_dataset")]
    pub dataset: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dataset: default_monitor_dataset(),
        }
    }
}

fn default_monitor_dataset() -> String {
    "run_monitor".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate retry
    if config.retry.max_retries == 0 {
        anyhow::bail!("retry.max_retries must be >= 1");
    }
    if config.retry.max_delay_ms < config.retry.base_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }

    // Validate api
    if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
    {
        anyhow::bail!("api.base_url must be an http(s) URL");
    }
    if config.api.user_agent.trim().is_empty() {
        anyhow::bail!("api.user_agent must not be empty");
    }

    // Validate storage
    if let StorageConfig::S3(ref s3) = config.storage {
        if s3.bucket.trim().is_empty() {
            anyhow::bail!("storage.bucket must not be empty");
        }
    }

    config.run.validate()?;

    Ok(config)
}
