//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait is the handoff point between the ingestion and
//! load pipelines: raw artifacts are written by one and read, and sometimes
//! deleted, by the other. Keys are `/`-separated paths such as
//! `player/hikaru/games/2025/01`.
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`fs::FsObjectStore`] | Local directory tree |
//! | [`s3::S3ObjectStore`] | S3 REST API (AWS, MinIO, GCS interoperability) |
//! | [`memory::MemoryObjectStore`] | Tests |

pub mod fs;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::StorageConfig;
use crate::secrets::SecretSource;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    /// All keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn read_text(&self, path: &str) -> Result<String>;

    async fn write_text(&self, path: &str, content: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.list(path).await?.iter().any(|key| key == path))
    }
}

/// Build the configured object store.
///
/// `bucket_override` replaces the configured S3 bucket; it is ignored by the
/// filesystem backend.
pub fn from_config(
    config: &StorageConfig,
    secrets: &dyn SecretSource,
    bucket_override: Option<&str>,
) -> Result<Arc<dyn ObjectStore>> {
    match config {
        StorageConfig::Fs { root } => Ok(Arc::new(fs::FsObjectStore::new(root.clone()))),
        StorageConfig::S3(s3_config) => {
            let mut s3_config = s3_config.clone();
            if let Some(bucket) = bucket_override {
                s3_config.bucket = bucket.to_string();
            }
            Ok(Arc::new(s3::S3ObjectStore::new(s3_config, secrets)?))
        }
    }
}

/// Reject keys that are empty, absolute, or try to escape the bucket root.
pub(crate) fn validate_key(path: &str) -> Result<()> {
    if path.is_empty()
        || path.starts_with('/')
        || path.ends_with('/')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        anyhow::bail!("Invalid object key: '{}'", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("player/a/games/2024/01").is_ok());
        assert!(validate_key("leaderboards/2025-01-01/10-00-00").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("player/../secret").is_err());
        assert!(validate_key("player//x").is_err());
        assert!(validate_key("player/").is_err());
    }
}
