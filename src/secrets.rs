//! Secret lookup.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::SecretsConfig;

pub trait SecretSource: Send + Sync {
    fn get_secret(&self, name: &str) -> Result<String>;
}

/// Reads secrets from environment variables.
///
/// `storage-access-key-id` is looked up as `STORAGE_ACCESS_KEY_ID`.
pub struct EnvSecrets;

impl EnvSecrets {
    pub fn var_name(name: &str) -> String {
        name.chars()
            .map(|c| match c {
                '-' | '.' | '/' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect()
    }
}

impl SecretSource for EnvSecrets {
    fn get_secret(&self, name: &str) -> Result<String> {
        let var = Self::var_name(name);
        std::env::var(&var)
            .with_context(|| format!("Secret '{}' not found (environment variable {} not set)", name, var))
    }
}

/// Reads secrets from files in a directory, one file per secret.
///
/// Matches how container platforms mount secret volumes. Surrounding
/// whitespace is trimmed.
pub struct FileSecrets {
    dir: PathBuf,
}

impl FileSecrets {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl SecretSource for FileSecrets {
    fn get_secret(&self, name: &str) -> Result<String> {
        if name.contains('/') || name.contains("..") {
            anyhow::bail!("Invalid secret name: '{}'", name);
        }
        let path = self.dir.join(name);
        let value = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secret '{}' from {}", name, path.display()))?;
        Ok(value.trim().to_string())
    }
}

pub fn from_config(config: &SecretsConfig) -> Box<dyn SecretSource> {
    match config {
        SecretsConfig::Env => Box::new(EnvSecrets),
        SecretsConfig::File { dir } => Box::new(FileSecrets::new(dir.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_name_mapping() {
        assert_eq!(
            EnvSecrets::var_name("storage-access-key-id"),
            "STORAGE_ACCESS_KEY_ID"
        );
        assert_eq!(EnvSecrets::var_name("gmail.pass"), "GMAIL_PASS");
    }

    #[test]
    fn test_env_missing_secret_errors() {
        let err = EnvSecrets
            .get_secret("checkmate-test-definitely-unset-secret")
            .unwrap_err();
        assert!(err.to_string().contains("CHECKMATE_TEST_DEFINITELY_UNSET_SECRET"));
    }

    #[test]
    fn test_file_secrets_trimmed() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("api-key"), "  s3cr3t\n").unwrap();
        let secrets = FileSecrets::new(tmp.path().to_path_buf());
        assert_eq!(secrets.get_secret("api-key").unwrap(), "s3cr3t");
        assert!(secrets.get_secret("missing").is_err());
        assert!(secrets.get_secret("../etc/passwd").is_err());
    }
}
