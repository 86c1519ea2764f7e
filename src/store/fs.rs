use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use walkdir::WalkDir;

use super::{validate_key, ObjectStore};

/// Suffix of in-flight writes; never listed.
const PARTIAL_SUFFIX: &str = ".partial";

/// Object store rooted at a local directory.
///
/// Writes go to a sibling `*.partial` file first and are renamed into place,
/// so an interrupted write never leaves a truncated artifact behind.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Only walk the deepest directory the prefix pins down.
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.root.join(dir_part)
        };
        if !start.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&start) {
            let entry = entry.with_context(|| format!("Failed to walk {}", start.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(key) = relative_key(&self.root, entry.path()) else {
                continue;
            };
            if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }

    async fn read_text(&self, path: &str) -> Result<String> {
        let file = self.object_path(path)?;
        tokio::fs::read_to_string(&file)
            .await
            .with_context(|| format!("Failed to read object {}", path))
    }

    async fn write_text(&self, path: &str, content: &str) -> Result<()> {
        let file = self.object_path(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let partial = PathBuf::from(format!("{}{}", file.display(), PARTIAL_SUFFIX));
        tokio::fs::write(&partial, content)
            .await
            .with_context(|| format!("Failed to write object {}", path))?;
        tokio::fs::rename(&partial, &file)
            .await
            .with_context(|| format!("Failed to finalize object {}", path))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.object_path(path)?;
        tokio::fs::remove_file(&file)
            .await
            .with_context(|| format!("Failed to delete object {}", path))
    }
}
