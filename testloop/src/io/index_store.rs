//! Persistence for the repository index (`.testloop/index.json` by default).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::index::{INDEX_VERSION, RepositoryIndex};

/// Narrow read/write contract for index persistence.
pub trait IndexStore: Send + Sync {
    /// `Ok(None)` when no index has been written yet.
    fn read(&self) -> Result<Option<RepositoryIndex>>;
    fn write(&self, index: &RepositoryIndex) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JsonIndexStore {
    path: PathBuf,
}

impl JsonIndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndexStore for JsonIndexStore {
    fn read(&self) -> Result<Option<RepositoryIndex>> {
        if !self.path.exists() {
            return Ok(None);
        }
        debug!(path = %self.path.display(), "loading index");
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read index {}", self.path.display()))?;
        let index: RepositoryIndex = serde_json::from_str(&contents)
            .with_context(|| format!("parse index {}", self.path.display()))?;
        if index.version != INDEX_VERSION {
            bail!(
                "index {} has version {}, expected {INDEX_VERSION}; re-run `testloop index`",
                self.path.display(),
                index.version
            );
        }
        debug!(files = index.len(), "index loaded");
        Ok(Some(index))
    }

    /// Atomically write the index (temp file + rename).
    fn write(&self, index: &RepositoryIndex) -> Result<()> {
        debug!(path = %self.path.display(), files = index.len(), "writing index");
        let mut buf = serde_json::to_string_pretty(index).context("serialize index")?;
        buf.push('\n');
        let parent = self
            .path
            .parent()
            .with_context(|| format!("index path missing parent {}", self.path.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, buf)
            .with_context(|| format!("write temp index {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replace index {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::index::{SourceFile, build_index};

    #[test]
    fn missing_index_reads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonIndexStore::new(temp.path().join("index.json"));
        assert!(store.read().expect("read").is_none());
    }

    #[test]
    fn written_index_reads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = JsonIndexStore::new(temp.path().join(".testloop/index.json"));
        let index = build_index(vec![SourceFile {
            path: "src/main/kotlin/a/Foo.kt".to_string(),
            content: "class Foo".to_string(),
        }]);
        store.write(&index).expect("write");
        assert_eq!(store.read().expect("read"), Some(index));
    }

    #[test]
    fn stale_version_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("index.json");
        fs::write(&path, r#"{"version":0,"files":[]}"#).expect("write");
        let err = JsonIndexStore::new(&path).read().expect_err("stale");
        assert!(err.to_string().contains("re-run"));
    }
}
