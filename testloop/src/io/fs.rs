//! File-system capability scoped to a repository root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<String, FsError>;
    /// Write `contents`, creating parent directories as needed.
    fn write(&self, path: &str, contents: &str) -> Result<(), FsError>;
    /// Repository-relative paths (with `/` separators) of files whose
    /// extension is in `extensions`, sorted.
    fn list_files(&self, extensions: &[String]) -> Result<Vec<String>, FsError>;
}

/// Local disk rooted at a repository. Relative paths resolve against the root.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
    exclude_dirs: Vec<String>,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>, exclude_dirs: &[String]) -> Self {
        Self {
            root: root.into(),
            exclude_dirs: exclude_dirs.to_vec(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    fn is_excluded(&self, name: &str) -> bool {
        self.exclude_dirs.iter().any(|d| d == name)
    }
}

fn io_err(op: &'static str, path: &Path, source: io::Error) -> FsError {
    FsError::Io {
        op,
        path: path.display().to_string(),
        source,
    }
}

impl FileSystem for LocalFs {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &str) -> Result<String, FsError> {
        let full = self.resolve(path);
        fs::read_to_string(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
            _ => io_err("read", &full, e),
        })
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), FsError> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err("create directory", parent, e))?;
        }
        let mut tmp_name = full.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, contents).map_err(|e| io_err("write temp file", &tmp_path, e))?;
        fs::rename(&tmp_path, &full).map_err(|e| io_err("replace", &full, e))?;
        debug!(path = %full.display(), bytes = contents.len(), "wrote file");
        Ok(())
    }

    fn list_files(&self, extensions: &[String]) -> Result<Vec<String>, FsError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || !self.is_excluded(&entry.file_name().to_string_lossy())
            });
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                io_err("walk", &path, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry
                .path()
                .extension()
                .is_some_and(|ext| extensions.iter().any(|want| ext == want.as_str()));
            if !matches {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(to_slash(rel));
            }
        }
        files.sort();
        Ok(files)
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
