//! IndexRepository and FindSimilar.

use std::sync::Arc;

use anyhow::Context;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{Params, Tool, ToolContext, ToolId, opt_str, str_param};
use crate::core::index::{SourceFile, build_index, terms_of};
use crate::io::Capabilities;
use crate::io::config::IndexConfig;
use crate::io::fs::FileSystem;
use crate::io::index_store::IndexStore;

const DEFAULT_LIMIT: u64 = 3;

/// Walks the repository, builds the index and persists it.
pub struct IndexRepository {
    fs: Arc<dyn FileSystem>,
    store: Arc<dyn IndexStore>,
    extensions: Vec<String>,
}

impl IndexRepository {
    pub fn new(caps: &Capabilities, config: &IndexConfig) -> Self {
        Self {
            fs: Arc::clone(&caps.fs),
            store: Arc::clone(&caps.index_store),
            extensions: config.extensions.clone(),
        }
    }
}

impl Tool for IndexRepository {
    fn id(&self) -> ToolId {
        ToolId::IndexRepository
    }

    fn run(&self, _params: &Params, ctx: &ToolContext) -> anyhow::Result<Params> {
        let paths = self
            .fs
            .list_files(&self.extensions)
            .context("list repository files")?;
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            ctx.cancel.check()?;
            match self.fs.read(&path) {
                Ok(content) => sources.push(SourceFile { path, content }),
                Err(err) => warn!(path = %path, err = %err, "skipping unreadable file"),
            }
        }
        let index = build_index(sources);
        self.store.write(&index).context("persist index")?;

        let tests = index.files.iter().filter(|f| f.is_test).count();
        let covered = index.files.iter().filter(|f| f.test_path.is_some()).count();
        info!(files = index.len(), tests, covered, "repository indexed");

        let mut out = Params::new();
        out.insert("indexed_files".to_string(), Value::from(index.len()));
        out.insert("test_files".to_string(), Value::from(tests));
        out.insert("covered_files".to_string(), Value::from(covered));
        Ok(out)
    }
}

/// Retrieves tested files similar to a target, with their test sources.
pub struct FindSimilar {
    fs: Arc<dyn FileSystem>,
    store: Arc<dyn IndexStore>,
}

impl FindSimilar {
    pub fn new(caps: &Capabilities) -> Self {
        Self {
            fs: Arc::clone(&caps.fs),
            store: Arc::clone(&caps.index_store),
        }
    }
}

impl Tool for FindSimilar {
    fn id(&self) -> ToolId {
        ToolId::FindSimilar
    }

    fn required_params(&self) -> &'static [&'static str] {
        &["path"]
    }

    fn run(&self, params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
        let path = str_param(params, "path")?;
        let limit = params
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_LIMIT) as usize;
        let mut out = Params::new();

        let Some(index) = self.store.read()? else {
            out.insert("index_available".to_string(), Value::Bool(false));
            out.insert("examples".to_string(), Value::Array(Vec::new()));
            return Ok(out);
        };

        let content = match opt_str(params, "content") {
            Some(content) => content.to_string(),
            None => self.fs.read(path)?,
        };
        let terms = terms_of(&content);
        let mut examples = Vec::new();
        for hit in index.similar(&terms, path, limit) {
            let Some(test_path) = hit.file.test_path.as_deref() else {
                continue;
            };
            match self.fs.read(test_path) {
                Ok(test_content) => examples.push(json!({
                    "source_path": hit.file.path,
                    "test_path": test_path,
                    "test_content": test_content,
                    "score": hit.score,
                })),
                Err(err) => warn!(path = %test_path, err = %err, "skipping unreadable example"),
            }
        }

        out.insert("index_available".to_string(), Value::Bool(true));
        out.insert("examples".to_string(), Value::Array(examples));
        Ok(out)
    }
}
