//! Dependency-resolution capability backed by the repository index.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::core::ranking::rank_symbols;
use crate::io::index_store::IndexStore;

pub trait DependencyResolver: Send + Sync {
    /// Rank `symbols` by `weights` (descending, ties in input order).
    /// Wildcard imports are skipped.
    fn resolve(
        &self,
        symbols: &[String],
        weights: &BTreeMap<String, f64>,
        module: Option<&str>,
    ) -> Result<Vec<(String, f64)>>;

    /// Project file backing `symbol`, if the index knows one.
    fn path_for(&self, symbol: &str, module: Option<&str>) -> Result<Option<String>>;
}

/// Resolves symbols against the persisted repository index.
pub struct IndexResolver {
    store: Arc<dyn IndexStore>,
}

impl IndexResolver {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self { store }
    }
}

impl DependencyResolver for IndexResolver {
    fn resolve(
        &self,
        symbols: &[String],
        weights: &BTreeMap<String, f64>,
        module: Option<&str>,
    ) -> Result<Vec<(String, f64)>> {
        let named: Vec<String> = symbols
            .iter()
            .filter(|s| !s.ends_with(".*") && !s.is_empty())
            .cloned()
            .collect();
        let ranked = rank_symbols(&named, weights);
        debug!(symbols = ranked.len(), module = ?module, "ranked dependencies");
        Ok(ranked)
    }

    fn path_for(&self, symbol: &str, module: Option<&str>) -> Result<Option<String>> {
        let Some(index) = self.store.read()? else {
            return Ok(None);
        };
        Ok(index.path_for(symbol, module).map(str::to_string))
    }
}
