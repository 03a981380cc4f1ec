use std::collections::{BTreeMap, HashSet};

/// Default relevance for symbols with no recorded usage weight.
pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Rank `symbols` by descending weight.
///
/// Duplicates keep their first occurrence. The sort is stable, so equal
/// scores keep the input order.
pub fn rank_symbols(symbols: &[String], weights: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut seen = HashSet::new();
    let mut ranked: Vec<(String, f64)> = symbols
        .iter()
        .filter(|symbol| seen.insert(symbol.as_str()))
        .map(|symbol| {
            let score = weights.get(symbol).copied().unwrap_or(DEFAULT_WEIGHT);
            (symbol.clone(), score)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
