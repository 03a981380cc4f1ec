//! Repository index: the lookup structure built by the Index step.
//!
//! Construction and queries are pure; walking the repository and persisting
//! the index live in `io/`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::test_path::{is_test_path, test_path_for};

pub const INDEX_VERSION: u32 = 1;

/// Source file handed to [`build_index`]: repository-relative path plus content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedFile {
    /// Repository-relative path with `/` separators.
    pub path: String,
    /// Package/module inferred from the path (`com.acme.billing`), may be empty.
    pub module: String,
    pub is_test: bool,
    /// For non-test files: the indexed test covering this file, if any.
    #[serde(default)]
    pub test_path: Option<String>,
    /// `module.Stem` for non-test files.
    #[serde(default)]
    pub qualified_name: Option<String>,
    #[serde(default)]
    pub terms: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub version: u32,
    pub files: Vec<IndexedFile>,
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarFile<'a> {
    pub file: &'a IndexedFile,
    pub score: f64,
}

/// Build an index from repository files. Output order follows path order.
pub fn build_index(mut sources: Vec<SourceFile>) -> RepositoryIndex {
    sources.sort_by(|a, b| a.path.cmp(&b.path));
    let present: BTreeSet<&str> = sources.iter().map(|s| s.path.as_str()).collect();

    let files = sources
        .iter()
        .map(|source| {
            let path = Path::new(&source.path);
            let is_test = is_test_path(path);
            let module = module_of(&source.path);
            let (test_path, qualified_name) = if is_test {
                (None, None)
            } else {
                let candidate = normalize(&test_path_for(path).to_string_lossy());
                let test_path = present.contains(candidate.as_str()).then_some(candidate);
                (test_path, Some(qualify(&module, path)))
            };
            IndexedFile {
                path: source.path.clone(),
                module,
                is_test,
                test_path,
                qualified_name,
                terms: terms_of(&source.content),
            }
        })
        .collect();

    RepositoryIndex {
        version: INDEX_VERSION,
        files,
    }
}

impl RepositoryIndex {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&IndexedFile> {
        let path = normalize(path);
        self.files.iter().find(|f| f.path == path)
    }

    /// Map of fully-qualified name to path for every non-test file.
    pub fn symbol_table(&self) -> BTreeMap<&str, &str> {
        self.files
            .iter()
            .filter_map(|f| f.qualified_name.as_deref().map(|q| (q, f.path.as_str())))
            .collect()
    }

    /// Resolve a symbol to a file path.
    ///
    /// Fully-qualified names match exactly. Simple names match by file stem,
    /// preferring a file in `module` when several share the stem.
    pub fn path_for(&self, symbol: &str, module: Option<&str>) -> Option<&str> {
        let sources = || self.files.iter().filter(|f| !f.is_test);
        if let Some(hit) = sources().find(|f| f.qualified_name.as_deref() == Some(symbol)) {
            return Some(hit.path.as_str());
        }
        let simple = symbol.rsplit('.').next().unwrap_or(symbol);
        let mut candidates = sources().filter(|f| stem_of(&f.path) == simple);
        let first = candidates.next()?;
        if let Some(module) = module
            && first.module != module
            && let Some(local) = candidates.find(|f| f.module == module)
        {
            return Some(local.path.as_str());
        }
        Some(first.path.as_str())
    }

    /// Files with existing tests ranked by term overlap with `terms`.
    ///
    /// `exclude` (normally the target itself) is never returned; zero-overlap
    /// files are dropped; ties keep index order.
    pub fn similar(
        &self,
        terms: &BTreeSet<String>,
        exclude: &str,
        limit: usize,
    ) -> Vec<SimilarFile<'_>> {
        let exclude = normalize(exclude);
        let mut hits: Vec<SimilarFile<'_>> = self
            .files
            .iter()
            .filter(|f| !f.is_test && f.test_path.is_some() && f.path != exclude)
            .filter_map(|file| {
                let score = jaccard(terms, &file.terms);
                (score > 0.0).then_some(SimilarFile { file, score })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        hits
    }
}

/// Lower-cased identifier fragments (camelCase and snake_case split) of
/// length three or more, minus common keywords.
pub fn terms_of(content: &str) -> BTreeSet<String> {
    const STOP: &[&str] = &[
        "import", "package", "class", "fun", "val", "var", "return", "public", "private",
        "protected", "static", "final", "void", "new", "the", "def", "self", "from", "object",
        "override", "internal", "null", "true", "false", "this",
    ];
    let mut terms = BTreeSet::new();
    for word in content.split(|c: char| !c.is_ascii_alphanumeric()) {
        for fragment in split_camel(word) {
            let fragment = fragment.to_ascii_lowercase();
            if fragment.len() >= 3
                && !fragment.chars().all(|c| c.is_ascii_digit())
                && !STOP.contains(&fragment.as_str())
            {
                terms.insert(fragment);
            }
        }
    }
    terms
}

fn split_camel(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let bytes = word.as_bytes();
    for i in 1..bytes.len() {
        if bytes[i].is_ascii_uppercase() && bytes[i - 1].is_ascii_lowercase() {
            parts.push(&word[start..i]);
            start = i;
        }
    }
    if start < word.len() {
        parts.push(&word[start..]);
    }
    parts
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    shared as f64 / union as f64
}

/// Package inferred from a `src/{main,test}/<lang>/...` layout, else the
/// parent directories joined with dots.
pub fn module_of(path: &str) -> String {
    let path = normalize(path);
    let mut dirs: Vec<&str> = path.split('/').collect();
    dirs.pop();
    let start = dirs
        .windows(2)
        .position(|w| w[0] == "src" && (w[1] == "main" || w[1] == "test"))
        .map(|pos| pos + 3)
        .unwrap_or(0);
    dirs.get(start..).unwrap_or_default().join(".")
}

fn qualify(module: &str, path: &Path) -> String {
    let stem = stem_of(&path.to_string_lossy()).to_string();
    if module.is_empty() {
        stem
    } else {
        format!("{module}.{stem}")
    }
}

fn stem_of(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    fn sample() -> RepositoryIndex {
        build_index(vec![
            src(
                "src/main/kotlin/com/acme/billing/InvoiceService.kt",
                "class InvoiceService(val repo: InvoiceRepository) { fun total() }",
            ),
            src(
                "src/test/kotlin/com/acme/billing/InvoiceServiceTest.kt",
                "class InvoiceServiceTest",
            ),
            src(
                "src/main/kotlin/com/acme/billing/InvoiceRepository.kt",
                "interface InvoiceRepository { fun save(invoice: Invoice) }",
            ),
            src(
                "src/main/kotlin/com/acme/orders/OrderService.kt",
                "class OrderService(val repo: OrderRepository)",
            ),
            src(
                "src/test/kotlin/com/acme/orders/OrderServiceTest.kt",
                "class OrderServiceTest",
            ),
        ])
    }

    #[test]
    fn records_modules_tests_and_qualified_names() {
        let index = sample();
        assert_eq!(index.len(), 5);
        let service = index
            .get("src/main/kotlin/com/acme/billing/InvoiceService.kt")
            .expect("indexed");
        assert_eq!(service.module, "com.acme.billing");
        assert!(!service.is_test);
        assert_eq!(
            service.test_path.as_deref(),
            Some("src/test/kotlin/com/acme/billing/InvoiceServiceTest.kt")
        );
        assert_eq!(
            service.qualified_name.as_deref(),
            Some("com.acme.billing.InvoiceService")
        );

        let repo = index
            .get("src/main/kotlin/com/acme/billing/InvoiceRepository.kt")
            .expect("indexed");
        assert!(repo.test_path.is_none());
    }

    #[test]
    fn resolves_qualified_and_simple_names() {
        let index = sample();
        assert_eq!(
            index.path_for("com.acme.billing.InvoiceRepository", None),
            Some("src/main/kotlin/com/acme/billing/InvoiceRepository.kt")
        );
        assert_eq!(
            index.path_for("OrderService", Some("com.acme.orders")),
            Some("src/main/kotlin/com/acme/orders/OrderService.kt")
        );
        assert_eq!(index.path_for("org.other.Missing", None), None);
    }

    #[test]
    fn similar_excludes_self_and_untested_files() {
        let index = sample();
        let terms = terms_of("class InvoiceService(val repo: InvoiceRepository)");
        let hits = index.similar(
            &terms,
            "src/main/kotlin/com/acme/billing/InvoiceService.kt",
            5,
        );
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.file.test_path.is_some()));
        assert!(
            hits.iter()
                .all(|h| h.file.path != "src/main/kotlin/com/acme/billing/InvoiceService.kt")
        );
        assert_eq!(hits[0].file.path, "src/main/kotlin/com/acme/orders/OrderService.kt");
    }

    #[test]
    fn terms_split_identifiers() {
        let terms = terms_of("fun computeTotal(invoice_id: Int)");
        assert!(terms.contains("compute"));
        assert!(terms.contains("total"));
        assert!(terms.contains("invoice"));
        assert!(!terms.contains("fun"));
    }

    #[test]
    fn module_falls_back_to_parent_dirs() {
        assert_eq!(module_of("pkg/util/strings.py"), "pkg.util");
        assert_eq!(module_of("Main.kt"), "");
    }
}
