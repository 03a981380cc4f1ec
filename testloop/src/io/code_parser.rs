//! Code-parsing capability: imports and symbol usage weights of a source file.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use regex::Regex;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedSource {
    /// Declared package/module, if the language has one.
    pub package: Option<String>,
    /// Imported symbols in declaration order (wildcards end in `.*`).
    pub imports: Vec<String>,
    /// Relative usage of each non-wildcard import in `0.0..=1.0`.
    pub usage_weights: BTreeMap<String, f64>,
}

pub trait CodeParser: Send + Sync {
    fn parse(&self, content: &str, path: &str) -> Result<ParsedSource>;
}

/// Line-oriented parser for JVM languages (Kotlin, Java) and Python.
pub struct RegexCodeParser {
    package: Regex,
    jvm_import: Regex,
    py_from: Regex,
    word: Regex,
}

impl RegexCodeParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            package: Regex::new(r"^\s*package\s+([A-Za-z0-9_.]+)").context("compile package regex")?,
            jvm_import: Regex::new(r"^\s*import\s+(?:static\s+)?([A-Za-z0-9_.]+(?:\.\*)?)")
                .context("compile import regex")?,
            py_from: Regex::new(r"^\s*from\s+([A-Za-z0-9_.]+)\s+import\s+(.+)")
                .context("compile from-import regex")?,
            word: Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").context("compile word regex")?,
        })
    }

    fn imports_of(&self, content: &str) -> (Option<String>, Vec<String>) {
        let mut package = None;
        let mut imports = Vec::new();
        for line in content.lines() {
            if package.is_none()
                && let Some(caps) = self.package.captures(line)
            {
                package = Some(caps[1].to_string());
                continue;
            }
            if let Some(caps) = self.py_from.captures(line) {
                let module = &caps[1];
                for name in caps[2].trim_matches(|c: char| c == '(' || c == ')').split(',') {
                    let name = name.split_whitespace().next().unwrap_or_default();
                    if !name.is_empty() {
                        imports.push(format!("{module}.{name}"));
                    }
                }
                continue;
            }
            if let Some(caps) = self.jvm_import.captures(line) {
                imports.push(caps[1].to_string());
            }
        }
        (package, imports)
    }
}

impl CodeParser for RegexCodeParser {
    fn parse(&self, content: &str, _path: &str) -> Result<ParsedSource> {
        let (package, imports) = self.imports_of(content);

        let body: String = content
            .lines()
            .filter(|line| {
                let t = line.trim_start();
                !(t.starts_with("import ") || t.starts_with("from ") || t.starts_with("package "))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for m in self.word.find_iter(&body) {
            *counts.entry(m.as_str()).or_default() += 1;
        }

        let named: Vec<(&String, usize)> = imports
            .iter()
            .filter(|import| !import.ends_with(".*"))
            .map(|import| {
                let simple = import.rsplit('.').next().unwrap_or(import);
                (import, counts.get(simple).copied().unwrap_or(0))
            })
            .collect();
        let max = named.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let usage_weights = named
            .into_iter()
            .map(|(import, n)| {
                let weight = if max == 0 { 1.0 } else { n as f64 / max as f64 };
                (import.clone(), weight)
            })
            .collect();

        Ok(ParsedSource {
            package,
            imports,
            usage_weights,
        })
    }
}
