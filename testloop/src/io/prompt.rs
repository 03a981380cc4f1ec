//! Prompt builder for LLM tool calls.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When a rendered prompt exceeds the byte budget, droppable sections are
//! removed in a fixed order and the last section is truncated as a last resort.

use std::sync::Arc;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::types::ParsedError;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const FIX_ERROR_TEMPLATE: &str = include_str!("prompts/fix_error.md");
const FIX_ALL_TEMPLATE: &str = include_str!("prompts/fix_all.md");

/// Drop order when over budget: least critical first.
const DROP_ORDER: [&str; 4] = ["examples", "analyses", "dependencies", "source"];

/// A dependency line in the generation prompt.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyContext {
    pub symbol: String,
    pub score: String,
    pub path: Option<String>,
}

/// A similar, already-tested file shown to the model as a style reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExampleContext {
    pub source_path: String,
    pub test_path: String,
    pub test_content: String,
}

#[derive(Debug, Clone)]
pub struct GenerateInputs {
    pub language: String,
    pub framework: String,
    pub target_path: String,
    pub test_path: String,
    pub source: String,
    pub strategy: String,
    pub complexity: String,
    pub approach: String,
    pub existing_test: Option<String>,
    pub dependencies: Vec<DependencyContext>,
    pub examples: Vec<ExampleContext>,
}

#[derive(Debug, Clone)]
pub struct FixInputs<'a> {
    pub language: &'a str,
    pub test_path: &'a str,
    pub test_code: &'a str,
    pub source: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorView {
    summary: String,
    message: String,
    error_type: String,
    error_category: String,
    involved_symbols: Vec<String>,
    suggested_fix: String,
}

impl From<&ParsedError> for ErrorView {
    fn from(err: &ParsedError) -> Self {
        Self {
            summary: err.summary(),
            message: err.message.clone(),
            error_type: format!("{:?}", err.error_type),
            error_category: err.error_category.clone(),
            involved_symbols: err.involved_symbols.clone(),
            suggested_fix: err.suggested_fix.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Renders prompts within a byte budget. Cheap to clone.
#[derive(Clone)]
pub struct PromptBuilder {
    env: Arc<Environment<'static>>,
    section_re: Regex,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)
            .context("load generate template")?;
        env.add_template("fix_error", FIX_ERROR_TEMPLATE)
            .context("load fix_error template")?;
        env.add_template("fix_all", FIX_ALL_TEMPLATE)
            .context("load fix_all template")?;
        Ok(Self {
            env: Arc::new(env),
            section_re: Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
                .context("compile section regex")?,
            budget_bytes,
        })
    }

    pub fn build_generate(&self, input: &GenerateInputs) -> Result<String> {
        let rendered = self.env.get_template("generate")?.render(context! {
            language => input.language.as_str(),
            framework => input.framework.as_str(),
            target_path => input.target_path.as_str(),
            test_path => input.test_path.as_str(),
            source => input.source.trim_end(),
            strategy => input.strategy.as_str(),
            complexity => input.complexity.as_str(),
            approach => input.approach.as_str(),
            existing_test => input.existing_test.as_deref().map(str::trim_end).filter(|s| !s.is_empty()),
            dependencies => &input.dependencies,
            examples => &input.examples,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_fix_error(&self, input: &FixInputs<'_>, error: &ParsedError) -> Result<String> {
        let location = match (&error.file_path, error.line_number) {
            (Some(path), Some(line)) => format!("{path}:{line}"),
            (Some(path), None) => path.clone(),
            _ => "unknown".to_string(),
        };
        let rendered = self.env.get_template("fix_error")?.render(context! {
            language => input.language,
            test_path => input.test_path,
            test_code => input.test_code.trim_end(),
            source => input.source.map(str::trim_end).filter(|s| !s.is_empty()),
            error => ErrorView::from(error),
            location => location,
        })?;
        Ok(self.fit(&rendered))
    }

    pub fn build_fix_all(
        &self,
        input: &FixInputs<'_>,
        errors: &[ParsedError],
        analyses: &[String],
    ) -> Result<String> {
        let errors: Vec<ErrorView> = errors.iter().map(ErrorView::from).collect();
        let analyses: Vec<&str> = analyses
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        let rendered = self.env.get_template("fix_all")?.render(context! {
            language => input.language,
            test_path => input.test_path,
            test_code => input.test_code.trim_end(),
            source => input.source.map(str::trim_end).filter(|s| !s.is_empty()),
            errors => errors,
            analyses => analyses,
        })?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = self.parse_sections(rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        render_sections(&sections)
    }

    fn parse_sections(&self, rendered: &str) -> Vec<ParsedSection> {
        let markers: Vec<_> = self.section_re.captures_iter(rendered).collect();
        let mut sections = Vec::new();
        for (i, caps) in markers.iter().enumerate() {
            let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let end = markers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(rendered.len(), |m| m.start());
            let content = rendered[whole.end()..end].trim().to_string();
            let required = kind.as_str() == "required";
            if !content.is_empty() || required {
                sections.push(ParsedSection {
                    key: key.as_str().to_string(),
                    required,
                    content,
                });
            }
        }
        sections
    }
}

fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(last) = sections.last_mut() else {
        return;
    };
    let other_len = total - last.content.len();
    let allowed = budget.saturating_sub(other_len);
    let before_len = last.content.len();
    let mut cut = allowed.saturating_sub(12);
    while cut > 0 && !last.content.is_char_boundary(cut) {
        cut -= 1;
    }
    last.content.truncate(cut);
    last.content.push_str("\n[truncated]");
    debug!(
        section = last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
