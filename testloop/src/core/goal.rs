//! Named objectives and the step plans that pursue them.

use anyhow::{Result, bail};

use crate::core::state::State;
use crate::core::types::StepName;

/// The named objective of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub name: String,
    pub description: String,
    /// Data keys that must all be truthy for the goal to count as achieved.
    /// Empty means "trust the state's success flag".
    pub success_criteria: Vec<String>,
}

const CATALOGUE: &[(&str, &str, &[&str])] = &[
    ("index", "Index the repository for test generation", &["index_complete"]),
    (
        "analyze",
        "Analyze a target file's structure and dependencies",
        &["analysis_complete"],
    ),
    (
        "generate",
        "Generate a passing unit test for a target file",
        &["test_fixed"],
    ),
    ("fix", "Repair a failing unit test", &["test_fixed"]),
];

impl Goal {
    /// A free-form goal with no success criteria.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            success_criteria: Vec::new(),
        }
    }

    /// Look up a catalogued goal by name.
    pub fn for_name(name: &str) -> Result<Self> {
        let Some((name, description, criteria)) =
            CATALOGUE.iter().find(|(known, _, _)| *known == name)
        else {
            let known: Vec<&str> = CATALOGUE.iter().map(|(n, _, _)| *n).collect();
            bail!("unknown goal {name:?} (expected one of: {})", known.join(", "));
        };
        Ok(Self {
            name: (*name).to_string(),
            description: (*description).to_string(),
            success_criteria: criteria.iter().map(|c| (*c).to_string()).collect(),
        })
    }

    /// Ordered step sequence for catalogued goals; empty for free-form ones.
    pub fn plan(&self) -> Vec<StepName> {
        match self.name.as_str() {
            "index" => vec![StepName::Index],
            "analyze" => vec![StepName::Analyze],
            "generate" => vec![StepName::Analyze, StepName::Generate, StepName::Fix],
            "fix" => vec![StepName::Fix],
            _ => Vec::new(),
        }
    }

    pub fn is_achieved(&self, state: &State) -> bool {
        if self.success_criteria.is_empty() {
            return state.success();
        }
        self.success_criteria.iter().all(|key| state.flag(key))
    }
}
