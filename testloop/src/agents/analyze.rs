//! Analyze step: imports, usage weights, dependencies and similar examples
//! for the target file.
//!
//! Runs in two passes. The first parses the target and retrieves examples;
//! the second ranks the parsed imports. A pass only requests what the state
//! still lacks, so a failed call is retried on the next invocation.

use serde_json::{Map, Value};

use super::{Action, ActionResult, Step, note_failure, ok, settle};
use crate::core::keys;
use crate::core::state::{Data, State};
use crate::core::types::StepName;
use crate::io::config::GenerationConfig;
use crate::tools::{ActionRequest, ToolId};

#[derive(Debug, Clone)]
pub struct AnalyzeStep {
    max_examples: usize,
}

impl AnalyzeStep {
    pub fn new(config: &GenerationConfig) -> Self {
        Self {
            max_examples: config.max_examples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeObservations {
    target: Option<String>,
    parsed: bool,
    examples_known: bool,
    dependencies_known: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzePlan {
    MissingTarget,
    Parse {
        target: String,
        parse: bool,
        find_similar: bool,
    },
    Resolve,
    Done,
}

impl Step for AnalyzeStep {
    type Observations = AnalyzeObservations;
    type Thoughts = AnalyzePlan;

    fn name(&self) -> StepName {
        StepName::Analyze
    }

    fn observe(&self, state: &State) -> AnalyzeObservations {
        AnalyzeObservations {
            target: state.get_str(keys::TARGET_FILE).map(str::to_string),
            parsed: state.get(keys::IMPORTS).is_some_and(Value::is_array),
            examples_known: state.get_artifact(keys::SIMILAR_EXAMPLES).is_some(),
            dependencies_known: state.get_artifact(keys::DEPENDENCIES).is_some(),
        }
    }

    fn think(&self, seen: AnalyzeObservations, _state: &State) -> AnalyzePlan {
        let Some(target) = seen.target else {
            return AnalyzePlan::MissingTarget;
        };
        if !seen.parsed || !seen.examples_known {
            return AnalyzePlan::Parse {
                target,
                parse: !seen.parsed,
                find_similar: !seen.examples_known,
            };
        }
        if !seen.dependencies_known {
            return AnalyzePlan::Resolve;
        }
        AnalyzePlan::Done
    }

    fn decide(&self, plan: AnalyzePlan, state: &State) -> Vec<Action> {
        match plan {
            AnalyzePlan::MissingTarget | AnalyzePlan::Done => Vec::new(),
            AnalyzePlan::Parse {
                target,
                parse,
                find_similar,
            } => {
                let content = state.get_str(keys::TARGET_CONTENT);
                let mut actions = Vec::new();
                if parse {
                    let mut request = ActionRequest::new(ToolId::ParseCode).with("path", target.as_str());
                    if let Some(content) = content {
                        request = request.with("content", content);
                    }
                    actions.push(Action::Invoke(request));
                }
                if find_similar {
                    let mut request = ActionRequest::new(ToolId::FindSimilar)
                        .with("path", target.as_str())
                        .with("limit", self.max_examples);
                    if let Some(content) = content {
                        request = request.with("content", content);
                    }
                    actions.push(Action::Invoke(request));
                }
                actions
            }
            AnalyzePlan::Resolve => {
                let mut request = ActionRequest::new(ToolId::ResolveDependencies)
                    .with("symbols", state.get(keys::IMPORTS).cloned().unwrap_or(Value::Array(Vec::new())))
                    .with(
                        "weights",
                        state
                            .get(keys::USAGE_WEIGHTS)
                            .cloned()
                            .unwrap_or(Value::Object(Map::new())),
                    );
                if let Some(module) = state.get_str(keys::MODULE) {
                    request = request.with("module", module);
                }
                vec![Action::Invoke(request)]
            }
        }
    }

    fn update(&self, state: &State, results: &[ActionResult]) -> State {
        let mut partial = Data::new();
        let mut next = state.clone();

        if state.get_str(keys::TARGET_FILE).is_none() {
            partial.insert(
                keys::ERROR.to_string(),
                Value::String("analyze: no target file".to_string()),
            );
        }

        let parsed = ActionResult::find(results, ToolId::ParseCode);
        if let Some(output) = ok(parsed) {
            let imports = output.get("imports").cloned().unwrap_or(Value::Array(Vec::new()));
            let count = imports.as_array().map_or(0, Vec::len);
            let named = imports
                .as_array()
                .is_some_and(|items| items.iter().filter_map(Value::as_str).any(|i| !i.ends_with(".*")));
            for (field, key) in [
                ("content", keys::TARGET_CONTENT),
                ("module", keys::MODULE),
                ("usage_weights", keys::USAGE_WEIGHTS),
            ] {
                if let Some(value) = output.get(field) {
                    partial.insert(key.to_string(), value.clone());
                }
            }
            let complexity = complexity_for(count);
            partial.insert(keys::COMPLEXITY.to_string(), Value::from(complexity));
            partial.insert(
                keys::APPROACH.to_string(),
                Value::from(if complexity == "high" { "incremental" } else { "standard" }),
            );
            partial.insert(keys::IMPORTS.to_string(), imports);
            if !named {
                // Nothing to resolve.
                next = next.add_artifact(keys::DEPENDENCIES, Value::Array(Vec::new()));
            }
        } else if let Some(output) = parsed {
            note_failure(&mut partial, "parse target", output);
        }

        let similar = ActionResult::find(results, ToolId::FindSimilar);
        if let Some(output) = ok(similar) {
            let examples = output.get("examples").cloned().unwrap_or(Value::Array(Vec::new()));
            let good = examples.as_array().is_some_and(|items| !items.is_empty());
            partial.insert(keys::HAS_GOOD_EXAMPLES.to_string(), Value::Bool(good));
            next = next.add_artifact(keys::SIMILAR_EXAMPLES, examples);
        } else if let Some(output) = similar {
            note_failure(&mut partial, "find similar files", output);
        }

        let resolved = ActionResult::find(results, ToolId::ResolveDependencies);
        if let Some(output) = ok(resolved) {
            let deps = output
                .get("dependencies")
                .cloned()
                .unwrap_or(Value::Array(Vec::new()));
            next = next.add_artifact(keys::DEPENDENCIES, deps);
        } else if let Some(output) = resolved {
            note_failure(&mut partial, "resolve dependencies", output);
        }

        let complete = (partial.contains_key(keys::IMPORTS) || state.get(keys::IMPORTS).is_some())
            && next.get_artifact(keys::DEPENDENCIES).is_some()
            && next.get_artifact(keys::SIMILAR_EXAMPLES).is_some();
        partial.insert(keys::ANALYSIS_COMPLETE.to_string(), Value::Bool(complete));
        settle(&mut partial, complete);
        next.update(partial)
    }

    fn is_success(&self, state: &State) -> bool {
        state.flag(keys::ANALYSIS_COMPLETE)
    }
}

fn complexity_for(imports: usize) -> &'static str {
    match imports {
        0..=2 => "low",
        3..=10 => "medium",
        _ => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::plan;
    use crate::core::state::data_of;
    use crate::tools::Params;
    use serde_json::json;

    fn step() -> AnalyzeStep {
        AnalyzeStep::new(&GenerationConfig::default())
    }

    fn tool(request: ActionRequest, output: Value) -> ActionResult {
        ActionResult::Tool {
            request,
            output: output.as_object().cloned().unwrap_or_else(Params::new),
        }
    }

    fn seeded() -> State {
        State::new(data_of([(keys::TARGET_FILE, json!("src/main/kotlin/a/Foo.kt"))]))
    }

    #[test]
    fn first_pass_parses_and_finds_examples() {
        let actions = plan(&step(), &seeded());
        let tools: Vec<ToolId> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Invoke(request) => Some(request.tool),
                Action::Repair(_) => None,
            })
            .collect();
        assert_eq!(tools, vec![ToolId::ParseCode, ToolId::FindSimilar]);
    }

    #[test]
    fn decisions_are_deterministic() {
        let state = seeded();
        assert_eq!(plan(&step(), &state), plan(&step(), &state));
    }

    #[test]
    fn missing_target_is_an_error() {
        let state = step().update(&State::default(), &[]);
        assert!(plan(&step(), &State::default()).is_empty());
        assert!(!state.success());
        assert_eq!(state.get_str(keys::ERROR), Some("analyze: no target file"));
    }

    #[test]
    fn two_passes_complete_the_analysis() {
        let step = step();
        let first = [
            tool(
                ActionRequest::new(ToolId::ParseCode),
                json!({
                    "success": true,
                    "content": "class Foo",
                    "module": "a",
                    "imports": ["x.Repo", "x.Clock"],
                    "usage_weights": {"x.Repo": 1.0, "x.Clock": 0.5},
                }),
            ),
            tool(
                ActionRequest::new(ToolId::FindSimilar),
                json!({"success": true, "examples": []}),
            ),
        ];
        let state = step.update(&seeded(), &first);
        assert!(!step.is_success(&state));
        assert_eq!(state.get_str(keys::COMPLEXITY), Some("low"));
        assert_eq!(state.get_str(keys::APPROACH), Some("standard"));
        assert_eq!(state.get(keys::HAS_GOOD_EXAMPLES), Some(&json!(false)));

        let actions = plan(&step, &state);
        let Some(Action::Invoke(request)) = actions.first() else {
            panic!("expected a resolve request, got {actions:?}");
        };
        assert_eq!(request.tool, ToolId::ResolveDependencies);
        assert_eq!(request.params["module"], "a");

        let second = [tool(
            request.clone(),
            json!({"success": true, "dependencies": [{"symbol": "x.Repo", "score": 1.0, "path": null}]}),
        )];
        let state = step.update(&state, &second);
        assert!(step.is_success(&state));
        assert!(state.success());
        assert!(plan(&step, &state).is_empty());
    }

    #[test]
    fn wildcard_only_imports_need_no_resolution() {
        let results = [
            tool(
                ActionRequest::new(ToolId::ParseCode),
                json!({"success": true, "module": "a", "imports": ["x.*"], "usage_weights": {}}),
            ),
            tool(
                ActionRequest::new(ToolId::FindSimilar),
                json!({"success": true, "examples": [{"source_path": "B.kt"}]}),
            ),
        ];
        let state = step().update(&seeded(), &results);
        assert!(state.success());
        assert_eq!(state.get_artifact(keys::DEPENDENCIES), Some(&json!([])));
        assert!(state.flag(keys::HAS_GOOD_EXAMPLES));
    }

    #[test]
    fn complexity_thresholds() {
        assert_eq!(complexity_for(2), "low");
        assert_eq!(complexity_for(3), "medium");
        assert_eq!(complexity_for(10), "medium");
        assert_eq!(complexity_for(11), "high");
    }
}
