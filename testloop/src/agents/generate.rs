//! Generate step: read inputs, ask the LLM for a test, write it.

use std::path::Path;

use serde_json::Value;

use super::{Action, ActionResult, Step, note_failure, ok, settle};
use crate::core::keys;
use crate::core::state::{Data, State};
use crate::core::test_path::test_path_for;
use crate::core::types::StepName;
use crate::tools::{ActionRequest, ToolId};

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateObservations {
    target: Option<String>,
    test_file: Option<String>,
    has_source: bool,
    existing_known: bool,
    generated: bool,
    written: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratePlan {
    MissingTarget,
    Read {
        target: String,
        test_file: String,
        source: bool,
        existing: bool,
    },
    Generate {
        target: String,
        test_file: String,
    },
    Write {
        test_file: String,
    },
    Done,
}

/// Explicit test path, else the conventional one for the target.
fn resolve_test_file(state: &State) -> Option<String> {
    if let Some(test_file) = state.get_str(keys::TEST_FILE) {
        return Some(test_file.to_string());
    }
    let target = state.get_str(keys::TARGET_FILE)?;
    Some(
        test_path_for(Path::new(target))
            .to_string_lossy()
            .replace('\\', "/"),
    )
}

impl Step for GenerateStep {
    type Observations = GenerateObservations;
    type Thoughts = GeneratePlan;

    fn name(&self) -> StepName {
        StepName::Generate
    }

    fn observe(&self, state: &State) -> GenerateObservations {
        GenerateObservations {
            target: state.get_str(keys::TARGET_FILE).map(str::to_string),
            test_file: resolve_test_file(state),
            has_source: state.get_str(keys::TARGET_CONTENT).is_some(),
            existing_known: state.get(keys::EXISTING_TEST).is_some_and(Value::is_boolean),
            generated: state.flag(keys::TEST_CODE_GENERATED)
                && state.get_artifact(keys::GENERATED_TEST).is_some(),
            written: state.flag(keys::TEST_FILE_WRITTEN),
        }
    }

    fn think(&self, seen: GenerateObservations, _state: &State) -> GeneratePlan {
        let (Some(target), Some(test_file)) = (seen.target, seen.test_file) else {
            return GeneratePlan::MissingTarget;
        };
        if !seen.has_source || !seen.existing_known {
            return GeneratePlan::Read {
                target,
                test_file,
                source: !seen.has_source,
                existing: !seen.existing_known,
            };
        }
        if !seen.generated {
            return GeneratePlan::Generate { target, test_file };
        }
        if !seen.written {
            return GeneratePlan::Write { test_file };
        }
        GeneratePlan::Done
    }

    fn decide(&self, plan: GeneratePlan, state: &State) -> Vec<Action> {
        match plan {
            GeneratePlan::MissingTarget | GeneratePlan::Done => Vec::new(),
            GeneratePlan::Read {
                target,
                test_file,
                source,
                existing,
            } => {
                let mut actions = Vec::new();
                if source {
                    actions.push(Action::Invoke(
                        ActionRequest::new(ToolId::ReadFile).with("path", target),
                    ));
                }
                if existing {
                    actions.push(Action::Invoke(
                        ActionRequest::new(ToolId::ReadFile).with("path", test_file),
                    ));
                }
                actions
            }
            GeneratePlan::Generate { target, test_file } => {
                let existing = state
                    .get_artifact(keys::EXISTING_TEST_CONTENT)
                    .and_then(Value::as_str)
                    .filter(|_| state.flag(keys::EXISTING_TEST));
                let mut request = ActionRequest::new(ToolId::GenerateTest)
                    .with("target_path", target)
                    .with("test_path", test_file)
                    .with("source", state.get_str(keys::TARGET_CONTENT).unwrap_or_default())
                    .with("strategy", if existing.is_some() { "update" } else { "create" });
                for (param, key) in [("complexity", keys::COMPLEXITY), ("approach", keys::APPROACH)] {
                    if let Some(value) = state.get_str(key) {
                        request = request.with(param, value);
                    }
                }
                if let Some(existing) = existing {
                    request = request.with("existing_test", existing);
                }
                if let Some(deps) = state.get_artifact(keys::DEPENDENCIES) {
                    request = request.with("dependencies", deps.clone());
                }
                if let Some(examples) = state.get_artifact(keys::SIMILAR_EXAMPLES) {
                    request = request.with("examples", examples.clone());
                }
                vec![Action::Invoke(request)]
            }
            GeneratePlan::Write { test_file } => {
                let content = state
                    .get_artifact(keys::GENERATED_TEST)
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                vec![Action::Invoke(
                    ActionRequest::new(ToolId::WriteFile)
                        .with("path", test_file)
                        .with("content", content),
                )]
            }
        }
    }

    fn update(&self, state: &State, results: &[ActionResult]) -> State {
        let mut partial = Data::new();
        let mut next = state.clone();

        let (Some(target), Some(test_file)) =
            (state.get_str(keys::TARGET_FILE), resolve_test_file(state))
        else {
            partial.insert(
                keys::ERROR.to_string(),
                Value::String("generate: no target file".to_string()),
            );
            settle(&mut partial, false);
            return state.update(partial);
        };
        partial.insert(keys::TEST_FILE.to_string(), Value::String(test_file.clone()));

        let source = ActionResult::find_with(results, ToolId::ReadFile, "path", target);
        if let Some(output) = ok(source) {
            if let Some(content) = output.get("content") {
                partial.insert(keys::TARGET_CONTENT.to_string(), content.clone());
            }
        } else if let Some(output) = source {
            note_failure(&mut partial, "read target", output);
        }

        // A missing test file is the normal case, not a failure.
        if let Some(output) = ActionResult::find_with(results, ToolId::ReadFile, "path", &test_file) {
            let content = ok(Some(output)).and_then(|o| o.get("content")).cloned();
            partial.insert(keys::EXISTING_TEST.to_string(), Value::Bool(content.is_some()));
            if let Some(content) = content {
                next = next.add_artifact(keys::EXISTING_TEST_CONTENT, content);
            }
        }

        let generated = ActionResult::find(results, ToolId::GenerateTest);
        if let Some(output) = ok(generated) {
            let code = output.get("test_code").cloned().unwrap_or(Value::Null);
            next = next.add_artifact(keys::GENERATED_TEST, code);
            partial.insert(keys::TEST_CODE_GENERATED.to_string(), Value::Bool(true));
            partial.insert(keys::TEST_FILE_WRITTEN.to_string(), Value::Bool(false));
            if let Some(strategy) = requested_strategy(results) {
                partial.insert(keys::STRATEGY.to_string(), strategy);
            }
        } else if let Some(output) = generated {
            note_failure(&mut partial, "generate test", output);
        }

        let written = ActionResult::find(results, ToolId::WriteFile);
        if ok(written).is_some() {
            partial.insert(keys::TEST_FILE_WRITTEN.to_string(), Value::Bool(true));
        } else if let Some(output) = written {
            note_failure(&mut partial, "write test", output);
        }

        let next = next.update(partial);
        let done = self.is_success(&next);
        let mut flag = Data::new();
        settle(&mut flag, done);
        next.update(flag)
    }

    fn is_success(&self, state: &State) -> bool {
        state.flag(keys::TEST_CODE_GENERATED)
            && state.flag(keys::TEST_FILE_WRITTEN)
            && state.get_str(keys::TEST_FILE).is_some()
    }
}

fn requested_strategy(results: &[ActionResult]) -> Option<Value> {
    results.iter().rev().find_map(|result| match result {
        ActionResult::Tool { request, .. } if request.tool == ToolId::GenerateTest => {
            request.params.get("strategy").cloned()
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::plan;
    use crate::core::state::data_of;
    use crate::tools::Params;
    use serde_json::json;

    const TARGET: &str = "src/main/kotlin/a/Foo.kt";
    const TEST: &str = "src/test/kotlin/a/FooTest.kt";

    fn run(state: &State, output: Value) -> State {
        let actions = plan(&GenerateStep, state);
        let results: Vec<ActionResult> = actions
            .into_iter()
            .filter_map(|action| match action {
                Action::Invoke(request) => {
                    let out = if request.tool == ToolId::ReadFile
                        && request.params["path"] == TEST
                    {
                        json!({"success": false, "error": "not found"})
                    } else {
                        output.clone()
                    };
                    Some(ActionResult::Tool {
                        request,
                        output: out.as_object().cloned().unwrap_or_else(Params::new),
                    })
                }
                Action::Repair(_) => None,
            })
            .collect();
        GenerateStep.update(state, &results)
    }

    #[test]
    fn derives_test_path_from_target() {
        let state = State::new(data_of([(keys::TARGET_FILE, json!(TARGET))]));
        assert_eq!(resolve_test_file(&state).as_deref(), Some(TEST));
    }

    #[test]
    fn read_generate_write_passes() {
        let state = State::new(data_of([(keys::TARGET_FILE, json!(TARGET))]));

        let state = run(&state, json!({"success": true, "content": "class Foo"}));
        assert_eq!(state.get_str(keys::TARGET_CONTENT), Some("class Foo"));
        assert_eq!(state.get(keys::EXISTING_TEST), Some(&json!(false)));
        assert!(state.get(keys::ERROR).is_none());
        assert!(!state.success());

        let actions = plan(&GenerateStep, &state);
        let Some(Action::Invoke(request)) = actions.first() else {
            panic!("expected generate request");
        };
        assert_eq!(request.tool, ToolId::GenerateTest);
        assert_eq!(request.params["strategy"], "create");

        let state = run(&state, json!({"success": true, "test_code": "class FooTest"}));
        assert_eq!(state.get_artifact(keys::GENERATED_TEST), Some(&json!("class FooTest")));
        assert_eq!(state.get_str(keys::STRATEGY), Some("create"));
        assert!(!GenerateStep.is_success(&state));

        let state = run(&state, json!({"success": true, "path": TEST, "bytes": 13}));
        assert!(GenerateStep.is_success(&state));
        assert!(state.success());
        assert_eq!(state.get_str(keys::TEST_FILE), Some(TEST));
        assert!(plan(&GenerateStep, &state).is_empty());
    }

    #[test]
    fn existing_test_switches_to_update() {
        let state = State::new(data_of([
            (keys::TARGET_FILE, json!(TARGET)),
            (keys::TARGET_CONTENT, json!("class Foo")),
            (keys::EXISTING_TEST, json!(true)),
        ]))
        .add_artifact(keys::EXISTING_TEST_CONTENT, json!("class FooTest {}"));
        let actions = plan(&GenerateStep, &state);
        let Some(Action::Invoke(request)) = actions.first() else {
            panic!("expected generate request");
        };
        assert_eq!(request.params["strategy"], "update");
        assert_eq!(request.params["existing_test"], "class FooTest {}");
    }

    #[test]
    fn generation_failure_is_recorded() {
        let state = State::new(data_of([
            (keys::TARGET_FILE, json!(TARGET)),
            (keys::TARGET_CONTENT, json!("class Foo")),
            (keys::EXISTING_TEST, json!(false)),
        ]));
        let state = run(&state, json!({"success": false, "error": "llm down"}));
        assert!(!state.success());
        assert_eq!(state.get_str(keys::ERROR), Some("generate test: llm down"));
    }
}
