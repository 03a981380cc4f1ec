//! Index step: build and persist the repository index once per run.

use serde_json::Value;

use super::{Action, ActionResult, Step, note_failure, ok, settle};
use crate::core::keys;
use crate::core::state::{Data, State};
use crate::core::types::StepName;
use crate::tools::{ActionRequest, ToolId};

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPlan {
    Skip,
    Build,
}

impl Step for IndexStep {
    type Observations = bool;
    type Thoughts = IndexPlan;

    fn name(&self) -> StepName {
        StepName::Index
    }

    fn observe(&self, state: &State) -> bool {
        state.flag(keys::INDEX_COMPLETE)
    }

    fn think(&self, already_indexed: bool, _state: &State) -> IndexPlan {
        if already_indexed {
            IndexPlan::Skip
        } else {
            IndexPlan::Build
        }
    }

    fn decide(&self, plan: IndexPlan, _state: &State) -> Vec<Action> {
        match plan {
            IndexPlan::Skip => Vec::new(),
            IndexPlan::Build => vec![Action::Invoke(ActionRequest::new(ToolId::IndexRepository))],
        }
    }

    fn update(&self, state: &State, results: &[ActionResult]) -> State {
        let mut partial = Data::new();
        let output = ActionResult::find(results, ToolId::IndexRepository);
        if let Some(output) = ok(output) {
            partial.insert(
                keys::INDEXED_FILES.to_string(),
                output.get("indexed_files").cloned().unwrap_or(Value::from(0)),
            );
            partial.insert(keys::INDEX_COMPLETE.to_string(), Value::Bool(true));
        } else if let Some(output) = output {
            note_failure(&mut partial, "index repository", output);
        }
        let done = partial
            .get(keys::INDEX_COMPLETE)
            .and_then(Value::as_bool)
            .unwrap_or_else(|| state.flag(keys::INDEX_COMPLETE));
        settle(&mut partial, done);
        state.update(partial)
    }

    fn is_success(&self, state: &State) -> bool {
        state.flag(keys::INDEX_COMPLETE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::plan;
    use crate::core::state::data_of;
    use crate::tools::Params;
    use serde_json::json;

    fn output(value: Value) -> Params {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn indexes_once() {
        let actions = plan(&IndexStep, &State::default());
        assert_eq!(
            actions,
            vec![Action::Invoke(ActionRequest::new(ToolId::IndexRepository))]
        );
        let done = State::new(data_of([(keys::INDEX_COMPLETE, json!(true))]));
        assert!(plan(&IndexStep, &done).is_empty());
    }

    #[test]
    fn records_indexed_file_count() {
        let results = [ActionResult::Tool {
            request: ActionRequest::new(ToolId::IndexRepository),
            output: output(json!({"success": true, "indexed_files": 12})),
        }];
        let state = IndexStep.update(&State::default(), &results);
        assert!(state.success());
        assert!(IndexStep.is_success(&state));
        assert_eq!(state.get_u64(keys::INDEXED_FILES), Some(12));
    }

    #[test]
    fn failure_is_recorded_not_raised() {
        let results = [ActionResult::Tool {
            request: ActionRequest::new(ToolId::IndexRepository),
            output: output(json!({"success": false, "error": "disk gone"})),
        }];
        let state = IndexStep.update(&State::default(), &results);
        assert!(!state.success());
        assert_eq!(state.get_str(keys::ERROR), Some("index repository: disk gone"));
    }
}
