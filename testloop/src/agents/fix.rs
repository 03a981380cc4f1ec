//! Fix step: hand the test file to the error-fix loop and record the outcome.

use serde_json::Value;

use super::{Action, ActionResult, Step, settle};
use crate::core::keys;
use crate::core::state::{Data, State};
use crate::core::types::StepName;
use crate::fix_loop::{RepairOutcome, RepairRequest};

#[derive(Debug, Clone, Copy, Default)]
pub struct FixStep;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixObservations {
    test_file: Option<String>,
    target: Option<String>,
    /// Only the first repair may start from caller-supplied output; later
    /// runs rebuild against the rewritten test.
    build_output: Option<String>,
}

impl Step for FixStep {
    type Observations = FixObservations;
    type Thoughts = Option<RepairRequest>;

    fn name(&self) -> StepName {
        StepName::Fix
    }

    fn observe(&self, state: &State) -> FixObservations {
        let first_repair = state.get(keys::FIX_ATTEMPTS).is_none();
        FixObservations {
            test_file: state.get_str(keys::TEST_FILE).map(str::to_string),
            target: state.get_str(keys::TARGET_FILE).map(str::to_string),
            build_output: state
                .get_str(keys::BUILD_OUTPUT)
                .filter(|_| first_repair)
                .map(str::to_string),
        }
    }

    fn think(&self, seen: FixObservations, _state: &State) -> Option<RepairRequest> {
        Some(RepairRequest {
            test_file: seen.test_file?,
            target_file: seen.target,
            initial_output: seen.build_output,
        })
    }

    fn decide(&self, request: Option<RepairRequest>, _state: &State) -> Vec<Action> {
        request.map(Action::Repair).into_iter().collect()
    }

    fn update(&self, state: &State, results: &[ActionResult]) -> State {
        let mut partial = Data::new();
        let outcome = results.iter().rev().find_map(|result| match result {
            ActionResult::Repair(outcome) => Some(outcome),
            ActionResult::Tool { .. } => None,
        });
        let Some(outcome) = outcome else {
            if state.get_str(keys::TEST_FILE).is_none() {
                partial.insert(
                    keys::ERROR.to_string(),
                    Value::String("fix: no test file".to_string()),
                );
            }
            settle(&mut partial, false);
            return state.update(partial);
        };
        record(state, outcome, partial)
    }

    fn is_success(&self, state: &State) -> bool {
        state.flag(keys::TEST_FIXED)
    }
}

fn record(state: &State, outcome: &RepairOutcome, mut partial: Data) -> State {
    let fixed = outcome.succeeded();
    partial.insert(keys::FIX_COMPLETE.to_string(), Value::Bool(true));
    partial.insert(keys::FIX_PHASE.to_string(), Value::from(outcome.phase.as_str()));
    partial.insert(keys::FIX_ATTEMPTS.to_string(), Value::from(outcome.attempts));
    partial.insert(keys::TEST_FIXED.to_string(), Value::Bool(fixed));
    if let Some(message) = &outcome.message
        && !fixed
    {
        partial.insert(keys::ERROR.to_string(), Value::String(message.clone()));
    }
    if let Some(reason) = outcome.fatal {
        partial.insert(
            keys::FIX_FATAL_REASON.to_string(),
            serde_json::to_value(reason).unwrap_or(Value::Null),
        );
    }
    settle(&mut partial, fixed);

    let mut next = state.clone();
    if let Some(test) = &outcome.last_test {
        next = next.add_artifact(keys::GENERATED_TEST, Value::String(test.clone()));
    }
    next = next
        .add_artifact(
            keys::ERRORS,
            serde_json::to_value(&outcome.last_errors).unwrap_or(Value::Array(Vec::new())),
        )
        .add_artifact(
            keys::FIX_HISTORY,
            serde_json::to_value(&outcome.transitions).unwrap_or(Value::Array(Vec::new())),
        );
    next.update(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::plan;
    use crate::core::state::data_of;
    use crate::core::types::{ErrorType, FatalReason, LoopPhase, ParsedError};
    use serde_json::json;

    fn outcome(phase: LoopPhase) -> RepairOutcome {
        RepairOutcome {
            phase,
            attempts: 1,
            last_test: Some("class FooTest { fixed }".to_string()),
            last_errors: vec![ParsedError::new(ErrorType::Compilation, "cannot find symbol Foo")],
            fatal: None,
            message: None,
            transitions: Vec::new(),
        }
    }

    #[test]
    fn first_repair_starts_from_supplied_output() {
        let state = State::new(data_of([
            (keys::TEST_FILE, json!("FooTest.kt")),
            (keys::BUILD_OUTPUT, json!("e: boom")),
        ]));
        let actions = plan(&FixStep, &state);
        assert_eq!(
            actions,
            vec![Action::Repair(RepairRequest {
                test_file: "FooTest.kt".to_string(),
                target_file: None,
                initial_output: Some("e: boom".to_string()),
            })]
        );

        let again = state.update(data_of([(keys::FIX_ATTEMPTS, json!(3))]));
        let actions = plan(&FixStep, &again);
        let [Action::Repair(request)] = actions.as_slice() else {
            panic!("expected one repair");
        };
        assert_eq!(request.initial_output, None);
    }

    #[test]
    fn missing_test_file_is_an_error() {
        assert!(plan(&FixStep, &State::default()).is_empty());
        let state = FixStep.update(&State::default(), &[]);
        assert!(!state.success());
        assert_eq!(state.get_str(keys::ERROR), Some("fix: no test file"));
    }

    #[test]
    fn success_records_revised_test() {
        let state = FixStep.update(
            &State::default(),
            &[ActionResult::Repair(outcome(LoopPhase::Succeeded))],
        );
        assert!(state.success());
        assert!(FixStep.is_success(&state));
        assert_eq!(state.get_str(keys::FIX_PHASE), Some("succeeded"));
        assert_eq!(
            state.get_artifact(keys::GENERATED_TEST),
            Some(&json!("class FooTest { fixed }"))
        );
    }

    #[test]
    fn exhaustion_keeps_best_effort_artifacts() {
        let mut exhausted = outcome(LoopPhase::Exhausted);
        exhausted.message = Some("test still failing after 3 attempts".to_string());
        let state = FixStep.update(&State::default(), &[ActionResult::Repair(exhausted)]);
        assert!(!state.success());
        assert!(state.flag(keys::FIX_COMPLETE));
        assert!(!state.flag(keys::TEST_FIXED));
        assert_eq!(state.get_str(keys::ERROR), Some("test still failing after 3 attempts"));
        assert!(state.get_artifact(keys::GENERATED_TEST).is_some());
        assert_eq!(
            state.get_artifact(keys::ERRORS).and_then(Value::as_array).map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn fatal_reason_is_recorded() {
        let mut fatal = outcome(LoopPhase::Fatal);
        fatal.fatal = Some(FatalReason::NoParsedErrors);
        let state = FixStep.update(&State::default(), &[ActionResult::Repair(fatal)]);
        assert_eq!(state.get_str(keys::FIX_FATAL_REASON), Some("no_parsed_errors"));
    }
}
