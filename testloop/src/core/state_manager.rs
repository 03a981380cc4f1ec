//! Run-owned state transitions: seeding a run and folding step results in.

use serde_json::Value;
use tracing::debug;

use crate::core::goal::Goal;
use crate::core::keys;
use crate::core::state::{Data, State};

/// Creates and merges [`State`] values. Stateless; never mutates its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateManager;

impl StateManager {
    /// Seed the state for `goal`: `data` from `initial` (plus the goal name),
    /// no artifacts, `success=false`.
    pub fn initialize(&self, goal: &Goal, initial: Option<Data>) -> State {
        let mut data = initial.unwrap_or_default();
        data.entry(keys::GOAL.to_string())
            .or_insert_with(|| Value::String(goal.name.clone()));
        // A seeded `success` key must not leak into the flag of a fresh run.
        data.remove(keys::SUCCESS);
        State::new(data)
    }

    /// Overlay `step_result` onto `current`.
    ///
    /// Keys present in `step_result` win for both data and artifacts; the
    /// success flag is always taken from `step_result`.
    pub fn merge(&self, current: &State, step_result: &State) -> State {
        let mut data = current.data().clone();
        data.extend(
            step_result
                .data()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let mut artifacts = current.artifacts().clone();
        artifacts.extend(
            step_result
                .artifacts()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        debug!(
            data_keys = data.len(),
            artifact_keys = artifacts.len(),
            success = step_result.success(),
            "merged step result"
        );
        State::from_parts(data, artifacts, step_result.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::data_of;
    use serde_json::json;

    #[test]
    fn initialize_seeds_data_and_clears_flag() {
        let goal = Goal::new("fix");
        let state = StateManager.initialize(
            &goal,
            Some(data_of([("test_file", json!("FooTest.kt")), ("success", json!(true))])),
        );
        assert!(!state.success());
        assert!(state.artifacts().is_empty());
        assert_eq!(state.get_str("test_file"), Some("FooTest.kt"));
        assert_eq!(state.get_str(keys::GOAL), Some("fix"));
    }

    #[test]
    fn merge_prefers_right_hand_keys() {
        let a = State::new(data_of([("k", json!(1)), ("only_a", json!("a"))]))
            .add_artifact("art", json!("old"));
        let b = State::new(data_of([("k", json!(2)), ("only_b", json!("b"))]))
            .add_artifact("art", json!("new"))
            .with_success(true);

        let merged = StateManager.merge(&a, &b);
        assert_eq!(merged.get("k"), Some(&json!(2)));
        assert_eq!(merged.get("only_a"), Some(&json!("a")));
        assert_eq!(merged.get("only_b"), Some(&json!("b")));
        assert_eq!(merged.get_artifact("art"), Some(&json!("new")));
        assert!(merged.success());
    }

    #[test]
    fn merge_takes_failure_flag_from_step_result() {
        let a = State::default().with_success(true);
        let b = State::default();
        assert!(!StateManager.merge(&a, &b).success());
    }
}
