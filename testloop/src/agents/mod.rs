//! Steps: the phase pipeline each goal is composed of.
//!
//! A step never touches a capability. `observe`, `think` and `decide` are
//! pure and produce [`Action`]s; the coordinator executes them and hands the
//! [`ActionResult`]s back to `update`, which folds them into a new state.

pub mod analyze;
pub mod fix;
pub mod generate;
pub mod index;

use serde_json::Value;

use crate::core::keys;
use crate::core::state::{Data, State};
use crate::core::types::StepName;
use crate::fix_loop::{RepairOutcome, RepairRequest};
use crate::io::config::LoopConfig;
use crate::tools::{ActionRequest, Params, ToolId, error_of, succeeded};

pub use self::analyze::AnalyzeStep;
pub use self::fix::FixStep;
pub use self::generate::GenerateStep;
pub use self::index::IndexStep;

/// Something a step wants done.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Dispatch one tool through the registry.
    Invoke(ActionRequest),
    /// Drive the error-fix loop for one test file.
    Repair(RepairRequest),
}

/// The result of executing an [`Action`].
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Tool { request: ActionRequest, output: Params },
    Repair(RepairOutcome),
}

impl ActionResult {
    /// Output of the last tool call matching `tool`.
    pub fn find(results: &[ActionResult], tool: ToolId) -> Option<&Params> {
        results.iter().rev().find_map(|result| match result {
            ActionResult::Tool { request, output } if request.tool == tool => Some(output),
            _ => None,
        })
    }

    /// Output of the last `tool` call whose `param` equalled `value`.
    pub fn find_with<'a>(
        results: &'a [ActionResult],
        tool: ToolId,
        param: &str,
        value: &str,
    ) -> Option<&'a Params> {
        results.iter().rev().find_map(|result| match result {
            ActionResult::Tool { request, output }
                if request.tool == tool
                    && request.params.get(param).and_then(Value::as_str) == Some(value) =>
            {
                Some(output)
            }
            _ => None,
        })
    }
}

/// One phase pipeline. Implementations hold configuration only.
pub trait Step {
    type Observations;
    type Thoughts;

    fn name(&self) -> StepName;

    /// Gather read-only facts from the state.
    fn observe(&self, state: &State) -> Self::Observations;

    /// Choose a course of action. Must not call tools.
    fn think(&self, observations: Self::Observations, state: &State) -> Self::Thoughts;

    /// Turn the chosen course into actions. An empty list is a no-op pass.
    fn decide(&self, thoughts: Self::Thoughts, state: &State) -> Vec<Action>;

    /// Fold action results into a new state. Failures are recorded, never raised.
    fn update(&self, state: &State, results: &[ActionResult]) -> State;

    fn is_success(&self, state: &State) -> bool;
}

/// observe, think, decide.
pub fn plan<S: Step>(step: &S, state: &State) -> Vec<Action> {
    let observations = step.observe(state);
    let thoughts = step.think(observations, state);
    step.decide(thoughts, state)
}

/// The closed set of step kinds, built from configuration.
#[derive(Debug, Clone)]
pub enum StepKind {
    Index(IndexStep),
    Analyze(AnalyzeStep),
    Generate(GenerateStep),
    Fix(FixStep),
}

impl StepKind {
    pub fn new(name: StepName, config: &LoopConfig) -> Self {
        match name {
            StepName::Index => StepKind::Index(IndexStep),
            StepName::Analyze => StepKind::Analyze(AnalyzeStep::new(&config.generation)),
            StepName::Generate => StepKind::Generate(GenerateStep),
            StepName::Fix => StepKind::Fix(FixStep),
        }
    }

    pub fn name(&self) -> StepName {
        match self {
            StepKind::Index(step) => step.name(),
            StepKind::Analyze(step) => step.name(),
            StepKind::Generate(step) => step.name(),
            StepKind::Fix(step) => step.name(),
        }
    }

    pub fn plan(&self, state: &State) -> Vec<Action> {
        match self {
            StepKind::Index(step) => plan(step, state),
            StepKind::Analyze(step) => plan(step, state),
            StepKind::Generate(step) => plan(step, state),
            StepKind::Fix(step) => plan(step, state),
        }
    }

    pub fn update(&self, state: &State, results: &[ActionResult]) -> State {
        match self {
            StepKind::Index(step) => step.update(state, results),
            StepKind::Analyze(step) => step.update(state, results),
            StepKind::Generate(step) => step.update(state, results),
            StepKind::Fix(step) => step.update(state, results),
        }
    }

    pub fn is_success(&self, state: &State) -> bool {
        match self {
            StepKind::Index(step) => step.is_success(state),
            StepKind::Analyze(step) => step.is_success(state),
            StepKind::Generate(step) => step.is_success(state),
            StepKind::Fix(step) => step.is_success(state),
        }
    }
}

/// Record a failed tool call under `error` in `partial`.
pub(crate) fn note_failure(partial: &mut Data, what: &str, output: &Params) {
    let detail = error_of(output).unwrap_or("unknown error");
    partial.insert(
        keys::ERROR.to_string(),
        Value::String(format!("{what}: {detail}")),
    );
}

/// `Some(output)` when the call succeeded.
pub(crate) fn ok(output: Option<&Params>) -> Option<&Params> {
    output.filter(|output| succeeded(output))
}

/// Set the success flag, clearing a stale error once the step succeeds.
pub(crate) fn settle(partial: &mut Data, success: bool) {
    partial.insert(keys::SUCCESS.to_string(), Value::Bool(success));
    if success {
        partial.insert(keys::ERROR.to_string(), Value::Null);
    }
}
