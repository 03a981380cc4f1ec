//! Drives a goal's steps to a terminal state.
//!
//! Each step is invoked until it reports success or its invocation ceiling
//! is reached. `run` always returns a [`State`]; callers read
//! `State::success` to learn the outcome.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, info_span, instrument, warn};

use crate::agents::{Action, ActionResult, StepKind};
use crate::cancel::CancelToken;
use crate::core::goal::Goal;
use crate::core::keys;
use crate::core::state::{Data, State, data_of};
use crate::core::state_manager::StateManager;
use crate::core::types::StepName;
use crate::fix_loop::ErrorFixLoop;
use crate::io::Capabilities;
use crate::io::config::{FailurePolicy, LoopConfig};
use crate::tools::{ToolContext, ToolError, ToolRegistry};

pub struct Coordinator {
    registry: Arc<ToolRegistry>,
    config: LoopConfig,
    state_manager: StateManager,
    cancel: CancelToken,
}

/// How one step's invocations ended.
enum StepRun {
    Succeeded(State),
    Failed(State),
    /// Cancellation or a precondition violation: stop the whole run.
    Halted(State),
}

impl Coordinator {
    pub fn new(registry: Arc<ToolRegistry>, config: LoopConfig) -> Self {
        Self {
            registry,
            config,
            state_manager: StateManager,
            cancel: CancelToken::new(),
        }
    }

    /// Standard tools over the local adapters rooted at `root`.
    pub fn local(root: &Path, config: LoopConfig) -> Result<Self> {
        let caps = Capabilities::local(root, &config)?;
        let registry = ToolRegistry::standard(&caps, &config);
        Ok(Self::new(Arc::new(registry), config))
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn state_manager(&self) -> &StateManager {
        &self.state_manager
    }

    /// Run the catalogue plan for `goal`.
    pub fn run_goal(&self, goal: &Goal, initial: Option<Data>) -> State {
        self.run(goal, &goal.plan(), initial)
    }

    /// Run `steps` in order for `goal`.
    ///
    /// The returned state is successful only when every step succeeded and
    /// the goal's criteria hold.
    #[instrument(skip_all, fields(goal = %goal.name, steps = steps.len()))]
    pub fn run(&self, goal: &Goal, steps: &[StepName], initial: Option<Data>) -> State {
        let ctx = ToolContext::from_config(&self.config.tools, self.cancel.clone());
        let mut state = self.state_manager.initialize(goal, initial);
        let mut all_succeeded = true;

        for &name in steps {
            let step = StepKind::new(name, &self.config);
            match self.run_step(&step, state, &ctx) {
                StepRun::Succeeded(next) => state = next,
                StepRun::Failed(next) => {
                    all_succeeded = false;
                    state = next;
                    if self.config.coordinator.failure_policy == FailurePolicy::Abort {
                        warn!(step = %name, "step failed, aborting run");
                        return state.with_success(false);
                    }
                    warn!(step = %name, "step failed, advancing");
                }
                StepRun::Halted(next) => return next,
            }
        }

        let achieved = all_succeeded && state.success() && goal.is_achieved(&state);
        info!(achieved, "run finished");
        state.with_success(achieved)
    }

    fn run_step(&self, step: &StepKind, mut state: State, ctx: &ToolContext) -> StepRun {
        let name = step.name();
        let ceiling = self.config.coordinator.max_invocations.for_step(name);
        let _span = info_span!("step", step = %name).entered();

        for invocation in 1..=ceiling {
            if self.cancel.is_cancelled() {
                return StepRun::Halted(cancelled(&state));
            }
            let actions = step.plan(&state);
            debug!(invocation, actions = actions.len(), "step planned");

            let mut results = Vec::with_capacity(actions.len());
            for action in &actions {
                match self.execute(action, ctx) {
                    Ok(result) => results.push(result),
                    Err(err) => {
                        warn!(err = %err, "precondition violated");
                        return StepRun::Halted(state.with_error(err.to_string()));
                    }
                }
            }

            let step_result = step.update(&state, &results);
            state = self.state_manager.merge(&state, &step_result);
            if self.cancel.is_cancelled() {
                return StepRun::Halted(cancelled(&state));
            }
            if step.is_success(&state) {
                info!(invocation, "step succeeded");
                return StepRun::Succeeded(state);
            }
            if actions.is_empty() {
                // No progress is possible without new input.
                break;
            }
        }
        warn!(ceiling, err = ?state.get_str(keys::ERROR), "step did not succeed");
        StepRun::Failed(state)
    }

    fn execute(&self, action: &Action, ctx: &ToolContext) -> Result<ActionResult, ToolError> {
        match action {
            Action::Invoke(request) => {
                let output = self.registry.dispatch(request, ctx)?;
                Ok(ActionResult::Tool {
                    request: request.clone(),
                    output,
                })
            }
            Action::Repair(request) => {
                let fix_loop = ErrorFixLoop::new(&self.registry, ctx, &self.config.fix_loop);
                Ok(ActionResult::Repair(fix_loop.run(request)?))
            }
        }
    }
}

pub(crate) fn cancelled(state: &State) -> State {
    state
        .with_error("cancelled")
        .update(data_of([(keys::CANCELLED, Value::Bool(true))]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{Params, Tool, ToolId};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Index tool that fails a fixed number of times before succeeding.
    struct FlakyIndex {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    impl Tool for FlakyIndex {
        fn id(&self) -> ToolId {
            ToolId::IndexRepository
        }

        fn run(&self, _params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                anyhow::bail!("disk busy");
            }
            let mut out = Params::new();
            out.insert("indexed_files".to_string(), json!(7));
            Ok(out)
        }
    }

    fn coordinator(failures: u32, config: LoopConfig) -> (Coordinator, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(FlakyIndex {
            failures,
            calls: Arc::clone(&calls),
        });
        (Coordinator::new(Arc::new(registry), config), calls)
    }

    #[test]
    fn retries_a_failing_step_up_to_its_ceiling() {
        let (coordinator, calls) = coordinator(1, LoopConfig::default());
        let goal = Goal::for_name("index").expect("goal");
        let state = coordinator.run_goal(&goal, None);
        assert!(state.success());
        assert_eq!(state.get_u64(keys::INDEXED_FILES), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn exhausted_step_returns_failed_state() {
        let (coordinator, calls) = coordinator(10, LoopConfig::default());
        let goal = Goal::for_name("index").expect("goal");
        let state = coordinator.run_goal(&goal, None);
        assert!(!state.success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(
            state
                .get_str(keys::ERROR)
                .is_some_and(|e| e.contains("disk busy"))
        );
    }

    #[test]
    fn precondition_error_becomes_failed_state() {
        let coordinator = Coordinator::new(Arc::new(ToolRegistry::new()), LoopConfig::default());
        let goal = Goal::for_name("index").expect("goal");
        let state = coordinator.run_goal(&goal, None);
        assert!(!state.success());
        assert!(
            state
                .get_str(keys::ERROR)
                .is_some_and(|e| e.contains("no such tool"))
        );
    }

    #[test]
    fn cancelled_run_is_marked() {
        let (coordinator, calls) = coordinator(0, LoopConfig::default());
        coordinator.cancel_token().cancel();
        let state = coordinator.run_goal(&Goal::for_name("index").expect("goal"), None);
        assert!(!state.success());
        assert!(state.flag(keys::CANCELLED));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_plan_is_not_achieved() {
        let (coordinator, _) = coordinator(0, LoopConfig::default());
        let state = coordinator.run_goal(&Goal::new("custom"), None);
        assert!(!state.success());
    }

    #[test]
    fn advance_policy_runs_later_steps() {
        let mut config = LoopConfig::default();
        config.coordinator.failure_policy = FailurePolicy::Advance;
        let (coordinator, calls) = coordinator(10, config);
        let state = coordinator.run(
            &Goal::new("twice"),
            &[StepName::Index, StepName::Index],
            None,
        );
        assert!(!state.success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
