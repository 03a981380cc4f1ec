//! Bounded fan-out of independent per-file runs.
//!
//! Each job owns its state chain, so workers share only the coordinator
//! (registry and configuration, both read-only) and the cancel token.

use std::thread;

use tracing::{debug, info, warn};

use crate::coordinator::{Coordinator, cancelled};
use crate::core::goal::Goal;
use crate::core::state::{Data, State};

/// One independent run: a goal plus its seed data.
#[derive(Debug, Clone)]
pub struct Job {
    pub goal: Goal,
    pub initial: Data,
}

impl Coordinator {
    /// Run every job on at most `coordinator.workers` threads.
    ///
    /// Results come back in job order. Once the cancel token fires, jobs not
    /// yet started are returned as cancelled states without running.
    pub fn run_many(&self, jobs: Vec<Job>) -> Vec<State> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = self.config().coordinator.workers.clamp(1, total);
        info!(jobs = total, workers, "fanning out");

        let (job_tx, job_rx) = crossbeam_channel::bounded::<(usize, Job)>(workers);
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, State)>();

        thread::scope(|scope| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move || {
                    for (index, job) in job_rx.iter() {
                        let state = if self.cancel_token().is_cancelled() {
                            debug!(worker, index, "skipping job after cancellation");
                            cancelled(&self.state_manager().initialize(&job.goal, Some(job.initial)))
                        } else {
                            debug!(worker, index, goal = %job.goal.name, "job started");
                            self.run_goal(&job.goal, Some(job.initial))
                        };
                        if result_tx.send((index, state)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for (index, job) in jobs.into_iter().enumerate() {
                if job_tx.send((index, job)).is_err() {
                    warn!(index, "workers exited early");
                    break;
                }
            }
            drop(job_tx);
        });

        let mut results: Vec<(usize, State)> = result_rx.iter().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, state)| state).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::cancel::CancelToken;
    use crate::core::keys;
    use crate::core::state::data_of;
    use crate::io::config::LoopConfig;
    use crate::tools::{Params, Tool, ToolContext, ToolId, ToolRegistry};

    /// Index tool that cancels the run after a fixed number of calls.
    struct CountingIndex {
        calls: Arc<AtomicUsize>,
        cancel_after: usize,
        cancel: CancelToken,
    }

    impl Tool for CountingIndex {
        fn id(&self) -> ToolId {
            ToolId::IndexRepository
        }

        fn run(&self, _params: &Params, _ctx: &ToolContext) -> anyhow::Result<Params> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.cancel_after {
                self.cancel.cancel();
            }
            Ok(Params::new())
        }
    }

    fn coordinator(workers: usize, cancel_after: usize) -> (Coordinator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cancel = CancelToken::new();
        let mut registry = ToolRegistry::new();
        registry.register(CountingIndex {
            calls: Arc::clone(&calls),
            cancel_after,
            cancel: cancel.clone(),
        });
        let mut config = LoopConfig::default();
        config.coordinator.workers = workers;
        let coordinator = Coordinator::new(Arc::new(registry), config).with_cancel(cancel);
        (coordinator, calls)
    }

    fn jobs(n: usize) -> Vec<Job> {
        (0..n)
            .map(|i| Job {
                goal: Goal::for_name("index").expect("goal"),
                initial: data_of([("job", json!(i))]),
            })
            .collect()
    }

    #[test]
    fn results_keep_job_order() {
        let (coordinator, calls) = coordinator(3, usize::MAX);
        let states = coordinator.run_many(jobs(7));
        assert_eq!(states.len(), 7);
        for (i, state) in states.iter().enumerate() {
            assert_eq!(state.get_u64("job"), Some(i as u64));
            assert!(state.success());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn cancellation_skips_remaining_jobs() {
        let (coordinator, calls) = coordinator(1, 2);
        let states = coordinator.run_many(jobs(5));
        assert_eq!(states.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(states[0].success());
        for state in &states[2..] {
            assert!(!state.success());
            assert!(state.flag(keys::CANCELLED));
        }
    }

    #[test]
    fn no_jobs_no_threads() {
        let (coordinator, _) = coordinator(4, usize::MAX);
        assert!(coordinator.run_many(Vec::new()).is_empty());
    }
}
