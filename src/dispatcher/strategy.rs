//! Execution strategies: how the per-agent jobs of one buffer are run.
//!
//! Both strategies return one result per job, in job order, and neither
//! returns before every job has finished. A panicking job becomes an
//! [`FlagError::AgentEvaluation`] for that job only.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::process::Process;
use crate::store::FlagPatch;
use crate::utilities::errors::{FlagError, Result};

/// One agent's evaluation of one buffer.
pub struct AgentJob<'a> {
    pub agent: &'a str,
    pub time: usize,
    pub run: Box<dyn FnOnce() -> Result<FlagPatch> + Send + 'a>,
}

impl fmt::Debug for AgentJob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentJob")
            .field("agent", &self.agent)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl AgentJob<'_> {
    fn panicked(agent: &str, time: usize) -> FlagError {
        FlagError::evaluation(agent, time, "agent panicked")
    }

    fn execute(self) -> Result<FlagPatch> {
        let (agent, time) = (self.agent, self.time);
        catch_unwind(AssertUnwindSafe(self.run)).unwrap_or_else(|_| Err(Self::panicked(agent, time)))
    }
}

/// Runs a buffer's agent jobs.
pub trait ExecutionStrategy: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Run every job to completion; results are in job order.
    fn run_all<'a>(&self, jobs: Vec<AgentJob<'a>>) -> Vec<Result<FlagPatch>>;
}

/// Jobs run one after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl ExecutionStrategy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn run_all<'a>(&self, jobs: Vec<AgentJob<'a>>) -> Vec<Result<FlagPatch>> {
        jobs.into_iter().map(AgentJob::execute).collect()
    }
}

/// One scoped thread per job; the scope's join is the buffer barrier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Parallel;

impl ExecutionStrategy for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run_all<'a>(&self, jobs: Vec<AgentJob<'a>>) -> Vec<Result<FlagPatch>> {
        if jobs.len() < 2 {
            return Sequential.run_all(jobs);
        }
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .into_iter()
                .map(|job| {
                    let (agent, time) = (job.agent, job.time);
                    (agent, time, scope.spawn(move || job.execute()))
                })
                .collect();
            handles
                .into_iter()
                .map(|(agent, time, handle)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(AgentJob::panicked(agent, time)))
                })
                .collect()
        })
    }
}

/// Strategy for an execution mode.
pub fn strategy_for(process: Process) -> Box<dyn ExecutionStrategy> {
    match process {
        Process::Sequential => Box::new(Sequential),
        Process::Parallel => Box::new(Parallel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn patch_with(channel: usize) -> FlagPatch {
        let mut patch = FlagPatch::new(4, 1);
        patch.set(channel, 0).unwrap();
        patch
    }

    fn jobs<'a>(counter: &'a AtomicUsize) -> Vec<AgentJob<'a>> {
        (0..4)
            .map(|i| AgentJob {
                agent: "job",
                time: 0,
                run: Box::new(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if i == 2 {
                        Err(FlagError::evaluation("job", 0, "bad input"))
                    } else {
                        Ok(patch_with(i))
                    }
                }),
            })
            .collect()
    }

    #[test]
    fn test_results_in_job_order() {
        for strategy in [strategy_for(Process::Sequential), strategy_for(Process::Parallel)] {
            let counter = AtomicUsize::new(0);
            let results = strategy.run_all(jobs(&counter));
            assert_eq!(counter.load(Ordering::Relaxed), 4, "{}", strategy.name());
            assert_eq!(results.len(), 4);
            assert_eq!(results[0].as_ref().unwrap().cell_state(0, 0), Some(true));
            assert_eq!(results[3].as_ref().unwrap().cell_state(3, 0), Some(true));
            assert!(results[2].is_err());
        }
    }

    #[test]
    fn test_panic_is_contained() {
        for strategy in [strategy_for(Process::Sequential), strategy_for(Process::Parallel)] {
            let jobs = vec![
                AgentJob {
                    agent: "ok",
                    time: 3,
                    run: Box::new(|| Ok(patch_with(0))),
                },
                AgentJob {
                    agent: "boom",
                    time: 3,
                    run: Box::new(|| -> Result<FlagPatch> { panic!("boom") }),
                },
            ];
            let results = strategy.run_all(jobs);
            assert!(results[0].is_ok());
            match &results[1] {
                Err(FlagError::AgentEvaluation { agent, time, .. }) => {
                    assert_eq!(agent, "boom");
                    assert_eq!(*time, 3);
                }
                other => panic!("expected evaluation error, got {:?}", other.is_ok()),
            }
        }
    }
}
