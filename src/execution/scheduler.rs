//! Execution scheduler - determines which step runs next

use crate::core::{PipelineRun, StepState};
use serde::{Deserialize, Serialize};

/// What happens to the rest of a run when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Skip the failed step's dependents; independent branches keep running
    #[default]
    Continue,
    /// Skip every step that has not started yet
    FailFast,
}

/// Scheduler for determining which steps to run
///
/// Steps run one at a time in the run's topological order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    policy: FailurePolicy,
}

impl ExecutionScheduler {
    pub fn new(policy: FailurePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// First pending step, in execution order, whose upstream all succeeded
    pub fn next_step(&self, run: &PipelineRun) -> Option<String> {
        run.execution_order()
            .iter()
            .find(|name| {
                run.step(name).is_some_and(|step| step.state.is_pending())
                    && run.upstream.get(*name).map_or(true, |deps| {
                        deps.iter()
                            .all(|dep| run.step(dep).is_some_and(|d| d.state.is_succeeded()))
                    })
            })
            .cloned()
    }

    /// Pending steps that can no longer run after `failed` failed
    pub fn steps_to_skip(&self, run: &PipelineRun, failed: &str) -> Vec<String> {
        match self.policy {
            FailurePolicy::Continue => self.pending_dependents(run, failed),
            FailurePolicy::FailFast => run
                .execution_order()
                .iter()
                .filter(|name| run.step(name).is_some_and(|s| matches!(s.state, StepState::Pending)))
                .cloned()
                .collect(),
        }
    }

    /// Pending steps in the run that depend, directly or not, on `step`
    pub fn pending_dependents(&self, run: &PipelineRun, step: &str) -> Vec<String> {
        run.downstream_in_run(step)
            .into_iter()
            .filter(|name| run.step(name).is_some_and(|s| matches!(s.state, StepState::Pending)))
            .collect()
    }
}
