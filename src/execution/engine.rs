//! Main execution engine - drives a pipeline run to completion

use crate::{
    core::{
        environment::EnvironmentResolver,
        state::{ExecutionStatus, SkipReason, StepState},
        step::StepKind,
        PipelineRun,
    },
    error::PipelineError,
    execution::{ExecutionScheduler, FailurePolicy, StepExecutor, StepOutcome},
    runner::{CommandRunner, Warehouse},
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        execution_id: Uuid,
        pipeline_name: String,
        total_steps: usize,
    },
    StepStarted {
        step: String,
    },
    StepOutput {
        step: String,
        output: String,
    },
    StepSucceeded {
        step: String,
        duration: Duration,
    },
    StepFailed {
        step: String,
        error: String,
    },
    StepSkipped {
        step: String,
        reason: SkipReason,
    },
    RunFinished {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
pub struct ExecutionEngine<C> {
    executor: StepExecutor<C>,
    resolver: EnvironmentResolver,
    event_handlers: Vec<EventHandler>,
}

impl<C: CommandRunner> ExecutionEngine<C> {
    pub fn new(runner: C, resolver: EnvironmentResolver) -> Self {
        Self {
            executor: StepExecutor::new(runner),
            resolver,
            event_handlers: Vec::new(),
        }
    }

    /// Attach the warehouse shared by query and quality gate steps
    pub fn with_warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.executor = self.executor.with_warehouse(warehouse);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Check external resources and placeholders before any step runs
    ///
    /// Working directories and CSV directories must exist and be directories,
    /// query-backed steps need a warehouse, and every `{{ VAR }}` a step would
    /// render must resolve in that step's environment. Steps whose
    /// `skip_unless_env` variables are missing are not rendered, since they
    /// will be skipped.
    pub fn preflight(&self, run: &PipelineRun) -> Result<(), PipelineError> {
        for name in run.execution_order() {
            let Some(step) = run.step(name) else {
                continue;
            };
            let in_step = |e: PipelineError| match e {
                PipelineError::Configuration { message } => {
                    PipelineError::configuration(format!("step '{}': {}", step.name, message))
                }
                other => other,
            };

            match &step.kind {
                StepKind::Command(spec) => {
                    if let Some(dir) = &spec.working_dir {
                        require_dir(dir, "working directory").map_err(in_step)?;
                    }
                }
                StepKind::CleanCsv(spec) => require_dir(&spec.dir, "CSV directory").map_err(in_step)?,
                StepKind::Query(_) | StepKind::QualityGate(_) => {}
            }
            if step.kind.uses_warehouse() && !self.executor.has_warehouse() {
                return Err(PipelineError::configuration(format!(
                    "step '{}' needs a warehouse but none is configured",
                    step.name
                )));
            }

            let env = self.resolver.resolve(&run.overrides_for(step));
            if !step.missing_required(&env).is_empty() {
                continue;
            }
            match &step.kind {
                StepKind::Command(spec) => {
                    env.render(&spec.program).map_err(in_step)?;
                    for arg in &spec.args {
                        env.render(arg).map_err(in_step)?;
                    }
                }
                StepKind::Query(spec) => {
                    env.render(&spec.sql).map_err(in_step)?;
                }
                StepKind::QualityGate(checks) => {
                    for check in checks {
                        env.render(&check.sql).map_err(in_step)?;
                    }
                }
                StepKind::CleanCsv(_) => {}
            }
        }
        Ok(())
    }

    /// Execute the entire run
    ///
    /// Configuration problems are returned as errors before any step starts.
    /// Step failures are recorded on the run; the returned status says
    /// whether any occurred.
    pub async fn execute(&self, run: &mut PipelineRun, policy: FailurePolicy) -> Result<ExecutionStatus, PipelineError> {
        self.preflight(run)?;

        let execution_id = run.state.execution_id;
        let scheduler = ExecutionScheduler::new(policy);

        info!(
            "Starting pipeline run: {} ({}), {} steps, {:?}",
            run.name,
            execution_id,
            run.steps.len(),
            policy
        );
        run.state.start(run.steps.len());
        self.emit_event(ExecutionEvent::RunStarted {
            execution_id,
            pipeline_name: run.name.clone(),
            total_steps: run.steps.len(),
        });

        while let Some(name) = scheduler.next_step(run) {
            self.execute_step(run, &scheduler, &name).await;
            run.state.update_counts(run.steps.values().map(|s| &s.state));
        }

        let stalled: Vec<&String> = run
            .steps
            .iter()
            .filter(|(_, step)| step.state.is_pending())
            .map(|(name, _)| name)
            .collect();
        if !stalled.is_empty() {
            warn!("Steps left pending at end of run: {:?}", stalled);
        }

        let status = if run.steps.values().any(|s| s.state.is_failed()) {
            run.state.fail();
            ExecutionStatus::Failed
        } else {
            run.state.complete();
            ExecutionStatus::Completed
        };

        info!(
            "Pipeline run finished: {} - {} ({} succeeded, {} failed, {} skipped)",
            run.name, status, run.state.succeeded_steps, run.state.failed_steps, run.state.skipped_steps
        );
        self.emit_event(ExecutionEvent::RunFinished { execution_id, status });

        Ok(status)
    }

    /// Execute a single step
    async fn execute_step(&self, run: &mut PipelineRun, scheduler: &ExecutionScheduler, name: &str) {
        let Some(step) = run.step(name).cloned() else {
            return;
        };

        let env = self.resolver.resolve(&run.overrides_for(&step));
        let missing = step.missing_required(&env);
        if !missing.is_empty() {
            self.skip_step(run, name, SkipReason::MissingEnvironment { variables: missing });
            for dependent in scheduler.pending_dependents(run, name) {
                self.skip_step(
                    run,
                    &dependent,
                    SkipReason::UpstreamSkipped {
                        step: name.to_string(),
                    },
                );
            }
            return;
        }

        let started_at = Utc::now();
        if let Some(s) = run.step_mut(name) {
            s.state = StepState::Running { started_at };
        }
        info!("Step '{}' started ({})", name, step.kind.label());
        self.emit_event(ExecutionEvent::StepStarted {
            step: name.to_string(),
        });

        let outcome = self.executor.execute(&step, &env).await;

        match outcome {
            StepOutcome::Succeeded(result) => {
                info!("Step '{}' succeeded in {:?}", name, result.duration);
                if !result.stdout.trim().is_empty() {
                    self.emit_event(ExecutionEvent::StepOutput {
                        step: name.to_string(),
                        output: result.stdout.clone(),
                    });
                }
                self.emit_event(ExecutionEvent::StepSucceeded {
                    step: name.to_string(),
                    duration: result.duration,
                });
                if let Some(s) = run.step_mut(name) {
                    s.state = StepState::Succeeded {
                        result,
                        started_at,
                        completed_at: Utc::now(),
                    };
                }
            }
            StepOutcome::Failed { error, result } => {
                error!("Step '{}' failed: {}", name, error);
                self.emit_event(ExecutionEvent::StepFailed {
                    step: name.to_string(),
                    error: error.to_string(),
                });
                if let Some(s) = run.step_mut(name) {
                    s.state = StepState::Failed {
                        error,
                        result,
                        started_at,
                        failed_at: Utc::now(),
                    };
                }

                for skipped in scheduler.steps_to_skip(run, name) {
                    let reason = match scheduler.policy() {
                        FailurePolicy::Continue => SkipReason::UpstreamFailed {
                            step: name.to_string(),
                        },
                        FailurePolicy::FailFast => SkipReason::FailFast {
                            failed: name.to_string(),
                        },
                    };
                    self.skip_step(run, &skipped, reason);
                }
            }
        }
    }

    fn skip_step(&self, run: &mut PipelineRun, name: &str, reason: SkipReason) {
        warn!("Step '{}' skipped: {}", name, reason);
        self.emit_event(ExecutionEvent::StepSkipped {
            step: name.to_string(),
            reason: reason.clone(),
        });
        if let Some(s) = run.step_mut(name) {
            s.state = StepState::Skipped { reason };
        }
    }
}

fn require_dir(dir: &Path, what: &str) -> Result<(), PipelineError> {
    if !dir.exists() {
        return Err(PipelineError::configuration(format!(
            "{} {} does not exist",
            what,
            dir.display()
        )));
    }
    if !dir.is_dir() {
        return Err(PipelineError::configuration(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(())
}
