//! Schedule trigger loop - runs pipelines when their cron schedules fire

use crate::{
    core::{
        schedule::{next_fire, ScheduleTrigger},
        Overrides, PipelineRun, Project,
    },
    error::PipelineError,
    execution::{ExecutionEngine, FailurePolicy},
    runner::CommandRunner,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use tracing::{error, info};

/// Fires a project's schedule triggers against one engine
pub struct TriggerLoop<'a, C> {
    project: &'a Project,
    engine: &'a ExecutionEngine<C>,
    policy: FailurePolicy,
    overrides: Overrides,
}

impl<'a, C: CommandRunner> TriggerLoop<'a, C> {
    pub fn new(project: &'a Project, engine: &'a ExecutionEngine<C>, policy: FailurePolicy) -> Self {
        Self {
            project,
            engine,
            policy,
            overrides: Overrides::new(),
        }
    }

    /// Run-level overrides applied to every fired run
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Next fire time after `after` and the triggers due then
    pub fn next_due(&self, after: DateTime<Utc>) -> Option<(DateTime<Utc>, Vec<&'a ScheduleTrigger>)> {
        next_fire(&self.project.schedules, after)
    }

    /// Plan and execute the pipeline a trigger points at
    pub async fn fire(&self, trigger: &ScheduleTrigger) -> Result<PipelineRun, PipelineError> {
        info!("Trigger '{}' fired: running pipeline '{}'", trigger.name, trigger.pipeline);
        let mut run = self
            .project
            .plan_pipeline(&trigger.pipeline)?
            .with_overrides(self.overrides.clone());
        self.engine.execute(&mut run, self.policy).await?;
        Ok(run)
    }

    /// Sleep until each fire time and run the due pipelines, forever
    ///
    /// Returns only when no trigger will ever fire again. A run that cannot
    /// start is logged and the loop moves on to the next fire time.
    pub async fn serve<F, Fut>(&self, mut on_finished: F) -> Result<(), PipelineError>
    where
        F: FnMut(ScheduleTrigger, PipelineRun) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut cursor = Utc::now();

        while let Some((at, due)) = self.next_due(cursor) {
            let names: Vec<&str> = due.iter().map(|t| t.name.as_str()).collect();
            info!("Next fire at {} for {:?}", at, names);

            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            for trigger in due {
                match self.fire(trigger).await {
                    Ok(run) => on_finished(trigger.clone(), run).await,
                    Err(e) => error!("Trigger '{}' could not run '{}': {}", trigger.name, trigger.pipeline, e),
                }
            }
            cursor = at;
        }

        info!("No schedule will fire again, stopping");
        Ok(())
    }
}
