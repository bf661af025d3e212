//! Project and pipeline run domain models

use crate::core::{
    config::{ProjectConfig, WarehouseConfig},
    environment::{layer_overrides, EnvironmentResolver, Overrides},
    graph::{DependencyGraph, Selection},
    schedule::{CronSchedule, ScheduleTrigger},
    state::{ExecutionResult, ExecutionStatus, PipelineState, StepState},
    step::Step,
};
use crate::error::PipelineError;
use indexmap::IndexMap;
use std::collections::HashSet;

/// A named selection of steps that is materialized together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub name: String,
    pub selection: Selection,
}

/// Every declared step plus the pipelines and schedules over them
///
/// Construction validates the whole project: step definitions, referential
/// integrity and acyclicity of the graph, pipeline selections and schedule
/// targets. A `Project` that exists is runnable.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,

    /// Declared steps, in declaration order
    pub steps: IndexMap<String, Step>,

    pub graph: DependencyGraph,

    /// Project-wide environment overrides
    pub environment: Overrides,

    pub pipelines: IndexMap<String, PipelineDefinition>,

    pub schedules: Vec<ScheduleTrigger>,

    pub warehouse: Option<WarehouseConfig>,
}

impl Project {
    /// Create a project from configuration
    pub fn from_config(config: &ProjectConfig) -> Result<Self, PipelineError> {
        let mut graph = DependencyGraph::new();
        let mut steps = IndexMap::new();

        for step_config in &config.steps {
            let step = Step::from_config(step_config, &config.defaults, &config.base_dir)?;
            graph.add_step(&step.name, step.dependencies.iter().cloned())?;
            steps.insert(step.name.clone(), step);
        }
        graph.validate()?;

        let mut pipelines = IndexMap::new();
        for pipeline in &config.pipelines {
            graph.resolve_selection(&pipeline.selection).map_err(|e| {
                PipelineError::configuration(format!("pipeline '{}': {}", pipeline.name, e))
            })?;
            let definition = PipelineDefinition {
                name: pipeline.name.clone(),
                selection: pipeline.selection.clone(),
            };
            if pipelines.insert(pipeline.name.clone(), definition).is_some() {
                return Err(PipelineError::configuration(format!(
                    "duplicate pipeline name '{}'",
                    pipeline.name
                )));
            }
        }

        let mut schedules = Vec::new();
        for schedule in &config.schedules {
            if !pipelines.contains_key(&schedule.pipeline) {
                return Err(PipelineError::configuration(format!(
                    "schedule '{}' references unknown pipeline '{}'",
                    schedule.name, schedule.pipeline
                )));
            }
            schedules.push(ScheduleTrigger {
                name: schedule.name.clone(),
                schedule: CronSchedule::parse(&schedule.cron)?,
                pipeline: schedule.pipeline.clone(),
            });
        }

        Ok(Project {
            name: config.name.clone(),
            steps,
            graph,
            environment: config.environment.clone(),
            pipelines,
            schedules,
            warehouse: config.warehouse.clone(),
        })
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Look up a named pipeline
    pub fn pipeline(&self, name: &str) -> Result<&PipelineDefinition, PipelineError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| PipelineError::configuration(format!("unknown pipeline '{}'", name)))
    }

    /// Instantiate a run over a selection of steps
    pub fn plan(&self, name: impl Into<String>, selection: &Selection) -> Result<PipelineRun, PipelineError> {
        let selected = self.graph.resolve_selection(selection)?;
        let upstream = self.graph.induced_dependencies(&selected)?;
        let execution_order = DependencyGraph::order_induced(&upstream)?;

        let steps = execution_order
            .iter()
            .filter_map(|name| self.steps.get(name))
            .map(|step| {
                let mut step = step.clone();
                step.state = StepState::Pending;
                (step.name.clone(), step)
            })
            .collect();

        Ok(PipelineRun {
            name: name.into(),
            steps,
            upstream,
            environment: self.environment.clone(),
            overrides: Overrides::new(),
            state: PipelineState::new(),
            execution_order,
        })
    }

    /// Rendered warehouse URL, if a warehouse is configured
    ///
    /// Placeholders resolve against the project environment with the run's
    /// overrides layered on top, as for any step.
    pub fn warehouse_url(
        &self,
        resolver: &EnvironmentResolver,
        overrides: &Overrides,
    ) -> Result<Option<String>, PipelineError> {
        let Some(config) = &self.warehouse else {
            return Ok(None);
        };
        let env = resolver.resolve(&layer_overrides(&[&self.environment, overrides]));
        env.render(&config.url)
            .map(Some)
            .map_err(|e| PipelineError::configuration(format!("warehouse url: {}", e)))
    }

    /// Instantiate a run of a named pipeline
    pub fn plan_pipeline(&self, name: &str) -> Result<PipelineRun, PipelineError> {
        let definition = self.pipeline(name)?;
        self.plan(&definition.name, &definition.selection)
    }
}

/// One execution of a selected, ordered subset of steps
///
/// Owns its steps (and through them every execution result); nothing
/// outside the run mutates them.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Pipeline name
    pub name: String,

    /// Selected steps, keyed by name, in execution order
    pub steps: IndexMap<String, Step>,

    /// Ordering constraints between the selected steps
    pub upstream: IndexMap<String, Vec<String>>,

    /// Project-wide environment overrides
    pub environment: Overrides,

    /// Run-level overrides (e.g. from the command line), applied last
    pub overrides: Overrides,

    /// Execution state
    pub state: PipelineState,

    /// Topological order of `steps`
    execution_order: Vec<String>,
}

impl PipelineRun {
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    /// Get a mutable step by name
    pub fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Effective overrides for one step: project, then step, then run
    pub fn overrides_for(&self, step: &Step) -> Overrides {
        layer_overrides(&[&self.environment, &step.env, &self.overrides])
    }

    /// Selected steps that transitively depend on `name`, in execution order
    pub fn downstream_in_run(&self, name: &str) -> Vec<String> {
        let mut affected: HashSet<&str> = HashSet::new();
        affected.insert(name);

        // Execution order is topological, so one pass sees every dependency first
        for step in &self.execution_order {
            let depends = self
                .upstream
                .get(step)
                .is_some_and(|deps| deps.iter().any(|d| affected.contains(d.as_str())));
            if depends {
                affected.insert(step.as_str());
            }
        }

        self.execution_order
            .iter()
            .filter(|step| step.as_str() != name && affected.contains(step.as_str()))
            .cloned()
            .collect()
    }

    /// Check if every step reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.values().all(|s| s.state.is_terminal())
    }

    /// Check if pipeline has failed
    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
    }

    /// Captured results, in execution order
    pub fn results(&self) -> Vec<(&str, &ExecutionResult)> {
        self.execution_order
            .iter()
            .filter_map(|name| {
                let step = self.steps.get(name)?;
                step.state.result().map(|r| (name.as_str(), r))
            })
            .collect()
    }
}
