//! Test utility functions for elt-pipeline

#![allow(dead_code)]

use async_trait::async_trait;
use elt_pipeline::core::step::CommandSpec;
use elt_pipeline::core::{ExecutionResult, ExecutionStatus, PipelineRun, Project, StepState};
use elt_pipeline::execution::{ExecutionEngine, ExecutionEvent, FailurePolicy};
use elt_pipeline::runner::{CommandRunner, ResultSet, Warehouse, WarehouseError};
use elt_pipeline::{EnvironmentResolver, EnvironmentSnapshot, PipelineError, ProjectConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded command invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: String,
    pub spec: CommandSpec,
    pub env: EnvironmentSnapshot,
}

/// Runner that records invocations and returns scripted results
///
/// Results are keyed by the rendered command line (`dbt run`); anything
/// unscripted exits 0 with no output.
#[derive(Clone, Default)]
pub struct MockRunner {
    scripted: Arc<HashMap<String, ExecutionResult>>,
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of a command line
    pub fn on(mut self, command: &str, result: ExecutionResult) -> Self {
        Arc::make_mut(&mut self.scripted).insert(command.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines in the order they ran
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.command).collect()
    }

    /// Environment the given command line ran with
    pub fn env_of(&self, command: &str) -> EnvironmentSnapshot {
        self.calls()
            .into_iter()
            .find(|c| c.command == command)
            .map(|c| c.env)
            .unwrap_or_else(|| panic!("'{}' never ran; ran {:?}", command, self.commands()))
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec, env: &EnvironmentSnapshot) -> Result<ExecutionResult, PipelineError> {
        let command = spec.display();
        self.calls.lock().unwrap().push(Invocation {
            command: command.clone(),
            spec: spec.clone(),
            env: env.clone(),
        });

        Ok(self
            .scripted
            .get(&command)
            .cloned()
            .unwrap_or_else(|| ok("")))
    }
}

/// Successful invocation printing `stdout`
pub fn ok(stdout: &str) -> ExecutionResult {
    ExecutionResult::finished(Some(0), stdout.to_string(), String::new(), Duration::from_millis(1))
}

/// Invocation exiting with `code`
pub fn exit(code: i32, stdout: &str, stderr: &str) -> ExecutionResult {
    ExecutionResult::finished(Some(code), stdout.to_string(), stderr.to_string(), Duration::from_millis(1))
}

/// Warehouse answering fixed SQL strings
///
/// Unknown SQL fails the way a missing table would.
#[derive(Default)]
pub struct FixtureWarehouse {
    answers: HashMap<String, ResultSet>,
    queries: Mutex<Vec<String>>,
}

impl FixtureWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(mut self, sql: &str, count: i64) -> Self {
        self.answers.insert(sql.to_string(), ResultSet::count(count));
        self
    }

    pub fn rows(mut self, sql: &str, rows: ResultSet) -> Self {
        self.answers.insert(sql.to_string(), rows);
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Warehouse for FixtureWarehouse {
    async fn query(&self, sql: &str) -> Result<ResultSet, WarehouseError> {
        self.queries.lock().unwrap().push(sql.to_string());
        self.answers
            .get(sql)
            .cloned()
            .ok_or_else(|| WarehouseError::Query(format!("no such table in: {}", sql)))
    }
}

/// Parse and validate a project from YAML
pub fn project_from_yaml(yaml: &str) -> Project {
    ProjectConfig::from_yaml(yaml)
        .and_then(|config| config.to_project())
        .unwrap_or_else(|e| panic!("Failed to load project YAML: {}", e))
}

/// Ambient environment with nothing but a search path
pub fn clean_resolver() -> EnvironmentResolver {
    EnvironmentResolver::with_ambient([("PATH", "/usr/bin:/bin")])
}

/// Finished run together with everything the engine emitted
pub struct RunOutcome {
    pub run: PipelineRun,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
}

impl RunOutcome {
    pub fn state(&self, step: &str) -> &StepState {
        &self
            .run
            .step(step)
            .unwrap_or_else(|| panic!("Step '{}' not in run", step))
            .state
    }

    /// Steps in the order they reported started
    pub fn started(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepStarted { step } => Some(step.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Drives runs through an engine built around the given runner
pub struct Harness<C> {
    pub engine: ExecutionEngine<C>,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl<C: CommandRunner> Harness<C> {
    pub fn new(runner: C) -> Self {
        Self::with_resolver(runner, clean_resolver())
    }

    pub fn with_resolver(runner: C, resolver: EnvironmentResolver) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut engine = ExecutionEngine::new(runner, resolver);
        let sink = events.clone();
        engine.add_event_handler(move |event| sink.lock().unwrap().push(event));
        Self { engine, events }
    }

    pub fn warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.engine = self.engine.with_warehouse(warehouse);
        self
    }

    pub async fn run(&self, mut run: PipelineRun, policy: FailurePolicy) -> Result<RunOutcome, PipelineError> {
        self.events.lock().unwrap().clear();
        let status = self.engine.execute(&mut run, policy).await?;
        let events = self.events.lock().unwrap().clone();
        Ok(RunOutcome { run, status, events })
    }
}

pub fn assert_step_succeeded(outcome: &RunOutcome, step: &str) {
    let state = outcome.state(step);
    assert!(
        state.is_succeeded(),
        "Step '{}' should have succeeded, but was in state: {:?}",
        step,
        state
    );
}

/// Assert a step failed and its full error mentions `expected_error`
pub fn assert_step_failed(outcome: &RunOutcome, step: &str, expected_error: &str) {
    let error = match outcome.state(step) {
        StepState::Failed { error, .. } => error.to_string(),
        other => panic!("Step '{}' should have failed, but was in state: {:?}", step, other),
    };

    assert!(
        error.contains(expected_error),
        "Step '{}' error:\n{}\n\ndoes not contain:\n{}",
        step,
        error,
        expected_error
    );
}

/// Assert a step was skipped with a reason mentioning `expected_reason`
pub fn assert_step_skipped(outcome: &RunOutcome, step: &str, expected_reason: &str) {
    let reason = match outcome.state(step) {
        StepState::Skipped { reason } => reason.to_string(),
        other => panic!("Step '{}' should have been skipped, but was in state: {:?}", step, other),
    };

    assert!(
        reason.contains(expected_reason),
        "Step '{}' skip reason '{}' does not contain '{}'",
        step,
        reason,
        expected_reason
    );
}

pub fn assert_run_completed(outcome: &RunOutcome) {
    assert_eq!(
        outcome.status,
        ExecutionStatus::Completed,
        "Run should have completed; states: {:?}",
        outcome.run.steps.values().map(|s| (&s.name, s.state.label())).collect::<Vec<_>>()
    );
}

pub fn assert_run_failed(outcome: &RunOutcome) {
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(outcome.run.has_failed());
}
