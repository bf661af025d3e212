//! Step executor - runs individual steps through a runner or the warehouse

use crate::{
    core::{
        environment::{EnvironmentSnapshot, WAREHOUSE_VARIABLES},
        state::ExecutionResult,
        step::{CommandSpec, CsvCleanSpec, QuerySpec, QualityCheck, StderrPolicy, Step, StepKind},
    },
    error::{ExecutionFailure, PipelineError},
    execution::quality::QualityGate,
    runner::{csv_clean, CommandRunner, ResultSet, Warehouse},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of executing a step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Succeeded(ExecutionResult),
    Failed {
        error: PipelineError,
        /// Captured output, when the invocation produced any
        result: Option<ExecutionResult>,
    },
}

impl StepOutcome {
    fn failed(error: impl Into<PipelineError>) -> Self {
        StepOutcome::Failed {
            error: error.into(),
            result: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Succeeded(_))
    }
}

/// Executes a single step
pub struct StepExecutor<C> {
    runner: C,
    warehouse: Option<Arc<dyn Warehouse>>,
}

impl<C: CommandRunner> StepExecutor<C> {
    pub fn new(runner: C) -> Self {
        Self {
            runner,
            warehouse: None,
        }
    }

    /// Share one warehouse client across every query-backed step
    pub fn with_warehouse(mut self, warehouse: Arc<dyn Warehouse>) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    pub fn has_warehouse(&self) -> bool {
        self.warehouse.is_some()
    }

    /// Execute a step with its resolved environment
    pub async fn execute(&self, step: &Step, env: &EnvironmentSnapshot) -> StepOutcome {
        let present: Vec<&str> = WAREHOUSE_VARIABLES
            .iter()
            .copied()
            .filter(|name| env.get(name).is_some_and(|v| !v.is_empty()))
            .collect();
        debug!("Step '{}' warehouse variables set: {:?}", step.name, present);

        match &step.kind {
            StepKind::Command(spec) => self.execute_command(step, spec, env).await,
            StepKind::Query(spec) => self.execute_query(step, spec, env).await,
            StepKind::QualityGate(checks) => self.execute_gate(step, checks, env).await,
            StepKind::CleanCsv(spec) => self.execute_clean(step, spec).await,
        }
    }

    async fn execute_command(&self, step: &Step, spec: &CommandSpec, env: &EnvironmentSnapshot) -> StepOutcome {
        let rendered = match render_command(spec, env) {
            Ok(rendered) => rendered,
            Err(e) => return StepOutcome::failed(e),
        };

        info!("Step '{}' running: {}", step.name, rendered.display());
        let result = match self.runner.run(&rendered, env).await {
            Ok(result) => result,
            Err(e) => return StepOutcome::failed(e),
        };

        if !result.success {
            let summary = match result.exit_code {
                Some(code) => format!("'{}' exited with code {}", rendered.display(), code),
                None => format!("'{}' was terminated by a signal", rendered.display()),
            };
            return StepOutcome::Failed {
                error: ExecutionFailure::from_result(summary, &result).into(),
                result: Some(result),
            };
        }

        if result.has_stderr() {
            match step.stderr_policy {
                StderrPolicy::Log => {
                    warn!("Step '{}' wrote to stderr but exited successfully", step.name);
                }
                StderrPolicy::Fail => {
                    let summary = format!("'{}' wrote to stderr", rendered.display());
                    return StepOutcome::Failed {
                        error: ExecutionFailure::from_result(summary, &result).into(),
                        result: Some(result),
                    };
                }
            }
        }

        StepOutcome::Succeeded(result)
    }

    async fn execute_query(&self, step: &Step, spec: &QuerySpec, env: &EnvironmentSnapshot) -> StepOutcome {
        let Some(warehouse) = &self.warehouse else {
            return StepOutcome::failed(no_warehouse(step));
        };
        let sql = match env.render(&spec.sql) {
            Ok(sql) => sql,
            Err(e) => return StepOutcome::failed(e),
        };

        let started = Instant::now();
        let rows = match warehouse.query(&sql).await {
            Ok(rows) => rows,
            Err(e) => {
                return StepOutcome::failed(ExecutionFailure {
                    summary: format!("query for step '{}' failed", step.name),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                })
            }
        };
        info!("Step '{}' query returned {} rows", step.name, rows.len());

        let result = ExecutionResult::query(rows.to_json_lines(), started.elapsed());

        if let Some(threshold) = &spec.threshold {
            let actual = match rows.scalar_count() {
                Ok(actual) => actual,
                Err(e) => {
                    return StepOutcome::Failed {
                        error: ExecutionFailure::from_result(
                            format!("query for step '{}': {}", step.name, e),
                            &result,
                        )
                        .into(),
                        result: Some(result),
                    }
                }
            };
            if !threshold.evaluate(actual) {
                return StepOutcome::Failed {
                    error: PipelineError::QueryFailure {
                        step: step.name.clone(),
                        predicate: threshold.describe(),
                        actual,
                    },
                    result: Some(result),
                };
            }
        }

        if let Some(path) = &spec.export {
            if let Err(e) = export(&rows, path).await {
                return StepOutcome::Failed {
                    error: e,
                    result: Some(result),
                };
            }
            info!("Step '{}' exported {} rows to {}", step.name, rows.len(), path.display());
        }

        StepOutcome::Succeeded(result)
    }

    async fn execute_gate(&self, step: &Step, checks: &[QualityCheck], env: &EnvironmentSnapshot) -> StepOutcome {
        let Some(warehouse) = &self.warehouse else {
            return StepOutcome::failed(no_warehouse(step));
        };

        let started = Instant::now();
        match QualityGate::new(&step.name, warehouse.as_ref()).check(checks, env).await {
            Ok(report) => StepOutcome::Succeeded(ExecutionResult::query(report.summary(), started.elapsed())),
            Err(e) => StepOutcome::failed(e),
        }
    }

    async fn execute_clean(&self, step: &Step, spec: &CsvCleanSpec) -> StepOutcome {
        let started = Instant::now();
        let dir = spec.dir.clone();
        let cleaned = match tokio::task::spawn_blocking(move || csv_clean::clean_directory(&dir)).await {
            Ok(Ok(cleaned)) => cleaned,
            Ok(Err(e)) => {
                return StepOutcome::failed(ExecutionFailure::new(format!(
                    "step '{}' could not clean CSV files: {}",
                    step.name, e
                )))
            }
            Err(e) => {
                return StepOutcome::failed(ExecutionFailure::new(format!(
                    "step '{}' CSV cleaning task did not finish: {}",
                    step.name, e
                )))
            }
        };

        if cleaned.is_empty() {
            warn!("Step '{}' found no CSV files in {}", step.name, spec.dir.display());
        }
        for file in cleaned.iter().filter(|f| !f.has_header) {
            warn!("Step '{}': {} has no header row", step.name, file.input.display());
        }

        let summary = cleaned
            .iter()
            .map(|f| format!("{} -> {} ({} rows)", f.input.display(), f.output.display(), f.rows))
            .collect::<Vec<_>>()
            .join("\n");
        StepOutcome::Succeeded(ExecutionResult::query(summary, started.elapsed()))
    }
}

fn no_warehouse(step: &Step) -> PipelineError {
    PipelineError::configuration(format!(
        "step '{}' needs a warehouse but none is configured",
        step.name
    ))
}

/// Substitute placeholders in the program and its arguments
fn render_command(spec: &CommandSpec, env: &EnvironmentSnapshot) -> Result<CommandSpec, PipelineError> {
    Ok(CommandSpec {
        program: env.render(&spec.program)?,
        args: spec
            .args
            .iter()
            .map(|arg| env.render(arg))
            .collect::<Result<_, _>>()?,
        working_dir: spec.working_dir.clone(),
    })
}

/// Write the result set to `path`
///
/// A `.csv` extension selects CSV with a header row; anything else gets
/// pretty-printed JSON records.
async fn export(rows: &ResultSet, path: &Path) -> Result<(), PipelineError> {
    let failure = |e: String| {
        PipelineError::from(ExecutionFailure::new(format!(
            "cannot export results to {}: {}",
            path.display(),
            e
        )))
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| failure(e.to_string()))?;
    }
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let content = if is_csv {
        rows.to_csv().map_err(|e| failure(e.to_string()))?
    } else {
        serde_json::to_string_pretty(&rows.to_records()).map_err(|e| failure(e.to_string()))?
    };
    tokio::fs::write(path, content).await.map_err(|e| failure(e.to_string()))?;
    Ok(())
}
