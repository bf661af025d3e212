//! Error taxonomy for building and running pipelines

use crate::core::state::ExecutionResult;
use thiserror::Error;

/// Errors raised while constructing a project or executing one of its steps
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A required external resource is missing or the project file is malformed.
    /// Always surfaced before any step runs.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A subprocess exited non-zero, could not be spawned, or a query errored
    #[error(transparent)]
    Execution(#[from] ExecutionFailure),

    /// A query-backed step returned a value its predicate rejects
    #[error("step '{step}' query check failed: expected {predicate}, got {actual}")]
    QueryFailure {
        step: String,
        predicate: String,
        actual: i64,
    },

    /// A quality gate stopped at its first violated check
    #[error("quality gate '{gate}' failed at check '{check}': expected {predicate}, got {count}")]
    QualityGate {
        gate: String,
        check: String,
        predicate: String,
        count: i64,
    },

    #[error("cycle detected in dependency graph: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration {
            message: message.into(),
        }
    }

    /// Whether this error was raised while validating the dependency graph
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Cycle { .. }
                | PipelineError::UnknownDependency { .. }
                | PipelineError::UnknownStep(_)
                | PipelineError::DuplicateStep(_)
        )
    }
}

/// Diagnostic payload of a failed external invocation
///
/// Carries the full captured streams so the caller can show exactly what the
/// external tool printed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{summary}\n\nSTDOUT:\n{stdout}\n\nSTDERR:\n{stderr}")]
pub struct ExecutionFailure {
    pub summary: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionFailure {
    /// Failure with no captured output (spawn errors, driver errors)
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Failure built from a finished invocation
    pub fn from_result(summary: impl Into<String>, result: &ExecutionResult) -> Self {
        Self {
            summary: summary.into(),
            exit_code: result.exit_code,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
        }
    }
}
