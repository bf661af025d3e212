//! elt-pipeline - dependency-ordered orchestration for ELT pipelines

pub mod cli;
pub mod core;
pub mod error;
pub mod execution;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use core::{
    config::ProjectConfig, DependencyGraph, EnvironmentResolver, EnvironmentSnapshot, ExecutionResult,
    ExecutionStatus, PipelineRun, Project, Selection, Step, StepKind, StepState,
};
pub use error::{ExecutionFailure, PipelineError};
pub use execution::{ExecutionEngine, ExecutionEvent, FailurePolicy, QualityGate};
pub use runner::{CommandRunner, ProcessRunner, ResultSet, Warehouse, WarehouseError};
