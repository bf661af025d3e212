//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod quality;
pub mod scheduler;
pub mod trigger;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{StepExecutor, StepOutcome};
pub use quality::{GateReport, QualityGate};
pub use scheduler::{ExecutionScheduler, FailurePolicy};
pub use trigger::TriggerLoop;
