//! Step runners: external programs, CSV cleaning and the warehouse client

pub mod command;
pub mod csv_clean;
pub mod warehouse;

use crate::core::environment::EnvironmentSnapshot;
use crate::core::state::ExecutionResult;
use crate::core::step::CommandSpec;
use crate::error::PipelineError;
use async_trait::async_trait;

pub use command::ProcessRunner;
pub use csv_clean::{CleanedFile, CsvCleanError};
pub use warehouse::{ResultSet, Warehouse, WarehouseError};
#[cfg(feature = "sqlite")]
pub use warehouse::SqliteWarehouse;

/// Trait for launching external commands - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a fully rendered command with exactly the variables in `env`
    ///
    /// A non-zero exit is not an error here: it is reported through the
    /// returned result. Errors mean the command could not be run at all.
    async fn run(&self, spec: &CommandSpec, env: &EnvironmentSnapshot) -> Result<ExecutionResult, PipelineError>;
}
