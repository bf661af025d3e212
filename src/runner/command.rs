//! Subprocess runner

use crate::core::environment::EnvironmentSnapshot;
use crate::core::state::ExecutionResult;
use crate::core::step::CommandSpec;
use crate::error::{ExecutionFailure, PipelineError};
use crate::runner::CommandRunner;
use async_trait::async_trait;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as child processes and captures their output
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    /// Launch the program and wait for it to exit
    ///
    /// The child sees only the snapshot's variables. Output is decoded
    /// lossily so a stray invalid byte never hides the rest of a tool's
    /// diagnostics.
    async fn run(&self, spec: &CommandSpec, env: &EnvironmentSnapshot) -> Result<ExecutionResult, PipelineError> {
        debug!("Spawning '{}' with {} environment variables", spec.display(), env.len());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(env.iter())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let output = command.output().await.map_err(|e| {
            ExecutionFailure::new(format!("failed to launch '{}': {}", spec.display(), e))
        })?;
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        for line in stdout.lines() {
            debug!("[{}] {}", spec.program, line);
        }
        for line in stderr.lines() {
            warn!("[{}] {}", spec.program, line);
        }

        let result = ExecutionResult::finished(output.status.code(), stdout, stderr, duration);
        debug!(
            "'{}' exited with {:?} after {:?}",
            spec.display(),
            result.exit_code,
            result.duration
        );

        Ok(result)
    }
}
