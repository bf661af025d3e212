//! Execution state models

use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every selected step succeeded
    Completed,
    /// At least one step failed
    Failed,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one external invocation: a subprocess or a warehouse query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code; `None` for queries and signal-terminated processes
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub success: bool,
}

impl ExecutionResult {
    /// Result of a finished subprocess; success means exit code zero
    pub fn finished(exit_code: Option<i32>, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            success: exit_code == Some(0),
            exit_code,
            stdout,
            stderr,
            duration,
        }
    }

    /// Result of an in-process step (query, gate or CSV cleaning) whose rendered output is `stdout`
    pub fn query(stdout: String, duration: Duration) -> Self {
        Self {
            exit_code: None,
            stdout,
            stderr: String::new(),
            duration,
            success: true,
        }
    }

    pub fn has_stderr(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Why a step never ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A step this one (transitively) depends on failed
    UpstreamFailed { step: String },
    /// The run stopped after a failure under the fail-fast policy
    FailFast { failed: String },
    /// Variables listed in the step's `skip_unless_env` are unset or empty
    MissingEnvironment { variables: Vec<String> },
    /// A step this one depends on was skipped
    UpstreamSkipped { step: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamFailed { step } => write!(f, "upstream step '{}' failed", step),
            SkipReason::FailFast { failed } => write!(f, "run stopped after '{}' failed (fail-fast)", failed),
            SkipReason::MissingEnvironment { variables } => {
                write!(f, "required variables not set: {}", variables.join(", "))
            }
            SkipReason::UpstreamSkipped { step } => write!(f, "upstream step '{}' was skipped", step),
        }
    }
}

/// State of a single step
///
/// `pending -> running -> {succeeded, failed}`, or `pending -> skipped`.
#[derive(Debug, Clone)]
pub enum StepState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        result: ExecutionResult,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: PipelineError,
        /// Captured output, when the invocation got far enough to produce any
        result: Option<ExecutionResult>,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    Skipped {
        reason: SkipReason,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StepState::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, StepState::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepState::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StepState::Skipped { .. })
    }

    /// Short lowercase label, as shown in output and stored in history
    pub fn label(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running { .. } => "running",
            StepState::Succeeded { .. } => "succeeded",
            StepState::Failed { .. } => "failed",
            StepState::Skipped { .. } => "skipped",
        }
    }

    /// The captured result, if the step produced one
    pub fn result(&self) -> Option<&ExecutionResult> {
        match self {
            StepState::Succeeded { result, .. } => Some(result),
            StepState::Failed { result, .. } => result.as_ref(),
            _ => None,
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    pub total_steps: usize,
    pub succeeded_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            succeeded_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Recount terminal steps from their states
    pub fn update_counts<'a>(&mut self, states: impl IntoIterator<Item = &'a StepState>) {
        let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
        for state in states {
            match state {
                StepState::Succeeded { .. } => succeeded += 1,
                StepState::Failed { .. } => failed += 1,
                StepState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }
        self.succeeded_steps = succeeded;
        self.failed_steps = failed;
        self.skipped_steps = skipped;
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            return 0.0;
        }
        (self.succeeded_steps + self.failed_steps + self.skipped_steps) as f64 / self.total_steps as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
