//! CLI command definitions

use crate::core::{Overrides, Selection};
use crate::execution::FailurePolicy;
use clap::Args;
use std::path::PathBuf;

/// Which steps to run: a named pipeline, an explicit selection, or all
#[derive(Debug, Args, Clone, Default)]
pub struct TargetArgs {
    /// Named pipeline from the project file
    #[arg(short, long, conflicts_with = "select")]
    pub pipeline: Option<String>,

    /// Comma-separated step names; `*` selects every step
    #[arg(short, long, value_delimiter = ',')]
    pub select: Vec<String>,
}

impl TargetArgs {
    /// Explicit selection, if `--select` was given
    pub fn selection(&self) -> Option<Selection> {
        if self.select.is_empty() {
            None
        } else {
            Some(Selection::parse(self.select.iter().cloned()))
        }
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to project YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,

    /// Skip every remaining step after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Environment overrides (KEY=VALUE); an empty value leaves KEY untouched
    #[arg(long = "set", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Load variables from a dotenv file (never overrides the process environment)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn policy(&self) -> FailurePolicy {
        if self.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        }
    }

    pub fn overrides(&self) -> Overrides {
        pairs_to_overrides(&self.set)
    }
}

fn pairs_to_overrides(pairs: &[(String, String)]) -> Overrides {
    pairs
        .iter()
        .map(|(k, v)| (k.clone(), Some(v.clone())))
        .collect()
}

/// Validate a project configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to project YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the execution order
#[derive(Debug, Args, Clone)]
pub struct OrderCommand {
    /// Path to project YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    #[command(flatten)]
    pub target: TargetArgs,
}

/// Inspect or serve schedules
#[derive(Debug, Args, Clone)]
pub struct ScheduleCommand {
    /// Path to project YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Number of upcoming fire times to show per schedule
    #[arg(short, long, default_value_t = 5)]
    pub upcoming: usize,

    /// Run pipelines as their schedules fire, until interrupted
    #[arg(long)]
    pub serve: bool,

    /// Skip every remaining step after the first failure (with --serve)
    #[arg(long)]
    pub fail_fast: bool,

    /// Environment overrides for every served run (KEY=VALUE)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub set: Vec<(String, String)>,

    /// Load variables from a dotenv file (with --serve)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Don't save runs to history (with --serve)
    #[arg(long)]
    pub no_history: bool,
}

impl ScheduleCommand {
    pub fn policy(&self) -> FailurePolicy {
        if self.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        }
    }

    pub fn overrides(&self) -> Overrides {
        pairs_to_overrides(&self.set)
    }
}

/// List pipelines with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show per-step outcomes
    #[arg(long)]
    pub steps: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run by ID
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("Invalid KEY=VALUE pair: {}", s)),
    }
}
