//! Step domain model

use crate::core::config::{DefaultsConfig, StepConfig, ThresholdConfig};
use crate::core::environment::{EnvironmentSnapshot, Overrides};
use crate::core::state::StepState;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step name
    pub name: String,

    /// Names of the steps this step depends on
    pub dependencies: Vec<String>,

    pub description: Option<String>,

    /// What the step runs
    pub kind: StepKind,

    /// Step-level environment overrides, layered over the project's
    pub env: Overrides,

    /// Whether output on stderr fails an otherwise successful command
    pub stderr_policy: StderrPolicy,

    /// Variables that must be set for the step to run; otherwise it is skipped
    pub skip_unless_env: Vec<String>,

    /// Runtime state (not serialized)
    pub state: StepState,
}

/// The unit of work behind a step
#[derive(Debug, Clone)]
pub enum StepKind {
    /// Launch an external program
    Command(CommandSpec),
    /// Run one query against the warehouse
    Query(QuerySpec),
    /// Run validation queries in order, stopping at the first violation
    QualityGate(Vec<QualityCheck>),
    /// Normalize raw CSV extracts before ingestion
    CleanCsv(CsvCleanSpec),
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Command(_) => "command",
            StepKind::Query(_) => "query",
            StepKind::QualityGate(_) => "quality_gate",
            StepKind::CleanCsv(_) => "clean_csv",
        }
    }

    /// Whether this kind needs a warehouse connection
    pub fn uses_warehouse(&self) -> bool {
        matches!(self, StepKind::Query(_) | StepKind::QualityGate(_))
    }
}

/// An external program invocation
///
/// `program` and `args` may contain `{{ VAR }}` placeholders, rendered from the
/// step's environment snapshot just before launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Must exist and be a directory; checked before the run starts
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Command line for logs and error summaries
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A warehouse query, optionally checked and exported
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub sql: String,
    /// Predicate applied to the first column of the first row
    pub threshold: Option<Threshold>,
    /// Write the result set to this path; CSV for a `.csv` extension, JSON records otherwise
    pub export: Option<PathBuf>,
}

/// Cleaning of every raw `*.csv` file in a directory
///
/// Each input is rewritten next to itself as `<stem>_cleaned.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvCleanSpec {
    pub dir: PathBuf,
}

/// One validation query of a quality gate
#[derive(Debug, Clone)]
pub struct QualityCheck {
    pub name: String,
    /// Must return a single count
    pub sql: String,
    pub threshold: Threshold,
}

impl QualityCheck {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, threshold: Threshold) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            threshold,
        }
    }
}

/// Predicate over a count returned by a query
#[derive(Clone)]
pub enum Threshold {
    /// Passes when the value is at most the bound
    Max(i64),
    /// Passes when the value is at least the bound
    Min(i64),
    Equals(i64),
    Custom {
        label: String,
        check: Arc<dyn Fn(i64) -> bool + Send + Sync>,
    },
}

impl Threshold {
    pub fn custom(label: impl Into<String>, check: impl Fn(i64) -> bool + Send + Sync + 'static) -> Self {
        Threshold::Custom {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    pub fn evaluate(&self, value: i64) -> bool {
        match self {
            Threshold::Max(max) => value <= *max,
            Threshold::Min(min) => value >= *min,
            Threshold::Equals(expected) => value == *expected,
            Threshold::Custom { check, .. } => check(value),
        }
    }

    /// Human-readable form of the passing condition
    pub fn describe(&self) -> String {
        match self {
            Threshold::Max(max) => format!("<= {}", max),
            Threshold::Min(min) => format!(">= {}", min),
            Threshold::Equals(expected) => format!("== {}", expected),
            Threshold::Custom { label, .. } => label.clone(),
        }
    }
}

impl fmt::Debug for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Threshold({})", self.describe())
    }
}

impl TryFrom<&ThresholdConfig> for Option<Threshold> {
    type Error = PipelineError;

    fn try_from(config: &ThresholdConfig) -> Result<Self, Self::Error> {
        match (config.max, config.min, config.equals) {
            (None, None, None) => Ok(None),
            (Some(max), None, None) => Ok(Some(Threshold::Max(max))),
            (None, Some(min), None) => Ok(Some(Threshold::Min(min))),
            (None, None, Some(equals)) => Ok(Some(Threshold::Equals(equals))),
            _ => Err(PipelineError::configuration(
                "only one of 'max', 'min' or 'equals' may be set",
            )),
        }
    }
}

/// How a command's stderr output affects its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrPolicy {
    /// Log stderr; only the exit code decides success
    #[default]
    Log,
    /// Any non-blank stderr fails the step
    Fail,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            description: None,
            kind,
            env: Overrides::new(),
            stderr_policy: StderrPolicy::default(),
            skip_unless_env: Vec::new(),
            state: StepState::Pending,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Variables from `skip_unless_env` that are unset or empty in `env`
    pub fn missing_required(&self, env: &EnvironmentSnapshot) -> Vec<String> {
        self.skip_unless_env
            .iter()
            .filter(|name| env.get(name).map_or(true, str::is_empty))
            .cloned()
            .collect()
    }

    /// Create a step from a step config
    ///
    /// Relative paths are resolved against `base_dir`, the directory holding
    /// the project file.
    pub fn from_config(
        config: &StepConfig,
        defaults: &DefaultsConfig,
        base_dir: &Path,
    ) -> Result<Self, PipelineError> {
        let in_step = |e: PipelineError| match e {
            PipelineError::Configuration { message } => {
                PipelineError::configuration(format!("step '{}': {}", config.name, message))
            }
            other => other,
        };

        let declared = [
            config.command.is_some(),
            config.query.is_some(),
            config.quality_gate.is_some(),
            config.clean_csv.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if declared > 1 {
            return Err(in_step(PipelineError::configuration(
                "only one of 'command', 'query', 'quality_gate' or 'clean_csv' may be set",
            )));
        }

        let kind = if let Some(command) = &config.command {
            let working_dir = command
                .working_dir
                .as_ref()
                .or(defaults.working_dir.as_ref())
                .map(|dir| base_dir.join(dir));
            StepKind::Command(CommandSpec {
                program: command.program.clone(),
                args: command.args.clone(),
                working_dir,
            })
        } else if let Some(query) = &config.query {
            StepKind::Query(QuerySpec {
                sql: query.sql.clone(),
                threshold: Option::<Threshold>::try_from(&query.threshold).map_err(in_step)?,
                export: query.export.as_ref().map(|path| base_dir.join(path)),
            })
        } else if let Some(checks) = &config.quality_gate {
            if checks.is_empty() {
                return Err(in_step(PipelineError::configuration(
                    "quality gate has no checks",
                )));
            }
            let checks = checks
                .iter()
                .map(|check| {
                    let threshold = Option::<Threshold>::try_from(&check.threshold)
                        .map_err(in_step)?
                        .ok_or_else(|| {
                            in_step(PipelineError::configuration(format!(
                                "check '{}' has no threshold",
                                check.name
                            )))
                        })?;
                    Ok(QualityCheck::new(&check.name, &check.sql, threshold))
                })
                .collect::<Result<Vec<_>, PipelineError>>()?;
            StepKind::QualityGate(checks)
        } else if let Some(clean) = &config.clean_csv {
            StepKind::CleanCsv(CsvCleanSpec {
                dir: base_dir.join(&clean.dir),
            })
        } else {
            return Err(in_step(PipelineError::configuration(
                "one of 'command', 'query', 'quality_gate' or 'clean_csv' is required",
            )));
        };

        Ok(Step {
            name: config.name.clone(),
            dependencies: config.depends_on.clone(),
            description: config.description.clone(),
            kind,
            env: config.env.clone(),
            stderr_policy: config.stderr_policy.unwrap_or(defaults.stderr_policy),
            skip_unless_env: config.skip_unless_env.clone(),
            state: StepState::Pending,
        })
    }
}
