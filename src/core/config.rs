//! Project configuration from YAML

use crate::core::environment::Overrides;
use crate::core::graph::Selection;
use crate::core::pipeline::Project;
use crate::core::step::StderrPolicy;
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level project configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    pub name: String,

    /// Project-wide environment overrides; empty values mean "not overridden"
    #[serde(default)]
    pub environment: Overrides,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Warehouse used by query and quality gate steps
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,

    /// Declared steps, in declaration order
    pub steps: Vec<StepConfig>,

    /// Named step selections
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,

    /// Time-based triggers for pipelines
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,

    /// Directory relative paths are resolved against (the project file's)
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Defaults applied to steps that don't set their own
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub stderr_policy: StderrPolicy,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Connection URL, e.g. `sqlite://warehouse.db`
    ///
    /// May contain `{{ VAR }}` placeholders resolved from the project environment.
    pub url: String,
}

/// Step configuration as defined in YAML
///
/// Exactly one of `command`, `query`, `quality_gate` or `clean_csv` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Names of steps this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Step-level environment overrides
    #[serde(default)]
    pub env: Overrides,

    /// Overrides `defaults.stderr_policy`
    #[serde(default)]
    pub stderr_policy: Option<StderrPolicy>,

    /// Skip the step, without failing the run, unless all of these are set
    #[serde(default)]
    pub skip_unless_env: Vec<String>,

    #[serde(default)]
    pub command: Option<CommandConfig>,

    #[serde(default)]
    pub query: Option<QueryConfig>,

    #[serde(default)]
    pub quality_gate: Option<Vec<QualityCheckConfig>>,

    #[serde(default)]
    pub clean_csv: Option<CleanCsvConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Overrides `defaults.working_dir`
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub sql: String,

    #[serde(flatten)]
    pub threshold: ThresholdConfig,

    /// Write the result set to this file (`.csv` or JSON)
    #[serde(default)]
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityCheckConfig {
    pub name: String,
    pub sql: String,

    #[serde(flatten)]
    pub threshold: ThresholdConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanCsvConfig {
    /// Directory holding the raw extracts
    pub dir: PathBuf,
}

/// Bound on a query's count; at most one field may be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<i64>,
}

/// A named selection of steps that runs together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,

    /// Step names, or `"*"` for every declared step
    #[serde(default)]
    pub selection: Selection,

    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,

    /// Five-field cron expression, evaluated in UTC
    pub cron: String,

    /// Name of the pipeline to run
    pub pipeline: String,
}

impl ProjectConfig {
    /// Load project configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse project configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        let config = Self::parse(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(yaml: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| PipelineError::configuration(format!("invalid project file: {}", e)))
    }

    /// Validate the project configuration
    ///
    /// Builds the project in full: step definitions, the dependency graph
    /// (unknown dependencies and cycles), pipeline selections and schedules.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.to_project().map(|_| ())
    }

    /// Convert config to a Project domain model
    pub fn to_project(&self) -> Result<Project, PipelineError> {
        Project::from_config(self)
    }
}
