//! Environment resolution for external tool invocations
//!
//! The ambient process environment is captured once when a resolver is
//! built. Every step invocation then gets its own immutable
//! [`EnvironmentSnapshot`], so nothing reads or mutates the process
//! environment while a pipeline is running.

use crate::error::PipelineError;
use indexmap::IndexMap;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Path to the warehouse service-account credentials
pub const CREDENTIALS_PATH: &str = "CREDENTIALS_PATH";
/// Warehouse project identifier
pub const PROJECT_ID: &str = "PROJECT_ID";
pub const RAW_DATASET_NAME: &str = "RAW_DATASET_NAME";
pub const STAGING_DATASET_NAME: &str = "STAGING_DATASET_NAME";
pub const MARTS_DATASET_NAME: &str = "MARTS_DATASET_NAME";
pub const SNAPSHOT_DATASET_NAME: &str = "SNAPSHOT_DATASET_NAME";

/// Variables the bundled steps pass through to the transformation tools
pub const WAREHOUSE_VARIABLES: [&str; 6] = [
    CREDENTIALS_PATH,
    PROJECT_ID,
    RAW_DATASET_NAME,
    STAGING_DATASET_NAME,
    MARTS_DATASET_NAME,
    SNAPSHOT_DATASET_NAME,
];

/// Named overrides; `None` or an empty string means "not overridden"
pub type Overrides = IndexMap<String, Option<String>>;

/// Merge override layers; a later layer wins only with a non-empty value
pub fn layer_overrides(layers: &[&Overrides]) -> Overrides {
    let mut merged = Overrides::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            let effective = value.as_deref().filter(|v| !v.is_empty());
            match (effective, merged.get(key)) {
                (Some(v), _) => {
                    merged.insert(key.clone(), Some(v.to_string()));
                }
                (None, None) => {
                    merged.insert(key.clone(), None);
                }
                (None, Some(_)) => {}
            }
        }
    }
    merged
}

/// Resolved, immutable variable mapping for one step invocation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvironmentSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Substitute `{{ NAME }}` placeholders with snapshot values
    ///
    /// A placeholder naming a variable that is absent or empty is an error,
    /// so a query never silently runs against `_marts.fact_sales`.
    pub fn render(&self, template: &str) -> Result<String, PipelineError> {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let pattern = PLACEHOLDER.get_or_init(|| {
            Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder pattern")
        });

        let mut missing = None;
        let rendered = pattern.replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            match self.get(name).filter(|v| !v.is_empty()) {
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| name.to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(name) => Err(PipelineError::configuration(format!(
                "variable '{}' is not set (referenced in \"{}\")",
                name, template
            ))),
            None => Ok(rendered.into_owned()),
        }
    }
}

impl FromIterator<(String, String)> for EnvironmentSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            vars: iter.into_iter().collect(),
        }
    }
}

/// Builds [`EnvironmentSnapshot`]s from a captured ambient environment
#[derive(Debug, Clone, Default)]
pub struct EnvironmentResolver {
    ambient: BTreeMap<String, String>,
}

impl EnvironmentResolver {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self::with_ambient(std::env::vars())
    }

    /// Use an explicit ambient environment
    pub fn with_ambient<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            ambient: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Add variables from a dotenv file to the ambient layer
    ///
    /// Variables already present in the ambient environment are kept.
    pub fn with_env_file(mut self, path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let entries = dotenvy::from_path_iter(path).map_err(|e| {
            PipelineError::configuration(format!("cannot read env file {}: {}", path.display(), e))
        })?;

        let mut loaded = 0;
        for entry in entries {
            let (key, value) = entry.map_err(|e| {
                PipelineError::configuration(format!("invalid env file {}: {}", path.display(), e))
            })?;
            if !self.ambient.contains_key(&key) {
                self.ambient.insert(key, value);
                loaded += 1;
            }
        }
        debug!("Loaded {} variables from {}", loaded, path.display());

        Ok(self)
    }

    pub fn ambient(&self) -> &BTreeMap<String, String> {
        &self.ambient
    }

    /// Merge overrides onto the ambient environment
    ///
    /// Only overrides with a non-empty value replace the ambient value.
    pub fn resolve(&self, overrides: &Overrides) -> EnvironmentSnapshot {
        let mut vars = self.ambient.clone();
        for (key, value) in overrides {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                vars.insert(key.clone(), value.to_string());
            }
        }
        EnvironmentSnapshot { vars }
    }
}
