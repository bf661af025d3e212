//! Quality gate - fail-fast sequential validation queries

use crate::core::environment::EnvironmentSnapshot;
use crate::core::step::QualityCheck;
use crate::error::{ExecutionFailure, PipelineError};
use crate::runner::Warehouse;
use tracing::{debug, info, warn};

/// Counts observed by the checks that passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    pub gate: String,
    pub checks: Vec<(String, i64)>,
}

impl GateReport {
    /// One `name: count` line per passed check
    pub fn summary(&self) -> String {
        self.checks
            .iter()
            .map(|(name, count)| format!("{}: {}", name, count))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Runs validation queries in order against one warehouse
pub struct QualityGate<'a> {
    name: String,
    warehouse: &'a dyn Warehouse,
}

impl<'a> QualityGate<'a> {
    pub fn new(name: impl Into<String>, warehouse: &'a dyn Warehouse) -> Self {
        Self {
            name: name.into(),
            warehouse,
        }
    }

    /// Evaluate checks in order, stopping at the first violation
    ///
    /// Checks after a failing one are never queried.
    pub async fn check(&self, checks: &[QualityCheck], env: &EnvironmentSnapshot) -> Result<GateReport, PipelineError> {
        let mut report = GateReport {
            gate: self.name.clone(),
            checks: Vec::with_capacity(checks.len()),
        };

        for check in checks {
            let sql = env.render(&check.sql)?;
            debug!("Quality gate '{}' running check '{}'", self.name, check.name);

            let result = self.warehouse.query(&sql).await.map_err(|e| {
                ExecutionFailure::new(format!(
                    "quality gate '{}' check '{}': {}",
                    self.name, check.name, e
                ))
            })?;
            let count = result.scalar_count().map_err(|e| {
                ExecutionFailure::new(format!(
                    "quality gate '{}' check '{}': {}",
                    self.name, check.name, e
                ))
            })?;

            if !check.threshold.evaluate(count) {
                warn!(
                    "Quality gate '{}' failed at '{}': {} (expected {})",
                    self.name,
                    check.name,
                    count,
                    check.threshold.describe()
                );
                return Err(PipelineError::QualityGate {
                    gate: self.name.clone(),
                    check: check.name.clone(),
                    predicate: check.threshold.describe(),
                    count,
                });
            }

            info!("Quality check '{}' passed ({})", check.name, count);
            report.checks.push((check.name.clone(), count));
        }

        Ok(report)
    }
}
