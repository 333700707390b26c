//! Analysis templates and runs submitted to the external analysis engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::{ObjectMeta, Timestamp};
use super::stage::AnalysisRunArgument;
use super::verification::VerificationPhase;

/// A measurement performed by the analysis engine. Opaque here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    /// Metric name.
    pub name: String,
    /// Provider configuration.
    #[serde(default)]
    pub provider: serde_json::Value,
    /// Success condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<String>,
}

impl Metric {
    /// Creates a metric with an empty provider.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Reusable analysis definition.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisTemplateSpec {
    /// Metrics to measure.
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Default arguments.
    #[serde(default)]
    pub args: Vec<AnalysisRunArgument>,
}

/// An analysis template record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTemplate {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Definition.
    pub spec: AnalysisTemplateSpec,
}

impl AnalysisTemplate {
    /// Creates a template.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: AnalysisTemplateSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec,
        }
    }
}

/// Phase of an analysis run as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AnalysisRunPhase {
    /// Accepted, not started.
    #[default]
    Pending,
    /// Measuring.
    Running,
    /// Passed.
    Successful,
    /// Failed.
    Failed,
    /// Errored.
    Error,
    /// Inconclusive.
    Inconclusive,
}

impl AnalysisRunPhase {
    /// Returns true once the run has finished.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl From<AnalysisRunPhase> for VerificationPhase {
    fn from(phase: AnalysisRunPhase) -> Self {
        match phase {
            AnalysisRunPhase::Pending => Self::Pending,
            AnalysisRunPhase::Running => Self::Running,
            AnalysisRunPhase::Successful => Self::Successful,
            AnalysisRunPhase::Failed => Self::Failed,
            AnalysisRunPhase::Error => Self::Error,
            AnalysisRunPhase::Inconclusive => Self::Inconclusive,
        }
    }
}

impl fmt::Display for AnalysisRunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", VerificationPhase::from(*self))
    }
}

/// Run request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisRunSpec {
    /// Metrics to measure.
    #[serde(default)]
    pub metrics: Vec<Metric>,
    /// Resolved arguments.
    #[serde(default)]
    pub args: Vec<AnalysisRunArgument>,
    /// Set to request termination.
    #[serde(default)]
    pub terminate: bool,
}

/// Run status reported by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRunStatus {
    /// Current phase.
    pub phase: AnalysisRunPhase,
    /// Details about the phase.
    #[serde(default)]
    pub message: String,
    /// When measuring started.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the run completed.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

/// An analysis run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Run request.
    pub spec: AnalysisRunSpec,
    /// Engine-reported status.
    #[serde(default)]
    pub status: AnalysisRunStatus,
}

impl AnalysisRun {
    /// Returns the run name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the reported phase.
    #[must_use]
    pub fn phase(&self) -> AnalysisRunPhase {
        self.status.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_translation() {
        assert_eq!(VerificationPhase::from(AnalysisRunPhase::Running), VerificationPhase::Running);
        assert_eq!(
            VerificationPhase::from(AnalysisRunPhase::Inconclusive),
            VerificationPhase::Inconclusive
        );
        assert_eq!(AnalysisRunPhase::Successful.to_string(), "Successful");
    }

    #[test]
    fn test_completion() {
        assert!(!AnalysisRunPhase::Pending.is_completed());
        assert!(AnalysisRunPhase::Error.is_completed());
    }
}
