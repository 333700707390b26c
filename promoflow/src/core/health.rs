//! Stage health as reported by the health-check executor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate health of a Stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthState {
    /// Every check passed.
    Healthy,
    /// At least one check failed.
    Unhealthy,
    /// Checks are still converging.
    Progressing,
    /// Health could not be determined.
    #[default]
    Unknown,
    /// There is nothing to check.
    NotApplicable,
}

impl HealthState {
    /// Returns true if verification may proceed in this state.
    #[must_use]
    pub fn permits_verification(&self) -> bool {
        matches!(self, Self::Healthy | Self::NotApplicable)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Unhealthy => write!(f, "Unhealthy"),
            Self::Progressing => write!(f, "Progressing"),
            Self::Unknown => write!(f, "Unknown"),
            Self::NotApplicable => write!(f, "NotApplicable"),
        }
    }
}

/// Health of a Stage plus any issues the checks reported.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Health {
    /// Aggregate state.
    pub status: HealthState,
    /// Human-readable issues.
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Health {
    /// Creates a health record with no issues.
    #[must_use]
    pub fn new(status: HealthState) -> Self {
        Self {
            status,
            issues: Vec::new(),
        }
    }

    /// Adds an issue.
    #[must_use]
    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }
}

/// One health check scheduled by a Promotion.
///
/// The configuration is opaque here; `targets` identify the external
/// resources whose signals should re-trigger the Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthCheckStep {
    /// Kind of check, e.g. `argocd-update`.
    pub uses: String,
    /// External resources the check observes.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Check-specific configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl HealthCheckStep {
    /// Creates a check step.
    #[must_use]
    pub fn new(uses: impl Into<String>) -> Self {
        Self {
            uses: uses.into(),
            ..Default::default()
        }
    }

    /// Adds an observed target.
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }
}
