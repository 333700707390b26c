//! Verification records attached to a FreightCollection.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::Timestamp;

/// Maximum number of verification attempts kept per FreightCollection.
pub const MAX_VERIFICATION_HISTORY: usize = 10;

/// Phase of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VerificationPhase {
    /// Submitted, not started yet.
    #[default]
    Pending,
    /// Measurements are being taken.
    Running,
    /// Verification passed.
    Successful,
    /// Verification failed.
    Failed,
    /// Verification could not be carried out.
    Error,
    /// Verification was aborted.
    Aborted,
    /// Measurements were inconclusive.
    Inconclusive,
}

impl VerificationPhase {
    /// Returns true once the phase can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for VerificationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Successful => write!(f, "Successful"),
            Self::Failed => write!(f, "Failed"),
            Self::Error => write!(f, "Error"),
            Self::Aborted => write!(f, "Aborted"),
            Self::Inconclusive => write!(f, "Inconclusive"),
        }
    }
}

/// Pointer to the analysis run backing a verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRunReference {
    /// Name of the run.
    pub name: String,
    /// Namespace of the run.
    pub namespace: String,
    /// Last observed phase of the run.
    #[serde(default)]
    pub phase: String,
}

/// One verification attempt.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationInfo {
    /// Attempt id. Stable for the lifetime of the attempt.
    pub id: String,
    /// Who requested the attempt, if anyone in particular.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// When the attempt started.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    /// When the attempt reached a terminal phase.
    #[serde(default)]
    pub finish_time: Option<Timestamp>,
    /// Current phase.
    pub phase: VerificationPhase,
    /// Backing analysis run, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_run: Option<AnalysisRunReference>,
    /// Details about the phase.
    #[serde(default)]
    pub message: String,
}

impl VerificationInfo {
    /// Returns true if the attempt has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Newest-first verification attempts for one FreightCollection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationHistory(Vec<VerificationInfo>);

impl VerificationHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the most recent attempt.
    #[must_use]
    pub fn current(&self) -> Option<&VerificationInfo> {
        self.0.first()
    }

    /// Updates the most recent attempt if the ids match, otherwise pushes a
    /// new attempt and evicts the oldest beyond the bound.
    pub fn update_or_push(&mut self, info: VerificationInfo) {
        if let Some(first) = self.0.first_mut() {
            if first.id == info.id {
                *first = info;
                return;
            }
        }
        self.0.insert(0, info);
        self.0.truncate(MAX_VERIFICATION_HISTORY);
    }

    /// Returns true if any attempt succeeded.
    #[must_use]
    pub fn any_successful(&self) -> bool {
        self.0.iter().any(|v| v.phase == VerificationPhase::Successful)
    }

    /// Iterates attempts newest first.
    pub fn iter(&self) -> impl Iterator<Item = &VerificationInfo> {
        self.0.iter()
    }

    /// Returns the number of attempts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no attempts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
