//! Promotions: requests to move one Freight into one Stage.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use super::freight::{FreightCollection, FreightReference};
use super::health::HealthCheckStep;
use super::meta::{ObjectMeta, Timestamp};

/// Length of the Freight prefix used in generated names.
const NAME_SUFFIX_LEN: usize = 7;

/// Lifecycle phase of a Promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PromotionPhase {
    /// Waiting to be claimed by the executor.
    #[default]
    Pending,
    /// Being executed.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed unsuccessfully.
    Failed,
    /// Could not be executed.
    Errored,
    /// Cancelled.
    Aborted,
}

impl PromotionPhase {
    /// Returns true once the phase can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    fn priority(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Pending => 1,
            _ => 2,
        }
    }
}

impl fmt::Display for PromotionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Errored => write!(f, "Errored"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// One step of a promotion template. Executed elsewhere.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromotionStep {
    /// Step kind.
    pub uses: String,
    /// Optional alias for the step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Step configuration.
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Desired state of a Promotion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionSpec {
    /// Target Stage.
    pub stage: String,
    /// Freight to promote.
    pub freight: String,
    /// Steps copied from the Stage's promotion template.
    #[serde(default)]
    pub steps: Vec<PromotionStep>,
}

/// Observed state of a Promotion, written by the executor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionStatus {
    /// Current phase.
    pub phase: PromotionPhase,
    /// Details about the phase.
    #[serde(default)]
    pub message: String,
    /// Freight deployed by a successful Promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight_collection: Option<FreightCollection>,
    /// Health checks to run after a successful Promotion.
    #[serde(default)]
    pub health_checks: Vec<HealthCheckStep>,
    /// When the Promotion reached a terminal phase.
    #[serde(default)]
    pub finished_at: Option<Timestamp>,
}

/// A Promotion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promotion {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: PromotionSpec,
    /// Observed state.
    #[serde(default)]
    pub status: PromotionStatus,
}

impl Promotion {
    /// Creates a pending Promotion with a generated, time-sortable name.
    #[must_use]
    pub fn new(namespace: impl Into<String>, stage: &str, freight: &str) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, generate_promotion_name(stage, freight)),
            spec: PromotionSpec {
                stage: stage.to_string(),
                freight: freight.to_string(),
                steps: Vec::new(),
            },
            status: PromotionStatus::default(),
        }
    }

    /// Sets the steps.
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<PromotionStep>) -> Self {
        self.spec.steps = steps;
        self
    }

    /// Returns the Promotion name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> PromotionPhase {
        self.status.phase
    }

    /// Returns true once the Promotion has finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.phase.is_terminal()
    }

    /// Builds the reference stored in Stage status.
    #[must_use]
    pub fn to_reference(&self, freight: Option<FreightReference>) -> PromotionReference {
        PromotionReference {
            name: self.metadata.name.clone(),
            freight,
            status: Some(self.status.clone()),
        }
    }
}

/// Orders Promotions by priority: Running, then Pending, then terminal.
///
/// Non-terminal Promotions of equal priority sort oldest first so that the
/// one claimed earliest stays current; terminal ones sort newest first.
/// Names are time-sortable, so lexical order is creation order.
#[must_use]
pub fn compare_promotions(a: &Promotion, b: &Promotion) -> Ordering {
    let (pa, pb) = (a.phase().priority(), b.phase().priority());
    if pa != pb {
        return pa.cmp(&pb);
    }
    if a.is_terminal() {
        b.name().cmp(a.name())
    } else {
        a.name().cmp(b.name())
    }
}

/// Generates `<stage>.<uuid v7>.<freight prefix>`.
#[must_use]
pub fn generate_promotion_name(stage: &str, freight: &str) -> String {
    generate_child_name(stage, freight)
}

/// Generates a lexically time-sortable child name for a Stage.
#[must_use]
pub(crate) fn generate_child_name(stage: &str, suffix_source: &str) -> String {
    let suffix: String = suffix_source.chars().take(NAME_SUFFIX_LEN).collect();
    format!("{stage}.{}.{suffix}", Uuid::now_v7().simple())
}

/// Snapshot of a Promotion stored in Stage status.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromotionReference {
    /// Promotion name.
    pub name: String,
    /// Freight being promoted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight: Option<FreightReference>,
    /// Promotion status at the time the reference was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PromotionStatus>,
}

impl PromotionReference {
    /// Returns the recorded phase, if any.
    #[must_use]
    pub fn phase(&self) -> Option<PromotionPhase> {
        self.status.as_ref().map(|s| s.phase)
    }

    /// Returns true if the referenced Promotion finished.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.phase().is_some_and(|p| p.is_terminal())
    }

    /// Returns true if the referenced Promotion succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.phase() == Some(PromotionPhase::Succeeded)
    }

    /// Returns the health checks scheduled by the Promotion.
    #[must_use]
    pub fn health_checks(&self) -> &[HealthCheckStep] {
        self.status.as_ref().map_or(&[], |s| s.health_checks.as_slice())
    }
}
