//! Stages: named pipeline environments that receive and verify Freight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::conditions::Conditions;
use super::freight::{FreightCollection, FreightHistory, FreightOrigin};
use super::health::{Health, HealthState};
use super::meta::{ObjectKey, ObjectMeta};
use super::promotion::{PromotionReference, PromotionStep};

/// Where a Stage may take Freight of one origin from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightSources {
    /// Accept Freight straight from the origin.
    #[serde(default)]
    pub direct: bool,
    /// Accept Freight verified in these upstream Stages.
    #[serde(default)]
    pub stages: Vec<String>,
    /// Minimum time Freight must have been verified upstream, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_soak_time_secs: Option<u64>,
}

/// One requested origin and its sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreightRequest {
    /// The requested origin.
    pub origin: FreightOrigin,
    /// Where Freight may come from.
    #[serde(default)]
    pub sources: FreightSources,
}

impl FreightRequest {
    /// Requests Freight directly from a Warehouse.
    #[must_use]
    pub fn direct(warehouse: impl Into<String>) -> Self {
        Self {
            origin: FreightOrigin::warehouse(warehouse),
            sources: FreightSources {
                direct: true,
                ..Default::default()
            },
        }
    }

    /// Requests Freight of a Warehouse verified in upstream Stages.
    #[must_use]
    pub fn from_stages(warehouse: impl Into<String>, stages: &[&str]) -> Self {
        Self {
            origin: FreightOrigin::warehouse(warehouse),
            sources: FreightSources {
                direct: false,
                stages: stages.iter().map(|s| (*s).to_string()).collect(),
                required_soak_time_secs: None,
            },
        }
    }
}

/// Reference to an analysis template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTemplateReference {
    /// Template name, in the Stage's namespace.
    pub name: String,
}

/// Extra metadata applied to analysis runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisRunMetadata {
    /// Labels added to every run.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations added to every run.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// A named argument passed to an analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRunArgument {
    /// Argument name.
    pub name: String,
    /// Argument value.
    pub value: String,
}

impl AnalysisRunArgument {
    /// Creates an argument.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// How Freight in a Stage is verified.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSpec {
    /// Templates the analysis run is built from.
    #[serde(default)]
    pub analysis_templates: Vec<AnalysisTemplateReference>,
    /// Metadata applied to analysis runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_run_metadata: Option<AnalysisRunMetadata>,
    /// Arguments overriding template arguments.
    #[serde(default)]
    pub args: Vec<AnalysisRunArgument>,
}

/// Steps copied into every Promotion for the Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromotionTemplate {
    /// Template steps.
    #[serde(default)]
    pub steps: Vec<PromotionStep>,
}

/// Desired state of a Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Requested origins.
    #[serde(default)]
    pub requested_freight: Vec<FreightRequest>,
    /// How to promote into the Stage. Absent for control-flow Stages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_template: Option<PromotionTemplate>,
    /// How to verify Freight in the Stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationSpec>,
}

/// Legacy single-phase projection of Stage state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StagePhase {
    /// The Stage does not promote.
    #[default]
    NotApplicable,
    /// Nothing is in flight.
    Steady,
    /// A Promotion is in flight.
    Promoting,
    /// Verification is in flight.
    Verifying,
    /// The last Promotion or verification failed.
    Failed,
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotApplicable => write!(f, "NotApplicable"),
            Self::Steady => write!(f, "Steady"),
            Self::Promoting => write!(f, "Promoting"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// How a Stage is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Promotes, checks health and verifies.
    Regular,
    /// Only propagates verification marks downstream.
    ControlFlow,
}

/// Observed state of a Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    /// Summary conditions.
    #[serde(default)]
    pub conditions: Conditions,
    /// Last refresh token processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled_refresh: Option<String>,
    /// Freight deployed to the Stage, newest first.
    #[serde(default)]
    pub freight_history: FreightHistory,
    /// The in-flight Promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_promotion: Option<PromotionReference>,
    /// The most recently finished Promotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_promotion: Option<PromotionReference>,
    /// Current health.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
    /// Generation the status was computed for.
    #[serde(default)]
    pub observed_generation: i64,
    /// Legacy phase.
    #[serde(default)]
    pub phase: StagePhase,
    /// Human-readable Freight summary.
    #[serde(default)]
    pub freight_summary: String,
}

impl StageStatus {
    /// Returns the Freight currently deployed.
    #[must_use]
    pub fn current_freight(&self) -> Option<&FreightCollection> {
        self.freight_history.current()
    }

    /// Returns the recorded health state, if any.
    #[must_use]
    pub fn health_state(&self) -> Option<HealthState> {
        self.health.as_ref().map(|h| h.status)
    }
}

/// A Stage record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Object metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    #[serde(default)]
    pub spec: StageSpec,
    /// Observed state.
    #[serde(default)]
    pub status: StageStatus,
}

impl Stage {
    /// Creates a Stage with an empty spec.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: StageSpec::default(),
            status: StageStatus::default(),
        }
    }

    /// Returns the Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the Stage namespace, which is also its project.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    /// Returns the key of the Stage.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Classifies the Stage.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        if self.spec.promotion_template.is_some() {
            StageKind::Regular
        } else {
            StageKind::ControlFlow
        }
    }

    /// Returns the request for an origin.
    #[must_use]
    pub fn request_for(&self, origin: &FreightOrigin) -> Option<&FreightRequest> {
        self.spec.requested_freight.iter().find(|r| &r.origin == origin)
    }
}
