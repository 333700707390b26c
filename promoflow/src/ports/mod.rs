//! Ports - injected collaborators of the reconciler.
//!
//! Every external dependency is a trait object handed to the reconciler at
//! construction time: the resource store, the analysis engine, the health
//! check executor and the clock. In-memory implementations live in
//! [`memory`] and [`clock`].

pub mod clock;
pub mod memory;

use async_trait::async_trait;

use crate::core::{
    AnalysisRun, AnalysisTemplate, Freight, FreightOrigin, Health, HealthCheckStep, LabelSelector,
    ObjectKey, ProjectConfig, Promotion, Stage, StageStatus, Timestamp,
};
use crate::errors::StoreError;

pub use clock::{ManualClock, SystemClock};
pub use memory::{InMemoryAnalysisClient, InMemoryStore, StoreOp};

/// Indexed Freight lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreightQuery {
    /// All Freight from an origin.
    ByOrigin(FreightOrigin),
    /// Freight verified in a Stage, optionally restricted to one origin.
    VerifiedIn {
        /// Origin filter.
        origin: Option<FreightOrigin>,
        /// Stage name.
        stage: String,
    },
    /// Freight approved for a Stage, optionally restricted to one origin.
    ApprovedFor {
        /// Origin filter.
        origin: Option<FreightOrigin>,
        /// Stage name.
        stage: String,
    },
}

impl FreightQuery {
    /// Returns true if the Freight satisfies the query.
    #[must_use]
    pub fn matches(&self, freight: &Freight) -> bool {
        let origin_matches =
            |origin: &Option<FreightOrigin>| origin.as_ref().map_or(true, |o| o == &freight.origin);
        match self {
            Self::ByOrigin(origin) => &freight.origin == origin,
            Self::VerifiedIn { origin, stage } => origin_matches(origin) && freight.is_verified_in(stage),
            Self::ApprovedFor { origin, stage } => origin_matches(origin) && freight.is_approved_for(stage),
        }
    }
}

/// Indexed Promotion lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionQuery {
    /// Promotions targeting a Stage.
    ByStage(String),
    /// Promotions of one Freight into one Stage.
    ByStageAndFreight {
        /// Stage name.
        stage: String,
        /// Freight name.
        freight: String,
    },
}

impl PromotionQuery {
    /// Returns true if the Promotion satisfies the query.
    #[must_use]
    pub fn matches(&self, promotion: &Promotion) -> bool {
        match self {
            Self::ByStage(stage) => &promotion.spec.stage == stage,
            Self::ByStageAndFreight { stage, freight } => {
                &promotion.spec.stage == stage && &promotion.spec.freight == freight
            }
        }
    }
}

/// Namespaced, watch-capable resource store.
///
/// Writes of existing objects carry the resource version they were read at
/// and fail with [`StoreError::Conflict`] when it is stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Gets a Stage.
    async fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>, StoreError>;

    /// Lists Stages, optionally in one namespace.
    async fn list_stages(&self, namespace: Option<&str>) -> Result<Vec<Stage>, StoreError>;

    /// Writes Stage metadata (finalizers, annotations). Spec and status are
    /// left untouched.
    async fn update_stage(&self, stage: &Stage) -> Result<Stage, StoreError>;

    /// Replaces the status sub-resource of a Stage.
    async fn patch_stage_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: &StageStatus,
    ) -> Result<Stage, StoreError>;

    /// Gets a Freight.
    async fn get_freight(&self, namespace: &str, name: &str) -> Result<Option<Freight>, StoreError>;

    /// Lists Freight in a namespace.
    async fn list_freight(&self, namespace: &str, query: &FreightQuery) -> Result<Vec<Freight>, StoreError>;

    /// Replaces the status of a Freight.
    async fn patch_freight_status(&self, freight: &Freight) -> Result<Freight, StoreError>;

    /// Lists Promotions in a namespace.
    async fn list_promotions(
        &self,
        namespace: &str,
        query: &PromotionQuery,
    ) -> Result<Vec<Promotion>, StoreError>;

    /// Creates a Promotion.
    async fn create_promotion(&self, promotion: &Promotion) -> Result<Promotion, StoreError>;

    /// Gets the project configuration of a namespace.
    async fn get_project_config(&self, namespace: &str) -> Result<Option<ProjectConfig>, StoreError>;

    /// Gets an analysis template.
    async fn get_analysis_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AnalysisTemplate>, StoreError>;
}

/// Client of the external analysis engine.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Submits a run.
    async fn create_run(&self, run: &AnalysisRun) -> Result<AnalysisRun, StoreError>;

    /// Gets a run.
    async fn get_run(&self, namespace: &str, name: &str) -> Result<Option<AnalysisRun>, StoreError>;

    /// Lists runs matching a label selector.
    async fn list_runs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<AnalysisRun>, StoreError>;

    /// Requests termination of a run.
    async fn terminate_run(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Deletes every run matching a label selector. Returns how many were
    /// deleted.
    async fn delete_runs(&self, namespace: &str, selector: &LabelSelector) -> Result<usize, StoreError>;
}

/// Executes the health checks scheduled by a Promotion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Runs the checks in one batch and reports aggregate health.
    async fn check(&self, stage: &Stage, steps: &[HealthCheckStep]) -> Health;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ObjectMeta, VerifiedStage};

    fn freight(origin: &str) -> Freight {
        Freight {
            metadata: ObjectMeta::new("ns", "f"),
            alias: None,
            origin: FreightOrigin::warehouse(origin),
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
            status: Default::default(),
        }
    }

    #[test]
    fn test_freight_query_matching() {
        let mut f = freight("w");
        f.status.verified_in.insert("up".into(), VerifiedStage::default());

        assert!(FreightQuery::ByOrigin(FreightOrigin::warehouse("w")).matches(&f));
        assert!(!FreightQuery::ByOrigin(FreightOrigin::warehouse("x")).matches(&f));
        assert!(FreightQuery::VerifiedIn { origin: None, stage: "up".into() }.matches(&f));
        assert!(!FreightQuery::VerifiedIn {
            origin: Some(FreightOrigin::warehouse("x")),
            stage: "up".into()
        }
        .matches(&f));
        assert!(!FreightQuery::ApprovedFor { origin: None, stage: "up".into() }.matches(&f));
    }

    #[test]
    fn test_promotion_query_matching() {
        let p = Promotion::new("ns", "test", "abc");
        assert!(PromotionQuery::ByStage("test".into()).matches(&p));
        assert!(PromotionQuery::ByStageAndFreight { stage: "test".into(), freight: "abc".into() }.matches(&p));
        assert!(!PromotionQuery::ByStageAndFreight { stage: "test".into(), freight: "def".into() }.matches(&p));
    }
}
