//! Per-Stage reconciliation.
//!
//! A reconciliation loads one Stage, classifies it once, and hands it to
//! the matching [`StageReconciler`]. The regular reconciler runs the phases
//! below in a fixed order against a working copy of the status, summarizing
//! conditions and persisting the status after each one:
//!
//! 1. [`promotions`] - track in-flight and finished Promotions
//! 2. [`health`] - run the health checks of the last Promotion
//! 3. [`verification`] - start, poll or abort analysis of the current Freight
//! 4. [`freight`] - mark verified Freight for downstream Stages
//! 5. [`auto_promotion`] - create Promotions for newly available Freight

pub mod auto_promotion;
pub mod available;
pub mod cleanup;
pub mod control_flow;
pub mod driver;
pub mod freight;
pub mod health;
pub mod promotions;
pub mod regular;
pub mod summary;
pub mod verification;

#[cfg(test)]
mod scenario_tests;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::core::{ObjectKey, Stage, StageStatus};
use crate::errors::{PromoflowError, StoreError};
use crate::events::{EventRecorder, EventSink, NoOpEventSink};
use crate::ports::{AnalysisClient, Clock, HealthChecker, ResourceStore, SystemClock};

pub use control_flow::ControlFlowStageReconciler;
pub use driver::StageDriver;
pub use regular::RegularStageReconciler;
pub use summary::summarize_conditions;

/// The phases of a regular reconciliation, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReconcilePhase {
    /// Promotion synchronization.
    Promotions,
    /// Health assessment.
    Health,
    /// Verification.
    Verification,
    /// Marking Freight verified.
    Freight,
    /// Auto-promotion planning.
    AutoPromotion,
}

impl ReconcilePhase {
    /// All phases in execution order.
    pub const ALL: [Self; 5] = [
        Self::Promotions,
        Self::Health,
        Self::Verification,
        Self::Freight,
        Self::AutoPromotion,
    ];
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Promotions => write!(f, "promotions"),
            Self::Health => write!(f, "health"),
            Self::Verification => write!(f, "verification"),
            Self::Freight => write!(f, "freight verification"),
            Self::AutoPromotion => write!(f, "auto-promotion"),
        }
    }
}

/// When a Stage should be reconciled again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Only on the next watch event.
    Never,
    /// As soon as possible, rate limited per Stage.
    Immediately,
    /// After a fixed delay.
    After(Duration),
}

/// Collaborators and settings shared by every reconciliation.
#[derive(Clone)]
pub struct ReconcileContext {
    /// The resource store.
    pub store: Arc<dyn ResourceStore>,
    /// The analysis engine, if configured.
    pub analysis: Option<Arc<dyn AnalysisClient>>,
    /// The health-check executor.
    pub health: Arc<dyn HealthChecker>,
    /// Source of time.
    pub clock: Arc<dyn Clock>,
    /// Audit events.
    pub recorder: EventRecorder,
    /// Controller settings.
    pub config: ControllerConfig,
}

impl fmt::Debug for ReconcileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileContext")
            .field("has_analysis", &self.analysis.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ReconcileContext {
    /// Creates a context without an analysis engine, using the system clock
    /// and discarding audit events.
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        health: Arc<dyn HealthChecker>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            analysis: None,
            health,
            clock: Arc::new(SystemClock),
            recorder: EventRecorder::new(Arc::new(NoOpEventSink)),
            config,
        }
    }

    /// Sets the analysis engine client.
    #[must_use]
    pub fn with_analysis(mut self, client: Arc<dyn AnalysisClient>) -> Self {
        self.analysis = Some(client);
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the audit event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.recorder = EventRecorder::new(sink);
        self
    }

    /// Returns the analysis client unless the integration is disabled.
    #[must_use]
    pub fn analysis_client(&self) -> Option<&Arc<dyn AnalysisClient>> {
        if self.config.analysis_enabled {
            self.analysis.as_ref()
        } else {
            None
        }
    }
}

/// Reconciles one kind of Stage.
#[async_trait]
pub trait StageReconciler: Send + Sync {
    /// Reconciles a Stage that is not being deleted. Status changes are
    /// persisted before returning, also when an error is returned.
    async fn reconcile(&self, stage: &Stage) -> Result<Requeue, PromoflowError>;
}

/// Writes Stage status with optimistic concurrency, skipping writes that
/// would not change anything.
#[derive(Debug)]
pub(crate) struct StatusWriter {
    key: ObjectKey,
    resource_version: u64,
    persisted: StageStatus,
}

impl StatusWriter {
    pub(crate) fn new(stage: &Stage) -> Self {
        Self {
            key: stage.key(),
            resource_version: stage.metadata.resource_version,
            persisted: stage.status.clone(),
        }
    }

    /// Persists `status` if it differs from what was last written.
    pub(crate) async fn write(
        &mut self,
        store: &dyn ResourceStore,
        status: &StageStatus,
    ) -> Result<bool, StoreError> {
        if *status == self.persisted {
            return Ok(false);
        }
        let updated = store
            .patch_stage_status(&self.key, self.resource_version, status)
            .await?;
        debug!(stage = %self.key, resource_version = updated.metadata.resource_version, "Patched Stage status");
        self.resource_version = updated.metadata.resource_version;
        self.persisted = updated.status;
        Ok(true)
    }
}
