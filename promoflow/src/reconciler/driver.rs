//! Entry point of a single reconciliation.

use tracing::{debug, info, info_span, Instrument};

use super::cleanup::finalize_stage;
use super::{
    ControlFlowStageReconciler, ReconcileContext, RegularStageReconciler, Requeue, StageReconciler,
};
use crate::core::annotations::FINALIZER;
use crate::core::{ObjectKey, Stage, StageKind};
use crate::errors::PromoflowError;
use crate::observability::SpanTimer;

/// Loads a Stage, handles its finalizer and hands it to the reconciler
/// matching its kind.
#[derive(Debug, Clone)]
pub struct StageDriver {
    ctx: ReconcileContext,
    regular: RegularStageReconciler,
    control_flow: ControlFlowStageReconciler,
}

impl StageDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(ctx: ReconcileContext) -> Self {
        Self {
            regular: RegularStageReconciler::new(ctx.clone()),
            control_flow: ControlFlowStageReconciler::new(ctx.clone()),
            ctx,
        }
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &ReconcileContext {
        &self.ctx
    }

    /// Reconciles the Stage stored under `key`.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Requeue, PromoflowError> {
        let span = info_span!("reconcile", stage = %key);
        async {
            let timer = SpanTimer::start("reconcile");
            let result = self.reconcile_inner(key).await;
            match &result {
                Ok(requeue) => debug!(duration_ms = timer.finish(), ?requeue, "Reconciled Stage"),
                Err(err) => debug!(duration_ms = timer.finish(), error = %err, "Reconciliation failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn reconcile_inner(&self, key: &ObjectKey) -> Result<Requeue, PromoflowError> {
        let Some(mut stage) = self.ctx.store.get_stage(key).await? else {
            debug!("Stage no longer exists");
            return Ok(Requeue::Never);
        };

        if stage.metadata.is_deleting() {
            if stage.metadata.has_finalizer(FINALIZER) {
                finalize_stage(&self.ctx, &stage).await?;
                stage.metadata.remove_finalizer(FINALIZER);
                self.ctx.store.update_stage(&stage).await?;
                info!("Finalized Stage");
            }
            return Ok(Requeue::Never);
        }

        if stage.metadata.add_finalizer(FINALIZER) {
            stage = self.ctx.store.update_stage(&stage).await?;
            debug!("Added finalizer");
        }

        self.reconciler_for(&stage).reconcile(&stage).await
    }

    fn reconciler_for(&self, stage: &Stage) -> &dyn StageReconciler {
        match stage.kind() {
            StageKind::Regular => &self.regular,
            StageKind::ControlFlow => &self.control_flow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConditionStatus, ConditionType, StagePhase};
    use crate::testing::{assert_condition, FreightBuilder, StageBuilder, TestHarness};
    use chrono::Utc;

    #[tokio::test]
    async fn test_missing_stage_is_not_requeued() {
        let harness = TestHarness::new();
        let driver = StageDriver::new(harness.ctx.clone());
        let requeue = driver.reconcile(&ObjectKey::new("ns", "gone")).await.unwrap();
        assert_eq!(requeue, Requeue::Never);
    }

    #[tokio::test]
    async fn test_adds_finalizer_and_dispatches_by_kind() {
        let harness = TestHarness::new();
        let regular = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());
        let gate = harness
            .store
            .put_stage(StageBuilder::control_flow("ns", "gate").direct("w").build());
        let driver = StageDriver::new(harness.ctx.clone());

        driver.reconcile(&regular.key()).await.unwrap();
        driver.reconcile(&gate.key()).await.unwrap();

        let regular = harness.store.stage(&regular.key()).unwrap();
        assert!(regular.metadata.has_finalizer(FINALIZER));
        assert_eq!(regular.status.phase, StagePhase::Steady);

        let gate = harness.store.stage(&gate.key()).unwrap();
        assert!(gate.metadata.has_finalizer(FINALIZER));
        assert_eq!(gate.status.phase, StagePhase::NotApplicable);
        assert_condition(&gate.status, ConditionType::Ready, ConditionStatus::True, "Synced");
    }

    #[tokio::test]
    async fn test_deletion_cleans_up_then_releases() {
        let harness = TestHarness::new();
        harness
            .store
            .put_freight(FreightBuilder::new("ns", "f1", "w").verified_in("test", Utc::now()).build());
        let stage = harness
            .store
            .put_stage(StageBuilder::regular("ns", "test").finalizer(FINALIZER).build());
        let driver = StageDriver::new(harness.ctx.clone());

        assert!(!harness.store.delete_stage(&stage.key()));
        assert!(harness.store.stage(&stage.key()).unwrap().metadata.is_deleting());

        let requeue = driver.reconcile(&stage.key()).await.unwrap();

        assert_eq!(requeue, Requeue::Never);
        assert!(harness.store.stage(&stage.key()).is_none());
        assert!(!harness.store.freight("ns", "f1").unwrap().is_verified_in("test"));
    }
}
