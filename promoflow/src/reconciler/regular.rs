//! Reconciliation of Stages that promote, check health and verify.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::auto_promotion::plan_auto_promotions;
use super::freight::mark_freight_verified;
use super::health::assess_health;
use super::promotions::sync_promotions;
use super::summary::summarize_conditions;
use super::verification::reconcile_verification;
use super::{ReconcileContext, ReconcilePhase, Requeue, StageReconciler, StatusWriter};
use crate::core::annotations::refresh_token;
use crate::core::{Stage, StageStatus};
use crate::errors::PromoflowError;

/// Runs the reconciliation phases of a regular Stage in order.
#[derive(Debug, Clone)]
pub struct RegularStageReconciler {
    ctx: ReconcileContext,
}

impl RegularStageReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn run_phase(
        &self,
        phase: ReconcilePhase,
        stage: &Stage,
        status: &mut StageStatus,
        has_pending: &mut bool,
    ) -> Result<(), PromoflowError> {
        let ctx = &self.ctx;
        match phase {
            ReconcilePhase::Promotions => {
                *has_pending = sync_promotions(ctx, stage, status).await?;
            }
            ReconcilePhase::Health => assess_health(ctx, stage, status).await,
            ReconcilePhase::Verification => reconcile_verification(ctx, stage, status).await?,
            ReconcilePhase::Freight => mark_freight_verified(ctx, stage, status).await?,
            ReconcilePhase::AutoPromotion => {
                plan_auto_promotions(ctx, stage, status).await?;
            }
        }
        Ok(())
    }

    fn requeue(&self, status: &StageStatus, has_pending: bool) -> Requeue {
        if has_pending {
            return Requeue::Immediately;
        }
        let verifying = status
            .current_freight()
            .and_then(|fc| fc.current_verification())
            .is_some_and(|vi| !vi.is_terminal());
        if verifying {
            Requeue::After(self.ctx.config.verification_poll_interval())
        } else {
            Requeue::After(self.ctx.config.fallback_poll_interval())
        }
    }
}

#[async_trait]
impl StageReconciler for RegularStageReconciler {
    async fn reconcile(&self, stage: &Stage) -> Result<Requeue, PromoflowError> {
        let store = self.ctx.store.as_ref();
        let mut writer = StatusWriter::new(stage);
        let mut status = stage.status.clone();
        let mut has_pending = false;

        for phase in ReconcilePhase::ALL {
            let result = self.run_phase(phase, stage, &mut status, &mut has_pending).await;
            let now = self.ctx.clock.now();
            match result {
                Ok(()) => {
                    summarize_conditions(stage, &mut status, None, now);
                    writer
                        .write(store, &status)
                        .await
                        .map_err(|source| PromoflowError::StatusPatch {
                            stage: stage.name().to_string(),
                            source,
                        })?;
                }
                Err(err) => {
                    let err = PromoflowError::phase(phase, stage.name(), err);
                    summarize_conditions(stage, &mut status, Some(&err), now);
                    if let Err(patch_err) = writer.write(store, &status).await {
                        warn!(stage = %stage.key(), error = %patch_err, "Failed to persist status after error");
                    }
                    return Err(err);
                }
            }
        }

        if let Some(token) = refresh_token(&stage.metadata) {
            if status.last_handled_refresh.as_deref() != Some(token) {
                debug!(stage = %stage.key(), token, "Handled refresh");
                status.last_handled_refresh = Some(token.to_string());
                writer
                    .write(store, &status)
                    .await
                    .map_err(|source| PromoflowError::StatusPatch {
                        stage: stage.name().to_string(),
                        source,
                    })?;
            }
        }

        Ok(self.requeue(&status, has_pending))
    }
}
