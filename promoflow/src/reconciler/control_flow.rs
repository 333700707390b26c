//! Reconciliation of control-flow Stages.
//!
//! A control-flow Stage has no promotion template. It never deploys
//! anything; it only marks the Freight available to it as verified so that
//! its downstream Stages can take that Freight.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::available::available_freight;
use super::freight::mark_verified_in;
use super::summary::{REASON_RECONCILE_ERROR, REASON_RETRY_AFTER_ERROR};
use super::{ReconcileContext, Requeue, StageReconciler, StatusWriter};
use crate::core::annotations::refresh_token;
use crate::core::{Condition, ConditionStatus, ConditionType, Freight, Stage, StagePhase};
use crate::errors::PromoflowError;

/// Reconciler for Stages without a promotion template.
#[derive(Debug, Clone)]
pub struct ControlFlowStageReconciler {
    ctx: ReconcileContext,
}

impl ControlFlowStageReconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(ctx: ReconcileContext) -> Self {
        Self { ctx }
    }

    async fn mark_available(&self, stage: &Stage) -> Result<(), PromoflowError> {
        let now = self.ctx.clock.now();
        let mut errors = Vec::new();
        for request in &stage.spec.requested_freight {
            let freight = match available_freight(self.ctx.store.as_ref(), stage, request, now).await {
                Ok(freight) => freight,
                Err(err) => {
                    warn!(stage = %stage.key(), origin = %request.origin, error = %err, "Failed to list available Freight");
                    errors.push(err);
                    continue;
                }
            };
            let names: Vec<&str> = freight
                .iter()
                .filter(|f| !f.is_verified_in(stage.name()))
                .map(Freight::name)
                .collect();
            if names.is_empty() {
                continue;
            }
            debug!(stage = %stage.key(), origin = %request.origin, count = names.len(), "Marking Freight verified");
            if let Err(err) = mark_verified_in(&self.ctx, stage.namespace(), stage.name(), &names, now).await {
                errors.push(err);
            }
        }
        PromoflowError::aggregate(errors).map_or(Ok(()), Err)
    }
}

#[async_trait]
impl StageReconciler for ControlFlowStageReconciler {
    async fn reconcile(&self, stage: &Stage) -> Result<Requeue, PromoflowError> {
        let now = self.ctx.clock.now();
        let generation = stage.metadata.generation;
        let mut writer = StatusWriter::new(stage);
        let mut status = stage.status.clone();

        let result = self.mark_available(stage).await;
        match &result {
            Ok(()) => {
                status.conditions.delete(ConditionType::Reconciling);
                status.conditions.set(
                    Condition::new(
                        ConditionType::Ready,
                        ConditionStatus::True,
                        "Synced",
                        "Available Freight has been marked verified",
                    )
                    .with_generation(generation),
                    now,
                );
                status.observed_generation = generation;
            }
            Err(err) => {
                status.conditions.set(
                    Condition::new(
                        ConditionType::Ready,
                        ConditionStatus::False,
                        REASON_RECONCILE_ERROR,
                        err.to_string(),
                    )
                    .with_generation(generation),
                    now,
                );
                status.conditions.set(
                    Condition::new(
                        ConditionType::Reconciling,
                        ConditionStatus::True,
                        REASON_RETRY_AFTER_ERROR,
                        "Retrying after error marking Freight verified",
                    )
                    .with_generation(generation),
                    now,
                );
            }
        }
        status.phase = StagePhase::NotApplicable;
        if let Some(token) = refresh_token(&stage.metadata) {
            status.last_handled_refresh = Some(token.to_string());
        }

        let written = writer.write(self.ctx.store.as_ref(), &status).await;
        result?;
        written.map_err(|source| PromoflowError::StatusPatch {
            stage: stage.name().to_string(),
            source,
        })?;
        Ok(Requeue::After(self.ctx.config.fallback_poll_interval()))
    }
}
