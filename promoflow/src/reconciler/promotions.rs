//! Promotion synchronization.
//!
//! Keeps `current_promotion`, `last_promotion` and the FreightHistory of a
//! Stage in line with the Promotions targeting it. Promotions are executed
//! elsewhere; this module only observes them.

use tracing::{debug, info, warn};

use super::ReconcileContext;
use crate::core::{
    compare_promotions, Condition, ConditionStatus, ConditionType, FreightReference, HealthState,
    Promotion, PromotionPhase, Stage, StageStatus,
};
use crate::errors::PromoflowError;
use crate::ports::PromotionQuery;

/// Synchronizes the Stage's view of its Promotions.
///
/// Returns true while non-terminal Promotions exist for the Stage.
pub async fn sync_promotions(
    ctx: &ReconcileContext,
    stage: &Stage,
    status: &mut StageStatus,
) -> Result<bool, PromoflowError> {
    let now = ctx.clock.now();
    let generation = stage.metadata.generation;

    let mut promotions = match ctx
        .store
        .list_promotions(stage.namespace(), &PromotionQuery::ByStage(stage.name().to_string()))
        .await
    {
        Ok(promotions) => promotions,
        Err(err) => {
            status.conditions.set(
                Condition::new(
                    ConditionType::Promoting,
                    ConditionStatus::Unknown,
                    "ListPromotionsFailed",
                    format!("Failed to list Promotions: {err}"),
                )
                .with_generation(generation),
                now,
            );
            return Err(err.into());
        }
    };
    promotions.sort_by(compare_promotions);

    let has_pending = promotions.iter().any(|p| !p.is_terminal());
    let candidate = promotions.first();

    let current_replaced = status
        .current_promotion
        .as_ref()
        .is_some_and(|current| candidate.map_or(true, |c| c.name() != current.name));
    if current_replaced || candidate.is_some_and(Promotion::is_terminal) {
        record_finished(ctx, stage, status, &promotions);
        status.current_promotion = None;
        status.conditions.delete(ConditionType::Promoting);
        return Ok(has_pending);
    }

    if promotion_blocked(status) {
        debug!(
            stage = %stage.key(),
            "Current Freight has not finished verification; not tracking a new Promotion"
        );
        return Ok(has_pending);
    }

    match candidate {
        Some(promotion) => {
            let freight = match ctx.store.get_freight(stage.namespace(), &promotion.spec.freight).await {
                Ok(freight) => freight.map(|f| f.to_reference()),
                Err(err) if err.is_not_found() => None,
                Err(err) => return Err(err.into()),
            };
            if status.current_promotion.is_none() {
                info!(stage = %stage.key(), promotion = promotion.name(), "Tracking current Promotion");
            }
            status.current_promotion = Some(promotion.to_reference(freight));
            status.conditions.set(
                Condition::new(
                    ConditionType::Promoting,
                    ConditionStatus::True,
                    "ActivePromotion",
                    format!("Promotion {:?} is currently {}", promotion.name(), promotion.phase()),
                )
                .with_generation(generation),
                now,
            );
        }
        None => {
            status.conditions.delete(ConditionType::Promoting);
        }
    }

    Ok(has_pending)
}

/// A new Promotion may not become current while the current Freight is
/// being verified, or has not been verified yet unless the Stage is
/// unhealthy.
fn promotion_blocked(status: &StageStatus) -> bool {
    status.current_freight().is_some_and(|fc| match fc.current_verification() {
        Some(vi) => !vi.is_terminal(),
        None => status.health_state() != Some(HealthState::Unhealthy),
    })
}

/// Applies every Promotion that finished after `last_promotion`, oldest
/// first.
fn record_finished(ctx: &ReconcileContext, stage: &Stage, status: &mut StageStatus, promotions: &[Promotion]) {
    let now = ctx.clock.now();
    let generation = stage.metadata.generation;
    let last_name = status.last_promotion.as_ref().map(|p| p.name.clone());

    let mut finished: Vec<&Promotion> = promotions
        .iter()
        .filter(|p| p.is_terminal())
        .filter(|p| last_name.as_deref().map_or(true, |last| p.name() > last))
        .collect();
    finished.sort_by(|a, b| a.name().cmp(b.name()));

    for promotion in &finished {
        info!(
            stage = %stage.key(),
            promotion = promotion.name(),
            phase = %promotion.phase(),
            "Promotion finished"
        );
        if promotion.phase() != PromotionPhase::Succeeded {
            continue;
        }
        match &promotion.status.freight_collection {
            Some(fc) => status
                .freight_history
                .record_bounded(fc.clone(), ctx.config.freight_history_limit),
            None => warn!(
                stage = %stage.key(),
                promotion = promotion.name(),
                "Succeeded Promotion carries no FreightCollection"
            ),
        }
        status.health = None;
        status.conditions.set(
            Condition::new(
                ConditionType::Healthy,
                ConditionStatus::Unknown,
                "WaitingForHealthCheck",
                "Waiting for health check to be performed after successful promotion",
            )
            .with_generation(generation),
            now,
        );
        status.conditions.set(
            Condition::new(
                ConditionType::Verified,
                ConditionStatus::Unknown,
                "WaitingForVerification",
                "Waiting for verification to be performed after successful promotion",
            )
            .with_generation(generation),
            now,
        );
    }

    if let Some(newest) = finished.last() {
        status.last_promotion = Some(newest.to_reference(promoted_freight(newest)));
    }
}

fn promoted_freight(promotion: &Promotion) -> Option<FreightReference> {
    promotion
        .status
        .freight_collection
        .as_ref()?
        .references_iter()
        .find(|f| f.name == promotion.spec.freight)
        .cloned()
}
