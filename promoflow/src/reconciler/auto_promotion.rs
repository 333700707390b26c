//! Automatic promotion of newly available Freight.

use tracing::{debug, info};

use super::available::available_freight;
use super::ReconcileContext;
use crate::core::annotations::LABEL_STAGE;
use crate::core::{OwnerReference, Promotion, Stage, StageStatus};
use crate::errors::PromoflowError;
use crate::ports::PromotionQuery;

/// Creates a Promotion to the newest available Freight of every requested
/// origin, when the project enables auto-promotion for the Stage.
///
/// Returns the Promotions created by this call.
pub async fn plan_auto_promotions(
    ctx: &ReconcileContext,
    stage: &Stage,
    status: &StageStatus,
) -> Result<Vec<Promotion>, PromoflowError> {
    if stage.spec.requested_freight.is_empty() {
        return Ok(Vec::new());
    }
    let namespace = stage.namespace();

    let enabled = ctx
        .store
        .get_project_config(namespace)
        .await?
        .is_some_and(|config| config.auto_promotion_enabled(stage.name()));
    if !enabled {
        debug!(stage = %stage.key(), "Auto-promotion is not enabled");
        return Ok(Vec::new());
    }

    let now = ctx.clock.now();
    let mut created = Vec::new();
    for request in &stage.spec.requested_freight {
        let candidates = available_freight(ctx.store.as_ref(), stage, request, now).await?;
        let Some(newest) = candidates.into_iter().next() else {
            debug!(stage = %stage.key(), origin = %request.origin, "No Freight available");
            continue;
        };

        let current = status
            .current_freight()
            .and_then(|fc| fc.for_origin(&request.origin));
        if current.is_some_and(|f| f.name == newest.name()) {
            continue;
        }

        let existing = ctx
            .store
            .list_promotions(
                namespace,
                &PromotionQuery::ByStageAndFreight {
                    stage: stage.name().to_string(),
                    freight: newest.name().to_string(),
                },
            )
            .await?;
        if !existing.is_empty() {
            debug!(stage = %stage.key(), freight = newest.name(), "Promotion already exists");
            continue;
        }

        let steps = stage
            .spec
            .promotion_template
            .as_ref()
            .map(|t| t.steps.clone())
            .unwrap_or_default();
        let mut promotion = Promotion::new(namespace, stage.name(), newest.name()).with_steps(steps);
        promotion
            .metadata
            .labels
            .insert(LABEL_STAGE.to_string(), stage.name().to_string());
        promotion.metadata.owner_references.push(OwnerReference {
            kind: "Stage".to_string(),
            name: stage.name().to_string(),
            uid: stage.metadata.uid.clone(),
        });

        match ctx.store.create_promotion(&promotion).await {
            Ok(promotion) => {
                info!(
                    stage = %stage.key(),
                    promotion = promotion.name(),
                    freight = newest.name(),
                    "Created Promotion"
                );
                ctx.recorder.record_promotion_created(stage, &promotion, &newest).await;
                created.push(promotion);
            }
            Err(err) if err.is_already_exists() => {
                debug!(stage = %stage.key(), promotion = promotion.name(), "Promotion already exists");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FreightCollection, ProjectConfig};
    use crate::errors::StoreError;
    use crate::events::AuditReason;
    use crate::ports::StoreOp;
    use crate::testing::{FreightBuilder, StageBuilder, TestHarness};
    use chrono::{Duration, Utc};

    fn setup() -> (TestHarness, Stage) {
        let harness = TestHarness::new();
        harness
            .store
            .put_project_config(ProjectConfig::new("ns").with_policy("test", true));
        let stage = harness
            .store
            .put_stage(StageBuilder::regular("ns", "test").direct("w").build());
        (harness, stage)
    }

    #[tokio::test]
    async fn test_promotes_newest() {
        let (harness, stage) = setup();
        let now = Utc::now();
        harness
            .store
            .put_freight(FreightBuilder::new("ns", "older", "w").created_at(now - Duration::hours(1)).build());
        harness
            .store
            .put_freight(FreightBuilder::new("ns", "newer", "w").created_at(now).build());

        let created = plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap();

        assert_eq!(created.len(), 1);
        let promotion = &created[0];
        assert_eq!(promotion.spec.freight, "newer");
        assert_eq!(promotion.spec.stage, "test");
        assert_eq!(promotion.metadata.label(LABEL_STAGE), Some("test"));
        assert_eq!(promotion.metadata.owner_references[0].name, "test");
        assert!(!promotion.spec.steps.is_empty());
        assert_eq!(harness.sink.events_with_reason(AuditReason::PromotionCreated).len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_planning_creates_one() {
        let (harness, stage) = setup();
        harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());

        for _ in 0..3 {
            plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap();
        }
        assert_eq!(harness.store.promotions("ns").len(), 1);
        assert_eq!(harness.store.call_count(StoreOp::CreatePromotion), 1);
    }

    #[tokio::test]
    async fn test_skips_current_freight() {
        let (harness, mut stage) = setup();
        let freight = harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());
        stage
            .status
            .freight_history
            .record(FreightCollection::new([freight.to_reference()]));

        let created = plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap();
        assert!(created.is_empty());
    }

    #[tokio::test]
    async fn test_policy_gates_planning() {
        let harness = TestHarness::new();
        harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());
        let stage = harness
            .store
            .put_stage(StageBuilder::regular("ns", "test").direct("w").build());

        assert!(plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap().is_empty());

        harness
            .store
            .put_project_config(ProjectConfig::new("ns").with_policy("test", false));
        assert!(plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap().is_empty());
        assert!(harness.store.promotions("ns").is_empty());
    }

    #[tokio::test]
    async fn test_lookup_errors_propagate() {
        let (harness, stage) = setup();
        harness
            .store
            .fail_next(StoreOp::ListFreight, StoreError::Unavailable("down".into()));

        let err = plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap_err();
        assert!(matches!(err, PromoflowError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_duplicate_create_tolerated() {
        let (harness, stage) = setup();
        harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());
        harness
            .store
            .fail_next(StoreOp::CreatePromotion, StoreError::already_exists("Promotion", "ns/x"));

        let created = plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap();
        assert!(created.is_empty());
        assert!(harness.sink.is_empty());
    }
}
