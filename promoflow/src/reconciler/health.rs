//! Health assessment after a Promotion.

use tracing::debug;

use super::ReconcileContext;
use crate::core::{Condition, ConditionStatus, ConditionType, Health, HealthState, Stage, StageStatus};

/// Assesses the health of the Stage from the checks scheduled by its last
/// Promotion. Checks are run in one batch; retries happen across
/// reconciliations.
pub async fn assess_health(ctx: &ReconcileContext, stage: &Stage, status: &mut StageStatus) {
    let now = ctx.clock.now();
    let healthy = |s: ConditionStatus, reason: &str, message: String| {
        Condition::new(ConditionType::Healthy, s, reason, message).with_generation(stage.metadata.generation)
    };

    let Some(last) = status.last_promotion.clone() else {
        status.health = None;
        status.conditions.set(
            healthy(
                ConditionStatus::Unknown,
                "NoFreight",
                "No Freight has been promoted to this Stage".to_string(),
            ),
            now,
        );
        return;
    };

    if !last.succeeded() {
        let phase = last.phase().map(|p| p.to_string()).unwrap_or_else(|| "Unknown".to_string());
        let message = format!("Last Promotion {:?} finished with phase {phase}", last.name);
        status.health = Some(Health::new(HealthState::Unhealthy).with_issue(message.clone()));
        status
            .conditions
            .set(healthy(ConditionStatus::False, &format!("LastPromotion{phase}"), message), now);
        return;
    }

    let steps = last.health_checks();
    let health = ctx.health.check(stage, steps).await;
    debug!(stage = %stage.key(), health = %health.status, checks = steps.len(), "Assessed Stage health");

    match health.status {
        HealthState::Healthy => status.conditions.set(
            healthy(
                ConditionStatus::True,
                "Healthy",
                format!("Stage is healthy (performed {} health checks)", steps.len()),
            ),
            now,
        ),
        HealthState::Unhealthy => status.conditions.set(
            healthy(ConditionStatus::False, "Unhealthy", health.issues.join("; ")),
            now,
        ),
        HealthState::NotApplicable => {
            status.conditions.delete(ConditionType::Healthy);
        }
        other => status.conditions.set(
            healthy(ConditionStatus::Unknown, &other.to_string(), health.issues.join("; ")),
            now,
        ),
    }
    status.health = Some(health);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HealthCheckStep, PromotionPhase, PromotionReference, PromotionStatus};
    use crate::ports::MockHealthChecker;
    use crate::testing::{assert_condition, assert_no_condition, StageBuilder, TestHarness};
    use std::sync::Arc;

    fn last(phase: PromotionPhase) -> PromotionReference {
        PromotionReference {
            name: "test.01.f1".into(),
            freight: None,
            status: Some(PromotionStatus {
                phase,
                health_checks: vec![HealthCheckStep::new("argocd-update").with_target("app")],
                ..Default::default()
            }),
        }
    }

    fn harness_with(mock: MockHealthChecker) -> TestHarness {
        let mut harness = TestHarness::new();
        harness.ctx.health = Arc::new(mock);
        harness
    }

    #[tokio::test]
    async fn test_no_last_promotion() {
        let mut mock = MockHealthChecker::new();
        mock.expect_check().never();
        let harness = harness_with(mock);
        let stage = StageBuilder::regular("ns", "test").build();

        let mut status = stage.status.clone();
        assess_health(&harness.ctx, &stage, &mut status).await;

        assert!(status.health.is_none());
        assert_condition(&status, ConditionType::Healthy, ConditionStatus::Unknown, "NoFreight");
    }

    #[tokio::test]
    async fn test_failed_last_promotion_is_unhealthy() {
        let mut mock = MockHealthChecker::new();
        mock.expect_check().never();
        let harness = harness_with(mock);
        let stage = StageBuilder::regular("ns", "test").build();

        let mut status = stage.status.clone();
        status.last_promotion = Some(last(PromotionPhase::Failed));
        assess_health(&harness.ctx, &stage, &mut status).await;

        let health = status.health.as_ref().unwrap();
        assert_eq!(health.status, HealthState::Unhealthy);
        assert_eq!(health.issues.len(), 1);
        assert_condition(&status, ConditionType::Healthy, ConditionStatus::False, "LastPromotionFailed");
    }

    #[tokio::test]
    async fn test_checks_run_once_with_promotion_steps() {
        let mut mock = MockHealthChecker::new();
        mock.expect_check()
            .withf(|_, steps| steps.len() == 1 && steps[0].uses == "argocd-update")
            .times(1)
            .returning(|_, _| Health::new(HealthState::Healthy));
        let harness = harness_with(mock);
        let stage = StageBuilder::regular("ns", "test").build();

        let mut status = stage.status.clone();
        status.last_promotion = Some(last(PromotionPhase::Succeeded));
        assess_health(&harness.ctx, &stage, &mut status).await;

        assert_eq!(status.health_state(), Some(HealthState::Healthy));
        assert_condition(&status, ConditionType::Healthy, ConditionStatus::True, "Healthy");
        assert!(status
            .conditions
            .get(ConditionType::Healthy)
            .unwrap()
            .message
            .contains("performed 1 health checks"));
    }

    #[tokio::test]
    async fn test_health_state_mapping() {
        let cases = [
            (HealthState::Unhealthy, Some((ConditionStatus::False, "Unhealthy"))),
            (HealthState::Progressing, Some((ConditionStatus::Unknown, "Progressing"))),
            (HealthState::Unknown, Some((ConditionStatus::Unknown, "Unknown"))),
            (HealthState::NotApplicable, None),
        ];
        for (state, expected) in cases {
            let mut mock = MockHealthChecker::new();
            mock.expect_check()
                .returning(move |_, _| Health::new(state).with_issue("issue"));
            let harness = harness_with(mock);
            let stage = StageBuilder::regular("ns", "test").build();

            let mut status = stage.status.clone();
            status.last_promotion = Some(last(PromotionPhase::Succeeded));
            assess_health(&harness.ctx, &stage, &mut status).await;

            assert_eq!(status.health_state(), Some(state));
            match expected {
                Some((s, reason)) => assert_condition(&status, ConditionType::Healthy, s, reason),
                None => assert_no_condition(&status, ConditionType::Healthy),
            }
        }
    }
}
