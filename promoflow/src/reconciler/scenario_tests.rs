//! End-to-end behavior of the driver against in-memory collaborators.

use chrono::Duration;
use pretty_assertions::assert_eq;

use super::auto_promotion::plan_auto_promotions;
use super::promotions::sync_promotions;
use super::verification::{reconcile_verification, ABORTED_MESSAGE};
use crate::config::ControllerConfig;
use crate::core::annotations::{ANNOTATION_ABORT, ANNOTATION_REVERIFY};
use crate::core::{
    AnalysisRunPhase, AnalysisTemplate, AnalysisTemplateSpec, ConditionStatus, ConditionType, FreightCollection,
    HealthState, Metric, ObjectKey, ProjectConfig, PromotionPhase, Stage, StageStatus, VerificationInfo,
    VerificationPhase, VerificationRequest,
};
use crate::ports::StoreOp;
use crate::testing::{assert_condition, reference, FreightBuilder, PromotionBuilder, StageBuilder, TestHarness};

fn current_vi(harness: &TestHarness, key: &ObjectKey) -> VerificationInfo {
    harness
        .store
        .stage(key)
        .and_then(|s| s.status.current_freight().and_then(|fc| fc.current_verification().cloned()))
        .unwrap()
}

fn deployed_stage(harness: &TestHarness, builder: StageBuilder) -> Stage {
    let freight = harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());
    harness.store.put_stage(
        builder
            .direct("w")
            .deployed(FreightCollection::new([freight.to_reference()]))
            .build(),
    )
}

fn with_smoke_template(harness: &TestHarness) {
    harness.store.put_analysis_template(AnalysisTemplate::new(
        "ns",
        "smoke",
        AnalysisTemplateSpec {
            metrics: vec![Metric::new("error-rate")],
            args: Vec::new(),
        },
    ));
}

fn rank(phase: VerificationPhase) -> u8 {
    match phase {
        VerificationPhase::Pending => 0,
        VerificationPhase::Running => 1,
        _ => 2,
    }
}

#[tokio::test]
async fn test_driver_is_idempotent() {
    let harness = TestHarness::new();
    let stage = deployed_stage(&harness, StageBuilder::regular("ns", "test"));
    let driver = harness.driver();

    driver.reconcile(&stage.key()).await.unwrap();
    let first = harness.store.stage(&stage.key()).unwrap();
    let patches = harness.store.call_count(StoreOp::PatchStageStatus);

    driver.reconcile(&stage.key()).await.unwrap();
    let second = harness.store.stage(&stage.key()).unwrap();

    assert_eq!(second.status, first.status);
    assert_eq!(harness.store.call_count(StoreOp::PatchStageStatus), patches);
    assert_eq!(
        serde_json::to_string(&second.status).unwrap(),
        serde_json::to_string(&first.status).unwrap()
    );
}

#[tokio::test]
async fn test_driver_is_idempotent_after_verification() {
    let harness = TestHarness::new();
    with_smoke_template(&harness);
    harness
        .store
        .put_project_config(ProjectConfig::new("ns").with_policy("test", true));
    let stage = deployed_stage(&harness, StageBuilder::regular("ns", "test").analysis_template("smoke"));
    let key = stage.key();
    let driver = harness.driver();

    driver.reconcile(&key).await.unwrap();
    let run = current_vi(&harness, &key).analysis_run.unwrap().name;
    harness.analysis.set_phase("ns", &run, AnalysisRunPhase::Successful);
    driver.reconcile(&key).await.unwrap();

    let first = harness.store.stage(&key).unwrap();
    assert_eq!(first.status.health_state(), Some(HealthState::Healthy));
    assert_eq!(current_vi(&harness, &key).phase, VerificationPhase::Successful);
    assert!(harness.store.freight("ns", "f1").unwrap().is_verified_in("test"));
    let stage_patches = harness.store.call_count(StoreOp::PatchStageStatus);
    let freight_patches = harness.store.call_count(StoreOp::PatchFreightStatus);
    let events = harness.sink.len();
    assert_eq!(events, 1);

    for _ in 0..2 {
        driver.reconcile(&key).await.unwrap();
    }

    let second = harness.store.stage(&key).unwrap();
    assert_eq!(second.status, first.status);
    assert_eq!(harness.store.call_count(StoreOp::PatchStageStatus), stage_patches);
    assert_eq!(harness.store.call_count(StoreOp::PatchFreightStatus), freight_patches);
    assert_eq!(harness.store.call_count(StoreOp::CreatePromotion), 0);
    assert_eq!(harness.analysis.runs().len(), 1);
    assert_eq!(harness.sink.len(), events);
}

#[tokio::test]
async fn test_at_most_one_current_promotion() {
    let harness = TestHarness::new();
    let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());
    let driver = harness.driver();

    let check = |status: &StageStatus| {
        let Some(current) = &status.current_promotion else {
            return;
        };
        let tracked: Vec<_> = harness
            .store
            .promotions("ns")
            .into_iter()
            .filter(|p| p.name() == current.name)
            .collect();
        assert_eq!(tracked.len(), 1);
        assert!(!tracked[0].is_terminal(), "{} is terminal but still current", current.name);
    };

    let first = PromotionBuilder::new("ns", "test", "f1")
        .named("test.01.f1")
        .phase(PromotionPhase::Running);
    harness.store.put_promotion(first.clone().build());
    driver.reconcile(&stage.key()).await.unwrap();
    let status = harness.store.stage(&stage.key()).unwrap().status;
    check(&status);
    assert_eq!(status.current_promotion.as_ref().map(|p| p.name.as_str()), Some("test.01.f1"));

    harness.store.put_promotion(
        PromotionBuilder::new("ns", "test", "f2")
            .named("test.02.f2")
            .build(),
    );
    driver.reconcile(&stage.key()).await.unwrap();
    let status = harness.store.stage(&stage.key()).unwrap().status;
    check(&status);
    assert_eq!(status.current_promotion.as_ref().map(|p| p.name.as_str()), Some("test.01.f1"));

    harness.store.put_promotion(
        first
            .phase(PromotionPhase::Succeeded)
            .freight_collection(FreightCollection::new([reference("f1", "w")]))
            .build(),
    );
    for _ in 0..3 {
        driver.reconcile(&stage.key()).await.unwrap();
        check(&harness.store.stage(&stage.key()).unwrap().status);
    }
    let status = harness.store.stage(&stage.key()).unwrap().status;
    assert_eq!(status.current_promotion.as_ref().map(|p| p.name.as_str()), Some("test.02.f2"));
    assert_eq!(status.last_promotion.as_ref().map(|p| p.name.as_str()), Some("test.01.f1"));
}

#[tokio::test]
async fn test_history_is_bounded() {
    let harness = TestHarness::with_config(ControllerConfig::default().with_freight_history_limit(2));
    let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());
    for (i, freight) in ["a", "b", "c"].into_iter().enumerate() {
        harness.store.put_promotion(
            PromotionBuilder::new("ns", "test", freight)
                .named(&format!("test.0{}.{freight}", i + 1))
                .phase(PromotionPhase::Succeeded)
                .freight_collection(FreightCollection::new([reference(freight, "w")]))
                .build(),
        );
    }

    harness.driver().reconcile(&stage.key()).await.unwrap();

    let history = harness.store.stage(&stage.key()).unwrap().status.freight_history;
    let deployed: Vec<_> = history
        .iter()
        .map(|fc| fc.references_iter().next().unwrap().name.clone())
        .collect();
    assert_eq!(deployed, vec!["c".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_verification_phases_are_monotonic() {
    let harness = TestHarness::new();
    with_smoke_template(&harness);
    let stage = deployed_stage(&harness, StageBuilder::regular("ns", "test").analysis_template("smoke"));
    let key = stage.key();
    let driver = harness.driver();

    driver.reconcile(&key).await.unwrap();
    let started = current_vi(&harness, &key);
    let run = started.analysis_run.clone().unwrap().name;
    let mut phases = vec![started.phase];

    for engine in [
        AnalysisRunPhase::Running,
        AnalysisRunPhase::Successful,
        AnalysisRunPhase::Running,
        AnalysisRunPhase::Failed,
    ] {
        harness.analysis.set_phase("ns", &run, engine);
        driver.reconcile(&key).await.unwrap();
        let vi = current_vi(&harness, &key);
        assert_eq!(vi.id, started.id);
        phases.push(vi.phase);
    }

    assert!(phases.windows(2).all(|w| rank(w[0]) <= rank(w[1])), "{phases:?}");
    assert_eq!(phases.last(), Some(&VerificationPhase::Successful));

    // A reverify naming an older attempt adds nothing.
    let mut stored = harness.store.stage(&key).unwrap();
    stored
        .metadata
        .annotations
        .insert(ANNOTATION_REVERIFY.into(), VerificationRequest::new("stale").to_annotation());
    harness.store.put_stage(stored);
    driver.reconcile(&key).await.unwrap();
    assert_eq!(current_vi(&harness, &key).id, started.id);

    let mut stored = harness.store.stage(&key).unwrap();
    stored
        .metadata
        .annotations
        .insert(ANNOTATION_REVERIFY.into(), VerificationRequest::new(&started.id).to_annotation());
    harness.store.put_stage(stored);
    driver.reconcile(&key).await.unwrap();

    let stored = harness.store.stage(&key).unwrap();
    let history = &stored.status.current_freight().unwrap().verification_history;
    assert_eq!(history.len(), 2);
    assert_ne!(history.current().unwrap().id, started.id);
    assert_eq!(rank(history.current().unwrap().phase), 0);
}

#[tokio::test]
async fn test_auto_promotion_is_deduplicated() {
    let harness = TestHarness::new();
    harness
        .store
        .put_project_config(ProjectConfig::new("ns").with_policy("test", true));
    harness.store.put_freight(FreightBuilder::new("ns", "f1", "w").build());
    let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());

    for _ in 0..5 {
        plan_auto_promotions(&harness.ctx, &stage, &stage.status).await.unwrap();
    }
    for _ in 0..3 {
        harness.driver().reconcile(&stage.key()).await.unwrap();
    }

    let promotions = harness.store.promotions("ns");
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].spec.freight, "f1");
}

#[tokio::test]
async fn test_abort_is_deterministic() {
    let harness = TestHarness::new();
    with_smoke_template(&harness);
    let stage = deployed_stage(&harness, StageBuilder::regular("ns", "test").analysis_template("smoke"));
    let key = stage.key();
    let driver = harness.driver();

    driver.reconcile(&key).await.unwrap();
    let started = current_vi(&harness, &key);
    let run = started.analysis_run.clone().unwrap().name;
    harness.analysis.set_phase("ns", &run, AnalysisRunPhase::Running);

    let mut stored = harness.store.stage(&key).unwrap();
    stored
        .metadata
        .annotations
        .insert(ANNOTATION_ABORT.into(), VerificationRequest::new(&started.id).to_annotation());
    harness.store.put_stage(stored);
    driver.reconcile(&key).await.unwrap();

    let aborted = current_vi(&harness, &key);
    assert_eq!(aborted.phase, VerificationPhase::Failed);
    assert_eq!(aborted.message, ABORTED_MESSAGE);

    for engine in [AnalysisRunPhase::Successful, AnalysisRunPhase::Error] {
        harness.analysis.set_phase("ns", &run, engine);
        driver.reconcile(&key).await.unwrap();
        let vi = current_vi(&harness, &key);
        assert_eq!(vi.phase, VerificationPhase::Failed);
        assert_eq!(vi.message, ABORTED_MESSAGE);
    }
}

#[tokio::test]
async fn test_newest_freight_is_promoted() {
    let harness = TestHarness::new();
    harness
        .store
        .put_project_config(ProjectConfig::new("ns").with_policy("test", true));
    let t = harness.ctx.clock.now();
    harness
        .store
        .put_freight(FreightBuilder::new("ns", "earlier", "w").created_at(t - Duration::hours(1)).build());
    harness
        .store
        .put_freight(FreightBuilder::new("ns", "latest", "w").created_at(t).build());
    let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());

    harness.driver().reconcile(&stage.key()).await.unwrap();

    let promotions = harness.store.promotions("ns");
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].spec.freight, "latest");
}

#[tokio::test]
async fn test_unconfigured_verification_succeeds_without_run() {
    let harness = TestHarness::new();
    let stage = deployed_stage(&harness, StageBuilder::regular("ns", "test").health(HealthState::Healthy));

    harness.driver().reconcile(&stage.key()).await.unwrap();

    let stored = harness.store.stage(&stage.key()).unwrap();
    let history = &stored.status.current_freight().unwrap().verification_history;
    assert_eq!(history.len(), 1);
    let vi = history.current().unwrap();
    assert_eq!(vi.phase, VerificationPhase::Successful);
    assert!(vi.analysis_run.is_none());
    assert!(harness.analysis.runs().is_empty());
    assert_eq!(harness.analysis.call_count(StoreOp::CreateAnalysisRun), 0);
    assert_condition(&stored.status, ConditionType::Ready, ConditionStatus::True, "Verified");
}

#[tokio::test]
async fn test_unhealthy_stage_skips_verification() {
    let harness = TestHarness::new();
    with_smoke_template(&harness);
    let mut fc = FreightCollection::new([reference("f1", "w")]);
    fc.verification_history.update_or_push(VerificationInfo {
        id: "v1".into(),
        phase: VerificationPhase::Failed,
        ..Default::default()
    });
    let stage = StageBuilder::regular("ns", "test")
        .direct("w")
        .analysis_template("smoke")
        .deployed(fc)
        .health(HealthState::Unhealthy)
        .annotation(ANNOTATION_REVERIFY, &VerificationRequest::new("v1").to_annotation())
        .build();
    let mut status = stage.status.clone();

    reconcile_verification(&harness.ctx, &stage, &mut status).await.unwrap();

    assert_eq!(status, stage.status);
    assert!(harness.analysis.runs().is_empty());
}

#[tokio::test]
async fn test_abort_with_analysis_disabled() {
    let harness = TestHarness::with_config(ControllerConfig::default().with_analysis_enabled(false));
    let mut fc = FreightCollection::new([reference("f1", "w")]);
    fc.verification_history.update_or_push(VerificationInfo {
        id: "v1".into(),
        phase: VerificationPhase::Running,
        ..Default::default()
    });
    let stage = StageBuilder::regular("ns", "test")
        .direct("w")
        .analysis_template("smoke")
        .deployed(fc)
        .health(HealthState::Healthy)
        .annotation(ANNOTATION_ABORT, &VerificationRequest::new("v1").to_annotation())
        .build();
    let mut status = stage.status.clone();

    reconcile_verification(&harness.ctx, &stage, &mut status).await.unwrap();

    let vi = status.current_freight().unwrap().current_verification().unwrap();
    assert_eq!(vi.id, "v1");
    assert_eq!(vi.phase, VerificationPhase::Error);
    assert!(vi.message.contains("disabled"), "{}", vi.message);
}

#[tokio::test]
async fn test_first_successful_promotion() {
    let harness = TestHarness::new();
    let stage = StageBuilder::regular("ns", "test").direct("w").build();
    harness.store.put_promotion(
        PromotionBuilder::new("ns", "test", "f1")
            .named("test.01.f1")
            .phase(PromotionPhase::Succeeded)
            .freight_collection(FreightCollection::new([reference("f1", "w")]))
            .build(),
    );
    let mut status = stage.status.clone();

    let pending = sync_promotions(&harness.ctx, &stage, &mut status).await.unwrap();

    assert!(!pending);
    assert_eq!(status.freight_history.len(), 1);
    assert!(status.health.is_none());
    assert!(status.current_promotion.is_none());
    assert_condition(&status, ConditionType::Healthy, ConditionStatus::Unknown, "WaitingForHealthCheck");
    assert_condition(&status, ConditionType::Verified, ConditionStatus::Unknown, "WaitingForVerification");
}
