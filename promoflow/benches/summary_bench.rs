//! Benchmarks for condition summarization.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use promoflow::core::{
    Condition, ConditionStatus, ConditionType, FreightCollection, HealthState, VerificationInfo,
    VerificationPhase,
};
use promoflow::errors::PromoflowError;
use promoflow::reconciler::summarize_conditions;
use promoflow::testing::{reference, StageBuilder};

fn summary_benchmark(c: &mut Criterion) {
    let now = Utc::now();
    let mut fc = FreightCollection::new([reference("f1", "w"), reference("f2", "charts")]);
    fc.verification_history.update_or_push(VerificationInfo {
        id: "v1".into(),
        phase: VerificationPhase::Successful,
        ..Default::default()
    });
    let mut stage = StageBuilder::regular("ns", "test")
        .direct("w")
        .direct("charts")
        .deployed(fc)
        .health(HealthState::Healthy)
        .build();
    for (type_, reason) in [(ConditionType::Healthy, "Healthy"), (ConditionType::Verified, "Verified")] {
        stage
            .status
            .conditions
            .set(Condition::new(type_, ConditionStatus::True, reason, ""), now);
    }

    c.bench_function("summarize_ready", |b| {
        b.iter(|| {
            let mut status = stage.status.clone();
            summarize_conditions(&stage, &mut status, None, now);
            black_box(status)
        });
    });

    let err = PromoflowError::Internal("store unavailable".into());
    c.bench_function("summarize_error", |b| {
        b.iter(|| {
            let mut status = stage.status.clone();
            summarize_conditions(&stage, &mut status, Some(&err), now);
            black_box(status)
        });
    });
}

criterion_group!(benches, summary_benchmark);
criterion_main!(benches);
