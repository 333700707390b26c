//! Condition summarization.
//!
//! Folds the phase-level conditions into `Ready` and `Reconciling` and
//! derives the legacy phase and Freight summary. Pure: the same inputs
//! always produce the same status.

use crate::core::{
    Condition, ConditionStatus, ConditionType, HealthState, Stage, StagePhase, StageStatus,
    Timestamp, VerificationPhase,
};
use crate::errors::PromoflowError;

/// Reason set on `Ready` when a phase failed.
pub const REASON_RECONCILE_ERROR: &str = "ReconcileError";
/// Reason set on `Reconciling` when a phase failed.
pub const REASON_RETRY_AFTER_ERROR: &str = "RetryAfterError";

/// Summarizes `status` for `stage`. `error` is the failure of the phase that
/// just ran, if any.
pub fn summarize_conditions(
    stage: &Stage,
    status: &mut StageStatus,
    error: Option<&PromoflowError>,
    now: Timestamp,
) {
    let generation = stage.metadata.generation;
    let ready = |status: ConditionStatus, reason: &str, message: &str| {
        Condition::new(ConditionType::Ready, status, reason, message).with_generation(generation)
    };

    if let Some(err) = error {
        status
            .conditions
            .set(ready(ConditionStatus::False, REASON_RECONCILE_ERROR, &err.to_string()), now);
        let message = match err {
            PromoflowError::Phase { phase, .. } => format!("Retrying after error reconciling {phase}"),
            PromoflowError::StatusPatch { .. } => "Retrying after error updating status".to_string(),
            _ => "Retrying after error".to_string(),
        };
        status.conditions.set(
            Condition::new(
                ConditionType::Reconciling,
                ConditionStatus::True,
                REASON_RETRY_AFTER_ERROR,
                message,
            )
            .with_generation(generation),
            now,
        );
    } else {
        status.conditions.delete(ConditionType::Reconciling);
        let condition = readiness(status).unwrap_or_else(|| {
            status.observed_generation = generation;
            let verified = status.conditions.get(ConditionType::Verified);
            ready(
                ConditionStatus::True,
                verified.map_or("Verified", |c| c.reason.as_str()),
                verified.map_or("", |c| c.message.as_str()),
            )
        });
        status.conditions.set(condition.with_generation(generation), now);
    }

    status.phase = legacy_phase(status);
    status.freight_summary = freight_summary(stage, status);
}

/// Returns the `Ready=False` condition blocking readiness, if any.
fn readiness(status: &StageStatus) -> Option<Condition> {
    let not_ready = |reason: &str, message: &str| {
        Condition::new(ConditionType::Ready, ConditionStatus::False, reason, message)
    };

    if let Some(promoting) = status.conditions.get(ConditionType::Promoting).filter(|c| c.is_true()) {
        return Some(not_ready(&promoting.reason, &promoting.message));
    }

    if let Some(last) = status.last_promotion.as_ref().filter(|p| p.is_terminal() && !p.succeeded()) {
        let phase = last.phase().map(|p| p.to_string()).unwrap_or_default();
        return Some(not_ready(
            &format!("LastPromotion{phase}"),
            &format!("Last Promotion {:?} finished with phase {phase}", last.name),
        ));
    }

    match status.conditions.get(ConditionType::Healthy) {
        Some(healthy) if !healthy.is_true() => {
            return Some(not_ready(or_default(&healthy.reason, "Unhealthy"), &healthy.message));
        }
        None if status.health_state() != Some(HealthState::NotApplicable) => {
            return Some(not_ready("Unhealthy", "Stage health has not been assessed"));
        }
        _ => {}
    }

    match status.conditions.get(ConditionType::Verified) {
        Some(verified) if verified.is_true() => None,
        Some(verified) => Some(not_ready(
            or_default(&verified.reason, "PendingVerification"),
            &verified.message,
        )),
        None => Some(not_ready("PendingVerification", "Stage has not been verified")),
    }
}

fn or_default<'a>(reason: &'a str, default: &'a str) -> &'a str {
    if reason.is_empty() {
        default
    } else {
        reason
    }
}

fn legacy_phase(status: &StageStatus) -> StagePhase {
    if status.current_promotion.is_some() {
        return StagePhase::Promoting;
    }
    if status
        .last_promotion
        .as_ref()
        .is_some_and(|p| p.is_terminal() && !p.succeeded())
    {
        return StagePhase::Failed;
    }
    match status.current_freight().and_then(|fc| fc.current_verification()) {
        Some(vi) if !vi.is_terminal() => StagePhase::Verifying,
        Some(vi)
            if matches!(
                vi.phase,
                VerificationPhase::Failed | VerificationPhase::Error | VerificationPhase::Aborted
            ) =>
        {
            StagePhase::Failed
        }
        _ => StagePhase::Steady,
    }
}

fn freight_summary(stage: &Stage, status: &StageStatus) -> String {
    let requested = &stage.spec.requested_freight;
    let current = status.current_freight();
    let fulfilled: Vec<&str> = requested
        .iter()
        .filter_map(|r| current.and_then(|fc| fc.for_origin(&r.origin)))
        .map(|f| f.name.as_str())
        .collect();

    if requested.len() == 1 && fulfilled.len() == 1 {
        return fulfilled[0].to_string();
    }
    format!("{}/{} Fulfilled", fulfilled.len(), requested.len())
}
