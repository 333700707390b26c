//! Verification of the Freight currently deployed to a Stage.
//!
//! Each FreightCollection carries its own verification history. On every
//! pass the newest attempt is either polled, aborted, left alone, or a new
//! attempt is started, depending on its phase and the pending commands:
//!
//! | current attempt | command          | action                   |
//! |-----------------|------------------|--------------------------|
//! | non-terminal    | abort targets it | [`abort_verification`]   |
//! | non-terminal    | -                | [`get_verification_result`] |
//! | terminal        | reverify targets | start a new attempt      |
//! | terminal        | -                | nothing                  |
//! | none            | -                | start the first attempt  |
//!
//! New attempts wait for the Stage to be healthy. Stages without a
//! verification configuration verify immediately without an analysis run.

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ReconcileContext;
use crate::core::annotations::{
    abort_request, reverify_request, ANNOTATION_ACTOR, LABEL_FREIGHT_COLLECTION, LABEL_PROMOTION,
    LABEL_STAGE,
};
use crate::core::promotion::generate_child_name;
use crate::core::{
    AnalysisRun, AnalysisRunArgument, AnalysisRunReference, AnalysisRunSpec, Condition,
    ConditionStatus, ConditionType, FreightCollection, LabelSelector, ObjectMeta, OwnerReference,
    PromotionReference, Stage, StageStatus, Timestamp, VerificationInfo, VerificationPhase,
    VerificationRequest,
};
use crate::errors::PromoflowError;

/// Message recorded on aborted verifications.
pub const ABORTED_MESSAGE: &str = "Verification aborted by user";

/// Drives verification of the Stage's current FreightCollection and
/// derives the `Verified` condition.
pub async fn reconcile_verification(
    ctx: &ReconcileContext,
    stage: &Stage,
    status: &mut StageStatus,
) -> Result<(), PromoflowError> {
    let now = ctx.clock.now();
    let generation = stage.metadata.generation;

    let Some(fc) = status.current_freight().cloned() else {
        status.conditions.set(
            Condition::new(
                ConditionType::Verified,
                ConditionStatus::Unknown,
                "NoFreight",
                "No Freight is deployed to this Stage",
            )
            .with_generation(generation),
            now,
        );
        return Ok(());
    };

    if status.current_promotion.is_some() {
        debug!(stage = %stage.key(), "Promotion in flight; skipping verification");
        return Ok(());
    }

    let current = fc.current_verification().cloned();
    let reverify = reverify_request(&stage.metadata);

    let outcome = match &current {
        Some(vi) if !vi.is_terminal() => match abort_request(&stage.metadata).filter(|r| r.targets(&vi.id)) {
            Some(request) => Some(abort_verification(ctx, stage, vi, &request).await?),
            None => Some(get_verification_result(ctx, stage, vi).await?),
        },
        Some(vi) if !reverify.as_ref().is_some_and(|r| r.targets(&vi.id)) => None,
        _ => {
            if !status.health_state().is_some_and(|h| h.permits_verification()) {
                debug!(stage = %stage.key(), "Waiting for the Stage to become healthy before verifying");
                return Ok(());
            }
            let request = current.as_ref().and(reverify.as_ref());
            if stage.spec.verification.is_none() {
                Some(VerificationInfo {
                    id: Uuid::new_v4().to_string(),
                    actor: request.and_then(|r| r.actor.clone()),
                    start_time: Some(now),
                    finish_time: Some(now),
                    phase: VerificationPhase::Successful,
                    analysis_run: None,
                    message: String::new(),
                })
            } else {
                Some(
                    start_verification(ctx, stage, &fc, status.last_promotion.as_ref(), request)
                        .await?,
                )
            }
        }
    };

    if let Some(vi) = outcome {
        let newly_terminal = vi.is_terminal()
            && current
                .as_ref()
                .map_or(true, |c| c.id != vi.id || !c.is_terminal());
        if let Some(deployed) = status.freight_history.current_mut() {
            deployed.verification_history.update_or_push(vi.clone());
        }
        if newly_terminal {
            info!(
                stage = %stage.key(),
                freight_collection = %fc.id,
                verification = %vi.id,
                phase = %vi.phase,
                "Verification finished"
            );
            record_events(ctx, stage, &fc, &vi).await;
        }
    }

    if let Some(condition) = status.current_freight().and_then(verified_condition) {
        status.conditions.set(condition.with_generation(generation), now);
    }
    Ok(())
}

/// Derives the `Verified` condition from a collection's history.
fn verified_condition(fc: &FreightCollection) -> Option<Condition> {
    if fc.verification_history.any_successful() {
        return Some(Condition::new(
            ConditionType::Verified,
            ConditionStatus::True,
            "Verified",
            "Freight has been verified",
        ));
    }
    let vi = fc.current_verification()?;
    let status = match vi.phase {
        VerificationPhase::Successful => ConditionStatus::True,
        VerificationPhase::Failed | VerificationPhase::Error | VerificationPhase::Aborted => {
            ConditionStatus::False
        }
        VerificationPhase::Pending | VerificationPhase::Running | VerificationPhase::Inconclusive => {
            ConditionStatus::Unknown
        }
    };
    Some(Condition::new(ConditionType::Verified, status, vi.phase.to_string(), vi.message.clone()))
}

fn disabled_message(action: &str) -> String {
    format!("Analysis integration is disabled on this controller; cannot {action} verification")
}

fn finished(vi: &VerificationInfo, phase: VerificationPhase, message: impl Into<String>, now: Timestamp) -> VerificationInfo {
    VerificationInfo {
        phase,
        message: message.into(),
        finish_time: Some(now),
        ..vi.clone()
    }
}

fn errored(id: String, actor: Option<String>, now: Timestamp, message: String) -> VerificationInfo {
    VerificationInfo {
        id,
        actor,
        start_time: Some(now),
        finish_time: Some(now),
        phase: VerificationPhase::Error,
        analysis_run: None,
        message,
    }
}

fn run_selector(stage: &Stage, fc_id: &str) -> LabelSelector {
    LabelSelector::from([
        (LABEL_STAGE.to_string(), stage.name().to_string()),
        (LABEL_FREIGHT_COLLECTION.to_string(), fc_id.to_string()),
    ])
}

fn info_from_run(id: String, actor: Option<String>, run: &AnalysisRun, now: Timestamp) -> VerificationInfo {
    let phase = VerificationPhase::from(run.phase());
    VerificationInfo {
        id,
        actor,
        start_time: run.status.started_at.or(Some(now)),
        finish_time: phase
            .is_terminal()
            .then(|| run.status.completed_at.unwrap_or(now)),
        phase,
        analysis_run: Some(AnalysisRunReference {
            name: run.name().to_string(),
            namespace: run.metadata.namespace.clone(),
            phase: run.phase().to_string(),
        }),
        message: run.status.message.clone(),
    }
}

/// Starts a verification attempt for `fc`.
///
/// Unless this is a reverify, an existing run for the Stage and collection
/// is adopted instead of submitting another one. Failures to submit are
/// recorded as an `Error` attempt rather than returned.
pub async fn start_verification(
    ctx: &ReconcileContext,
    stage: &Stage,
    fc: &FreightCollection,
    last_promotion: Option<&PromotionReference>,
    request: Option<&VerificationRequest>,
) -> Result<VerificationInfo, PromoflowError> {
    let now = ctx.clock.now();
    let id = Uuid::new_v4().to_string();
    let actor = request.and_then(|r| r.actor.clone());
    let Some(client) = ctx.analysis_client() else {
        return Ok(errored(id, actor, now, disabled_message("start")));
    };

    if request.is_none() {
        let existing = client
            .list_runs(stage.namespace(), &run_selector(stage, &fc.id))
            .await?;
        if let Some(run) = existing.into_iter().max_by(|a, b| a.name().cmp(b.name())) {
            info!(stage = %stage.key(), analysis_run = run.name(), "Adopting existing AnalysisRun");
            return Ok(info_from_run(id, actor, &run, now));
        }
    }

    let run = match build_analysis_run(ctx, stage, fc, last_promotion, request).await {
        Ok(run) => run,
        Err(err) if err.is_not_found() => {
            warn!(stage = %stage.key(), error = %err, "Cannot build AnalysisRun");
            return Ok(errored(id, actor, now, format!("Failed to build AnalysisRun: {err}")));
        }
        Err(err) => return Err(err),
    };

    match client.create_run(&run).await {
        Ok(created) => {
            info!(stage = %stage.key(), analysis_run = created.name(), "Started verification");
            Ok(info_from_run(id, actor, &created, now))
        }
        Err(err) => {
            warn!(stage = %stage.key(), error = %err, "Failed to create AnalysisRun");
            Ok(errored(id, actor, now, format!("Failed to create AnalysisRun: {err}")))
        }
    }
}

fn set_arg(args: &mut Vec<AnalysisRunArgument>, arg: AnalysisRunArgument) {
    match args.iter_mut().find(|a| a.name == arg.name) {
        Some(existing) => existing.value = arg.value,
        None => args.push(arg),
    }
}

async fn build_analysis_run(
    ctx: &ReconcileContext,
    stage: &Stage,
    fc: &FreightCollection,
    last_promotion: Option<&PromotionReference>,
    request: Option<&VerificationRequest>,
) -> Result<AnalysisRun, PromoflowError> {
    let namespace = stage.namespace();
    let spec = stage
        .spec
        .verification
        .as_ref()
        .ok_or_else(|| PromoflowError::Internal("Stage has no verification configuration".into()))?;

    let mut metrics = Vec::new();
    let mut args = Vec::new();
    for reference in &spec.analysis_templates {
        let template = ctx
            .store
            .get_analysis_template(namespace, &reference.name)
            .await?
            .ok_or_else(|| PromoflowError::not_found("AnalysisTemplate", namespace, &reference.name))?;
        metrics.extend(template.spec.metrics);
        for arg in template.spec.args {
            set_arg(&mut args, arg);
        }
    }
    for arg in &spec.args {
        set_arg(&mut args, arg.clone());
    }

    let mut metadata = ObjectMeta::new(namespace, generate_child_name(stage.name(), &fc.id));
    if let Some(extra) = &spec.analysis_run_metadata {
        metadata.labels.clone_from(&extra.labels);
        metadata.annotations.clone_from(&extra.annotations);
    }
    metadata.labels.insert(LABEL_STAGE.to_string(), stage.name().to_string());
    metadata.labels.insert(LABEL_FREIGHT_COLLECTION.to_string(), fc.id.clone());

    // Runs are attributed to the Promotion only when no person asked for them.
    let attributed = request.map_or(true, |r| r.control_plane && r.actor.is_none());
    if let Some(last) = last_promotion.filter(|_| attributed) {
        metadata.labels.insert(LABEL_PROMOTION.to_string(), last.name.clone());
    }
    if let Some(actor) = request.and_then(|r| r.actor.as_ref()) {
        metadata.annotations.insert(ANNOTATION_ACTOR.to_string(), actor.clone());
    }

    for member in fc.references_iter() {
        match ctx.store.get_freight(namespace, &member.name).await {
            Ok(Some(freight)) => metadata.owner_references.push(OwnerReference {
                kind: "Freight".to_string(),
                name: freight.metadata.name,
                uid: freight.metadata.uid,
            }),
            Ok(None) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok(AnalysisRun {
        metadata,
        spec: AnalysisRunSpec {
            metrics,
            args,
            terminate: false,
        },
        status: Default::default(),
    })
}

/// Polls the analysis run backing `vi` and translates its phase.
///
/// A run that no longer exists ends the attempt with an `Error`.
pub async fn get_verification_result(
    ctx: &ReconcileContext,
    stage: &Stage,
    vi: &VerificationInfo,
) -> Result<VerificationInfo, PromoflowError> {
    let now = ctx.clock.now();
    let Some(client) = ctx.analysis_client() else {
        return Ok(finished(vi, VerificationPhase::Error, disabled_message("poll"), now));
    };
    let Some(run_ref) = vi.analysis_run.as_ref() else {
        return Ok(finished(
            vi,
            VerificationPhase::Error,
            "Verification has no AnalysisRun to poll",
            now,
        ));
    };

    let run = match client.get_run(&run_ref.namespace, &run_ref.name).await {
        Ok(run) => run,
        Err(err) if err.is_not_found() => None,
        Err(err) => return Err(err.into()),
    };
    let Some(run) = run else {
        return Ok(finished(
            vi,
            VerificationPhase::Error,
            format!("AnalysisRun {:?} not found", run_ref.name),
            now,
        ));
    };
    debug!(stage = %stage.key(), analysis_run = run.name(), phase = %run.phase(), "Polled AnalysisRun");

    let mut updated = vi.clone();
    updated.phase = run.phase().into();
    updated.message.clone_from(&run.status.message);
    if let Some(reference) = updated.analysis_run.as_mut() {
        reference.phase = run.phase().to_string();
    }
    if updated.phase.is_terminal() {
        updated.finish_time = Some(run.status.completed_at.unwrap_or(now));
    }
    Ok(updated)
}

/// Aborts the attempt `vi`.
///
/// Termination is requested from the engine, but the attempt is always
/// recorded as `Failed`: the engine reports terminated runs as successful.
pub async fn abort_verification(
    ctx: &ReconcileContext,
    stage: &Stage,
    vi: &VerificationInfo,
    request: &VerificationRequest,
) -> Result<VerificationInfo, PromoflowError> {
    let now = ctx.clock.now();
    let Some(client) = ctx.analysis_client() else {
        return Ok(finished(vi, VerificationPhase::Error, disabled_message("abort"), now));
    };

    if let Some(run_ref) = vi.analysis_run.as_ref() {
        match client.terminate_run(&run_ref.namespace, &run_ref.name).await {
            Ok(()) => info!(stage = %stage.key(), analysis_run = %run_ref.name, "Terminated AnalysisRun"),
            Err(err) if err.is_not_found() => {
                debug!(stage = %stage.key(), analysis_run = %run_ref.name, "AnalysisRun already gone");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let mut aborted = finished(vi, VerificationPhase::Failed, ABORTED_MESSAGE, now);
    if request.actor.is_some() {
        aborted.actor.clone_from(&request.actor);
    }
    Ok(aborted)
}

/// Emits one event per member Freight.
async fn record_events(ctx: &ReconcileContext, stage: &Stage, fc: &FreightCollection, vi: &VerificationInfo) {
    for member in fc.references_iter() {
        let freight = match ctx.store.get_freight(stage.namespace(), &member.name).await {
            Ok(freight) => freight,
            Err(err) => {
                debug!(freight = %member.name, error = %err, "Recording event without Freight details");
                None
            }
        };
        ctx.recorder
            .record_verification(stage, member, freight.as_ref(), vi)
            .await;
    }
}
