//! Marking Freight verified in a Stage so downstream Stages may take it.

use tracing::{debug, info, warn};

use super::ReconcileContext;
use crate::controller::retry::with_retry_if;
use crate::core::{HealthState, Stage, StageStatus, Timestamp, VerificationPhase, VerifiedStage};
use crate::errors::{PromoflowError, StoreError};
use crate::ports::ResourceStore;

/// Marks the members of the current FreightCollection verified in the
/// Stage once the Stage is healthy and the latest verification succeeded.
///
/// Only `Healthy` counts; a Stage whose health is `NotApplicable` never
/// marks Freight.
pub async fn mark_freight_verified(
    ctx: &ReconcileContext,
    stage: &Stage,
    status: &StageStatus,
) -> Result<(), PromoflowError> {
    if status.health_state() != Some(HealthState::Healthy) {
        return Ok(());
    }
    let Some(fc) = status.current_freight() else {
        return Ok(());
    };
    let Some(vi) = fc
        .current_verification()
        .filter(|vi| vi.phase == VerificationPhase::Successful)
    else {
        return Ok(());
    };
    let Some(verified_at) = vi.finish_time.or(vi.start_time) else {
        return Ok(());
    };

    let names: Vec<&str> = fc.references_iter().map(|r| r.name.as_str()).collect();
    mark_verified_in(ctx, stage.namespace(), stage.name(), &names, verified_at).await
}

/// Adds `stage` to the verified set of every named Freight that is not
/// already marked.
///
/// Each item is retried on conflict. Failures do not stop the batch; they
/// are counted into a single [`PromoflowError::PartialFailure`].
pub(crate) async fn mark_verified_in(
    ctx: &ReconcileContext,
    namespace: &str,
    stage: &str,
    names: &[&str],
    verified_at: Timestamp,
) -> Result<(), PromoflowError> {
    let store = ctx.store.as_ref();
    let mut failed = 0;
    for name in names {
        let key = format!("{namespace}/{name}");
        let result = with_retry_if(
            &ctx.config.status_patch_retry,
            &key,
            || mark_one(store, namespace, name, stage, verified_at),
            StoreError::is_retryable,
        )
        .await;
        match result {
            Ok(true) => info!(freight = %name, stage, "Marked Freight verified"),
            Ok(false) => debug!(freight = %name, stage, "Freight already verified"),
            Err(err) => {
                warn!(freight = %name, stage, error = %err, "Failed to mark Freight verified");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(PromoflowError::PartialFailure {
            action: "mark Freight verified".to_string(),
            failed,
            total: names.len(),
        });
    }
    Ok(())
}

async fn mark_one(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
    stage: &str,
    verified_at: Timestamp,
) -> Result<bool, StoreError> {
    let mut freight = store
        .get_freight(namespace, name)
        .await?
        .ok_or_else(|| StoreError::not_found("Freight", format!("{namespace}/{name}")))?;
    if freight.is_verified_in(stage) {
        return Ok(false);
    }
    freight.status.verified_in.insert(
        stage.to_string(),
        VerifiedStage {
            verified_at: Some(verified_at),
        },
    );
    store.patch_freight_status(&freight).await?;
    Ok(true)
}
