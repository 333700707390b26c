//! Cleanup of a Stage that is being deleted.

use tracing::{debug, info, warn};

use super::ReconcileContext;
use crate::controller::retry::with_retry_if;
use crate::core::annotations::LABEL_STAGE;
use crate::core::{LabelSelector, Stage};
use crate::errors::{PromoflowError, StoreError};
use crate::ports::{FreightQuery, ResourceStore};

/// Removes every reference other resources hold to `stage`.
///
/// Verified and approved marks naming the Stage are cleared from Freight and
/// analysis runs labeled with the Stage are deleted. Each step runs even if
/// an earlier one failed; all failures are returned together.
pub async fn finalize_stage(ctx: &ReconcileContext, stage: &Stage) -> Result<(), PromoflowError> {
    let mut errors = Vec::new();
    if let Err(err) = clear_freight_marks(ctx, stage).await {
        errors.push(err);
    }
    if let Err(err) = delete_analysis_runs(ctx, stage).await {
        errors.push(err);
    }
    PromoflowError::aggregate(errors).map_or(Ok(()), Err)
}

async fn clear_freight_marks(ctx: &ReconcileContext, stage: &Stage) -> Result<(), PromoflowError> {
    let namespace = stage.namespace();
    let name = stage.name();

    let mut marked: Vec<String> = Vec::new();
    for query in [
        FreightQuery::VerifiedIn {
            origin: None,
            stage: name.to_string(),
        },
        FreightQuery::ApprovedFor {
            origin: None,
            stage: name.to_string(),
        },
    ] {
        for freight in ctx.store.list_freight(namespace, &query).await? {
            if !marked.contains(&freight.metadata.name) {
                marked.push(freight.metadata.name);
            }
        }
    }

    let store = ctx.store.as_ref();
    let mut errors = Vec::new();
    for freight in &marked {
        let result = with_retry_if(
            &ctx.config.status_patch_retry,
            freight,
            || unmark(store, namespace, freight, name),
            StoreError::is_conflict,
        )
        .await;
        if let Err(err) = result {
            warn!(stage = %stage.key(), freight = %freight, error = %err, "Failed to clear Freight marks");
            errors.push(PromoflowError::from(err));
        }
    }
    if !marked.is_empty() {
        debug!(stage = %stage.key(), count = marked.len(), "Cleared Freight marks");
    }
    PromoflowError::aggregate(errors).map_or(Ok(()), Err)
}

async fn unmark(store: &dyn ResourceStore, namespace: &str, name: &str, stage: &str) -> Result<(), StoreError> {
    let Some(mut freight) = store.get_freight(namespace, name).await? else {
        return Ok(());
    };
    let verified = freight.status.verified_in.remove(stage).is_some();
    let approved = freight.status.approved_for.remove(stage).is_some();
    if !verified && !approved {
        return Ok(());
    }
    match store.patch_freight_status(&freight).await {
        Err(err) if err.is_not_found() => Ok(()),
        other => other.map(|_| ()),
    }
}

async fn delete_analysis_runs(ctx: &ReconcileContext, stage: &Stage) -> Result<(), PromoflowError> {
    let Some(client) = ctx.analysis_client() else {
        return Ok(());
    };
    let selector = LabelSelector::from([(LABEL_STAGE.to_string(), stage.name().to_string())]);
    let deleted = client.delete_runs(stage.namespace(), &selector).await?;
    if deleted > 0 {
        info!(stage = %stage.key(), count = deleted, "Deleted AnalysisRuns");
    }
    Ok(())
}
