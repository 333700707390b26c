//! Freight a Stage may be promoted to.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::core::{Freight, FreightRequest, Stage, Timestamp};
use crate::errors::PromoflowError;
use crate::ports::{FreightQuery, ResourceStore};

/// Returns the Freight of `request`'s origin that `stage` may take, newest
/// first.
///
/// Freight qualifies when it comes straight from the origin and the request
/// allows that, when it was verified in one of the upstream Stages for at
/// least the required soak time, or when it was approved for the Stage.
pub async fn available_freight(
    store: &dyn ResourceStore,
    stage: &Stage,
    request: &FreightRequest,
    now: Timestamp,
) -> Result<Vec<Freight>, PromoflowError> {
    let namespace = stage.namespace();
    let origin = &request.origin;
    let mut eligible: BTreeMap<String, Freight> = BTreeMap::new();
    let mut add = |freight: Freight| {
        eligible.entry(freight.metadata.name.clone()).or_insert(freight);
    };

    if request.sources.direct {
        for freight in store
            .list_freight(namespace, &FreightQuery::ByOrigin(origin.clone()))
            .await?
        {
            add(freight);
        }
    }

    for upstream in &request.sources.stages {
        let query = FreightQuery::VerifiedIn {
            origin: Some(origin.clone()),
            stage: upstream.clone(),
        };
        for freight in store.list_freight(namespace, &query).await? {
            if soaked(&freight, upstream, request.sources.required_soak_time_secs, now) {
                add(freight);
            }
        }
    }

    let approved = FreightQuery::ApprovedFor {
        origin: Some(origin.clone()),
        stage: stage.name().to_string(),
    };
    for freight in store.list_freight(namespace, &approved).await? {
        add(freight);
    }

    let mut freight: Vec<Freight> = eligible.into_values().collect();
    freight.sort_by(|a, b| {
        b.metadata
            .creation_timestamp
            .cmp(&a.metadata.creation_timestamp)
            .then_with(|| b.metadata.name.cmp(&a.metadata.name))
    });
    Ok(freight)
}

fn soaked(freight: &Freight, upstream: &str, soak_secs: Option<u64>, now: Timestamp) -> bool {
    let Some(secs) = soak_secs.filter(|s| *s > 0) else {
        return true;
    };
    let soak = Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
    freight
        .status
        .verified_in
        .get(upstream)
        .and_then(|v| v.verified_at)
        .is_some_and(|at| at + soak <= now)
}
