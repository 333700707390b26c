//! # Promoflow
//!
//! A Stage reconciliation engine for promoting Freight through delivery
//! pipelines.
//!
//! A Stage is a deployment target that requests Freight (a versioned bundle
//! of artifacts) from Warehouses or from upstream Stages. Promoflow keeps
//! the status of every Stage in line with the world around it:
//!
//! - **Promotions**: tracks in-flight and finished Promotions and the
//!   history of Freight deployed to the Stage
//! - **Health**: runs the health checks scheduled by the last Promotion
//! - **Verification**: starts, polls and aborts analysis runs for the
//!   deployed Freight and marks verified Freight for downstream Stages
//! - **Auto-promotion**: creates Promotions for newly available Freight when
//!   the project allows it
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use promoflow::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let ctx = ReconcileContext::new(store.clone(), health_checker, ControllerConfig::default());
//!
//! let controller = Arc::new(Controller::new(ctx));
//! controller.run(store.subscribe()).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod controller;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod ports;
pub mod reconciler;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ControllerConfig, LoggingConfig};
    pub use crate::controller::{Controller, ShutdownSignal, WatchEvent, WorkQueue};
    pub use crate::core::{
        Condition, ConditionStatus, ConditionType, Freight, FreightCollection, FreightOrigin,
        FreightRequest, Health, HealthState, ObjectKey, Promotion, PromotionPhase, Stage,
        StageKind, StageStatus, VerificationInfo, VerificationPhase,
    };
    pub use crate::errors::{ConfigError, PromoflowError, StoreError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::init_tracing;
    pub use crate::ports::{
        AnalysisClient, Clock, HealthChecker, InMemoryAnalysisClient, InMemoryStore,
        ResourceStore, SystemClock,
    };
    pub use crate::reconciler::{ReconcileContext, Requeue, StageDriver, StageReconciler};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_exposes_defaults() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(ObjectKey::new("ns", "test").to_string(), "ns/test");
    }
}
