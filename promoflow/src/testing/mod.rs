//! Testing utilities for promoflow reconcilers.
//!
//! This module provides:
//! - Builders for Stages, Freight and Promotions
//! - A harness wiring in-memory collaborators into a [`ReconcileContext`]
//! - A configurable health checker
//! - Condition assertions
//!
//! [`ReconcileContext`]: crate::reconciler::ReconcileContext

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_condition, assert_no_condition};
pub use fixtures::{reference, FreightBuilder, PromotionBuilder, StageBuilder, TestHarness};
pub use mocks::StaticHealthChecker;
