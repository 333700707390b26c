//! Test doubles for injected collaborators.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{Health, HealthCheckStep, HealthState, Stage};
use crate::ports::HealthChecker;

/// A health checker reporting a fixed, adjustable state.
#[derive(Debug)]
pub struct StaticHealthChecker {
    state: Mutex<HealthState>,
    calls: AtomicUsize,
}

impl StaticHealthChecker {
    /// Creates a checker reporting `state`.
    #[must_use]
    pub fn new(state: HealthState) -> Self {
        Self {
            state: Mutex::new(state),
            calls: AtomicUsize::new(0),
        }
    }

    /// Creates a checker reporting `Healthy`.
    #[must_use]
    pub fn healthy() -> Self {
        Self::new(HealthState::Healthy)
    }

    /// Changes the reported state.
    pub fn set(&self, state: HealthState) {
        *self.state.lock() = state;
    }

    /// Returns how often checks were run.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticHealthChecker {
    fn default() -> Self {
        Self::healthy()
    }
}

#[async_trait]
impl HealthChecker for StaticHealthChecker {
    async fn check(&self, _stage: &Stage, steps: &[HealthCheckStep]) -> Health {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let state = *self.state.lock();
        let health = Health::new(state);
        match state {
            HealthState::Unhealthy => health.with_issue(format!("{} health checks failed", steps.len())),
            _ => health,
        }
    }
}
