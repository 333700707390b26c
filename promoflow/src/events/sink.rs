//! Destinations for audit events.
//!
//! Reconcilers never block on event delivery: a sink that cannot deliver
//! logs the problem and drops the event.

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

use super::audit::{AuditEvent, AuditReason};

/// Receives audit events about Freight and Promotions.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers `event`.
    async fn emit(&self, event: AuditEvent);

    /// Delivers `event` from synchronous code. Failures are logged, never
    /// returned.
    fn try_emit(&self, event: AuditEvent);
}

/// Drops every event. Used when no audit trail is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: AuditEvent) {}

    fn try_emit(&self, _event: AuditEvent) {}
}

/// Writes events to the controller log.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl LoggingEventSink {
    /// Logs at `level`. Anything more verbose than `INFO` logs at `DEBUG`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at `DEBUG`.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn write(&self, event: &AuditEvent) {
        let kind = event.reason.event_type();
        if self.level > Level::INFO {
            debug!(event_type = kind, project = %event.project, stage = %event.stage,
                freight = %event.freight_name, actor = ?event.actor, "{}", event.message);
        } else {
            info!(event_type = kind, project = %event.project, stage = %event.stage,
                freight = %event.freight_name, actor = ?event.actor, "{}", event.message);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: AuditEvent) {
        self.write(&event);
    }

    fn try_emit(&self, event: AuditEvent) {
        self.write(&event);
    }
}

/// Keeps events in memory so tests can inspect them.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl CollectingEventSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Number of events received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// True until the first event arrives.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every event received.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Events recorded with `reason`.
    #[must_use]
    pub fn events_with_reason(&self, reason: AuditReason) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.reason == reason)
            .cloned()
            .collect()
    }

    fn push(&self, event: AuditEvent) {
        self.events.write().push(event);
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: AuditEvent) {
        self.push(event);
    }

    fn try_emit(&self, event: AuditEvent) {
        self.push(event);
    }
}
