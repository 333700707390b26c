//! Audit events.
//!
//! The reconciler reports Freight verification outcomes and automatic
//! Promotions through an [`EventRecorder`] writing to an [`EventSink`].

mod audit;
mod sink;

pub use audit::{AuditEvent, AuditReason, EventRecorder};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
