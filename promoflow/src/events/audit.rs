//! Audit events for Freight verification and Promotion milestones.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::EventSink;
use crate::core::{
    Freight, FreightReference, Promotion, Stage, Timestamp, VerificationInfo, VerificationPhase,
};

/// Why an audit event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditReason {
    /// Verification succeeded.
    FreightVerificationSucceeded,
    /// Verification failed.
    FreightVerificationFailed,
    /// Verification errored.
    FreightVerificationErrored,
    /// Verification was aborted.
    FreightVerificationAborted,
    /// Verification was inconclusive.
    FreightVerificationInconclusive,
    /// A Promotion was created automatically.
    PromotionCreated,
}

impl AuditReason {
    /// Maps a terminal verification phase to its reason.
    #[must_use]
    pub fn for_verification(phase: VerificationPhase) -> Option<Self> {
        match phase {
            VerificationPhase::Successful => Some(Self::FreightVerificationSucceeded),
            VerificationPhase::Failed => Some(Self::FreightVerificationFailed),
            VerificationPhase::Error => Some(Self::FreightVerificationErrored),
            VerificationPhase::Aborted => Some(Self::FreightVerificationAborted),
            VerificationPhase::Inconclusive => Some(Self::FreightVerificationInconclusive),
            VerificationPhase::Pending | VerificationPhase::Running => None,
        }
    }

    /// Returns the event type used when emitting.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FreightVerificationSucceeded => "freight.verification.succeeded",
            Self::FreightVerificationFailed => "freight.verification.failed",
            Self::FreightVerificationErrored => "freight.verification.errored",
            Self::FreightVerificationAborted => "freight.verification.aborted",
            Self::FreightVerificationInconclusive => "freight.verification.inconclusive",
            Self::PromotionCreated => "promotion.created",
        }
    }
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FreightVerificationSucceeded => "FreightVerificationSucceeded",
            Self::FreightVerificationFailed => "FreightVerificationFailed",
            Self::FreightVerificationErrored => "FreightVerificationErrored",
            Self::FreightVerificationAborted => "FreightVerificationAborted",
            Self::FreightVerificationInconclusive => "FreightVerificationInconclusive",
            Self::PromotionCreated => "PromotionCreated",
        };
        f.write_str(name)
    }
}

/// A structured audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Why the event was recorded.
    pub reason: AuditReason,
    /// Human-readable summary.
    pub message: String,
    /// Who caused the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Project (namespace) of the Stage.
    pub project: String,
    /// Stage name.
    pub stage: String,
    /// Freight name.
    pub freight_name: String,
    /// Freight alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight_alias: Option<String>,
    /// When the Freight was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freight_create_time: Option<Timestamp>,
    /// When verification started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_start_time: Option<Timestamp>,
    /// When verification finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_finish_time: Option<Timestamp>,
    /// Analysis run backing the verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_run: Option<String>,
    /// Promotion that was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

impl AuditEvent {
    fn base(reason: AuditReason, stage: &Stage, freight_name: &str) -> Self {
        Self {
            reason,
            message: String::new(),
            actor: None,
            project: stage.namespace().to_string(),
            stage: stage.name().to_string(),
            freight_name: freight_name.to_string(),
            freight_alias: None,
            freight_create_time: None,
            verification_start_time: None,
            verification_finish_time: None,
            analysis_run: None,
            promotion: None,
        }
    }

    fn with_freight(mut self, freight: Option<&Freight>) -> Self {
        if let Some(freight) = freight {
            self.freight_alias.clone_from(&freight.alias);
            self.freight_create_time = freight.metadata.creation_timestamp;
        }
        self
    }

    /// Returns the payload as JSON.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Builds audit events and hands them to a sink.
#[derive(Clone)]
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecorder").finish_non_exhaustive()
    }
}

impl EventRecorder {
    /// Creates a recorder writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Records the outcome of a verification for one member Freight.
    ///
    /// Non-terminal verifications are not recorded.
    pub async fn record_verification(
        &self,
        stage: &Stage,
        reference: &FreightReference,
        freight: Option<&Freight>,
        info: &VerificationInfo,
    ) {
        let Some(reason) = AuditReason::for_verification(info.phase) else {
            return;
        };
        let mut event = AuditEvent::base(reason, stage, &reference.name).with_freight(freight);
        event.actor.clone_from(&info.actor);
        event.verification_start_time = info.start_time;
        event.verification_finish_time = info.finish_time;
        event.analysis_run = info.analysis_run.as_ref().map(|r| r.name.clone());
        event.message = if info.message.is_empty() {
            format!("Freight verification {}", info.phase.to_string().to_lowercase())
        } else {
            info.message.clone()
        };
        self.sink.emit(event).await;
    }

    /// Records that a Promotion was created automatically.
    pub async fn record_promotion_created(&self, stage: &Stage, promotion: &Promotion, freight: &Freight) {
        let mut event =
            AuditEvent::base(AuditReason::PromotionCreated, stage, freight.name()).with_freight(Some(freight));
        event.actor = Some("promoflow".to_string());
        event.promotion = Some(promotion.name().to_string());
        event.message = format!(
            "Automatically promoted Freight for Stage {:?}",
            stage.name()
        );
        self.sink.emit(event).await;
    }
}
