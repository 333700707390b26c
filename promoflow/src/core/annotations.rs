//! Well-known labels, annotations and the annotation command protocol.
//!
//! Users drive a Stage out-of-band by writing annotations: `refresh` asks for
//! a new pass, `reverify` and `abort` target a verification attempt by id.
//! Malformed commands are ignored.

use serde::{Deserialize, Serialize};

use super::meta::ObjectMeta;

/// Annotation requesting a reconciliation pass.
pub const ANNOTATION_REFRESH: &str = "promoflow.io/refresh";
/// Annotation requesting a new verification attempt.
pub const ANNOTATION_REVERIFY: &str = "promoflow.io/reverify";
/// Annotation requesting that a verification attempt be aborted.
pub const ANNOTATION_ABORT: &str = "promoflow.io/abort";
/// Annotation recording who started an analysis run.
pub const ANNOTATION_ACTOR: &str = "promoflow.io/actor";

/// Label naming the Stage an object belongs to.
pub const LABEL_STAGE: &str = "promoflow.io/stage";
/// Label naming the FreightCollection an analysis run verifies.
pub const LABEL_FREIGHT_COLLECTION: &str = "promoflow.io/freight-collection";
/// Label naming the Promotion that triggered an analysis run.
pub const LABEL_PROMOTION: &str = "promoflow.io/promotion";

/// Finalizer guarding Stage cleanup.
pub const FINALIZER: &str = "promoflow.io/finalizer";

/// All annotations that act as commands.
pub const COMMAND_ANNOTATIONS: [&str; 3] = [ANNOTATION_REFRESH, ANNOTATION_REVERIFY, ANNOTATION_ABORT];

/// A reverify or abort command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    /// Id of the targeted verification attempt.
    #[serde(default)]
    pub id: String,
    /// Who issued the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// True if the command came from the control plane rather than a user.
    #[serde(default)]
    pub control_plane: bool,
}

impl VerificationRequest {
    /// Creates a request targeting an attempt.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the actor.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Marks the request as issued by the control plane.
    #[must_use]
    pub fn from_control_plane(mut self) -> Self {
        self.control_plane = true;
        self
    }

    /// Parses an annotation value.
    ///
    /// JSON objects must carry a non-empty id. Any other non-empty value is
    /// taken as a bare id.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.starts_with('{') {
            let request: Self = serde_json::from_str(value).ok()?;
            return (!request.id.is_empty()).then_some(request);
        }
        Some(Self::new(value))
    }

    /// Returns true if the request targets the attempt.
    #[must_use]
    pub fn targets(&self, id: &str) -> bool {
        self.id == id
    }

    /// Renders the request as an annotation value.
    #[must_use]
    pub fn to_annotation(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.id.clone())
    }
}

/// Returns the refresh token, if any.
#[must_use]
pub fn refresh_token(meta: &ObjectMeta) -> Option<&str> {
    meta.annotation(ANNOTATION_REFRESH).filter(|v| !v.is_empty())
}

/// Returns the pending reverify command, if well-formed.
#[must_use]
pub fn reverify_request(meta: &ObjectMeta) -> Option<VerificationRequest> {
    meta.annotation(ANNOTATION_REVERIFY).and_then(VerificationRequest::parse)
}

/// Returns the pending abort command, if well-formed.
#[must_use]
pub fn abort_request(meta: &ObjectMeta) -> Option<VerificationRequest> {
    meta.annotation(ANNOTATION_ABORT).and_then(VerificationRequest::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_command() {
        let request =
            VerificationRequest::parse(r#"{"id":"abc","actor":"alice","controlPlane":true}"#).unwrap();
        assert_eq!(request.id, "abc");
        assert_eq!(request.actor.as_deref(), Some("alice"));
        assert!(request.control_plane);
    }

    #[test]
    fn test_parse_bare_token() {
        assert_eq!(VerificationRequest::parse(" abc ").unwrap(), VerificationRequest::new("abc"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(VerificationRequest::parse("").is_none());
        assert!(VerificationRequest::parse("{not json").is_none());
        assert!(VerificationRequest::parse(r#"{"actor":"alice"}"#).is_none());
        assert!(VerificationRequest::parse(r#"{"id":""}"#).is_none());
    }

    #[test]
    fn test_annotation_round_trip() {
        let request = VerificationRequest::new("abc").with_actor("bob");
        let mut meta = ObjectMeta::new("ns", "test");
        meta.annotations.insert(ANNOTATION_ABORT.into(), request.to_annotation());

        assert_eq!(abort_request(&meta), Some(request));
        assert!(reverify_request(&meta).is_none());
        assert!(refresh_token(&meta).is_none());
    }
}
