//! Freight, Freight collections and the per-Stage Freight history.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use super::meta::{ObjectMeta, Timestamp};
use super::verification::{VerificationHistory, VerificationInfo};

/// Default number of FreightCollections a Stage remembers.
pub const DEFAULT_FREIGHT_HISTORY_LIMIT: usize = 10;

/// Kind of Freight source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum OriginKind {
    /// A Warehouse producing Freight.
    #[default]
    Warehouse,
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warehouse => write!(f, "Warehouse"),
        }
    }
}

/// Where a piece of Freight came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FreightOrigin {
    /// Kind of source.
    pub kind: OriginKind,
    /// Name of the source.
    pub name: String,
}

impl FreightOrigin {
    /// Creates a Warehouse origin.
    #[must_use]
    pub fn warehouse(name: impl Into<String>) -> Self {
        Self {
            kind: OriginKind::Warehouse,
            name: name.into(),
        }
    }
}

impl fmt::Display for FreightOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// A Git commit carried by Freight.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    /// Repository URL.
    pub repo_url: String,
    /// Commit id.
    pub id: String,
    /// Branch, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Tag, if tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// A container image carried by Freight.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Image repository.
    pub repo_url: String,
    /// Image tag.
    pub tag: String,
    /// Image digest.
    #[serde(default)]
    pub digest: String,
}

/// A Helm chart carried by Freight.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    /// Chart repository.
    pub repo_url: String,
    /// Chart name.
    pub name: String,
    /// Chart version.
    pub version: String,
}

/// Records that Freight was verified in a Stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedStage {
    /// When verification finished.
    #[serde(default)]
    pub verified_at: Option<Timestamp>,
}

/// Records that Freight was manually approved for a Stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedStage {
    /// When approval was granted.
    #[serde(default)]
    pub approved_at: Option<Timestamp>,
}

/// Observed state of Freight.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightStatus {
    /// Stages the Freight was verified in.
    #[serde(default)]
    pub verified_in: BTreeMap<String, VerifiedStage>,
    /// Stages the Freight was approved for.
    #[serde(default)]
    pub approved_for: BTreeMap<String, ApprovedStage>,
}

/// An immutable, content-addressed bundle of artifact references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Freight {
    /// Object metadata; the name is the content id.
    pub metadata: ObjectMeta,
    /// Human-friendly alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Source of the Freight.
    pub origin: FreightOrigin,
    /// Commits.
    #[serde(default)]
    pub commits: Vec<GitCommit>,
    /// Images.
    #[serde(default)]
    pub images: Vec<Image>,
    /// Charts.
    #[serde(default)]
    pub charts: Vec<Chart>,
    /// Observed state.
    #[serde(default)]
    pub status: FreightStatus,
}

impl Freight {
    /// Computes the content id from the origin and artifacts.
    ///
    /// Artifact order does not affect the id.
    #[must_use]
    pub fn generate_id(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.commits.iter().map(|c| format!("commit:{}:{}", c.repo_url, c.id)));
        parts.extend(
            self.images
                .iter()
                .map(|i| format!("image:{}:{}@{}", i.repo_url, i.tag, i.digest)),
        );
        parts.extend(
            self.charts
                .iter()
                .map(|c| format!("chart:{}/{}:{}", c.repo_url, c.name, c.version)),
        );
        parts.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.origin.to_string().as_bytes());
        for part in &parts {
            hasher.update(b"|");
            hasher.update(part.as_bytes());
        }
        hex::encode(&hasher.finalize()[..20])
    }

    /// Returns the Freight name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns true if the Freight was verified in the Stage.
    #[must_use]
    pub fn is_verified_in(&self, stage: &str) -> bool {
        self.status.verified_in.contains_key(stage)
    }

    /// Returns true if the Freight was approved for the Stage.
    #[must_use]
    pub fn is_approved_for(&self, stage: &str) -> bool {
        self.status.approved_for.contains_key(stage)
    }

    /// Builds the reference stored in a FreightCollection.
    #[must_use]
    pub fn to_reference(&self) -> FreightReference {
        FreightReference {
            name: self.metadata.name.clone(),
            origin: self.origin.clone(),
            commits: self.commits.clone(),
            images: self.images.clone(),
            charts: self.charts.clone(),
        }
    }
}

/// Snapshot of a Freight inside a FreightCollection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightReference {
    /// Freight name.
    pub name: String,
    /// Freight origin.
    pub origin: FreightOrigin,
    /// Commits.
    #[serde(default)]
    pub commits: Vec<GitCommit>,
    /// Images.
    #[serde(default)]
    pub images: Vec<Image>,
    /// Charts.
    #[serde(default)]
    pub charts: Vec<Chart>,
}

/// One Freight per requested origin, as deployed to a Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreightCollection {
    /// Deterministic id derived from the member Freight names.
    pub id: String,
    /// Members keyed by origin.
    #[serde(default)]
    pub freight: BTreeMap<String, FreightReference>,
    /// Verification attempts for this collection.
    #[serde(default)]
    pub verification_history: VerificationHistory,
}

impl FreightCollection {
    /// Builds a collection from Freight references.
    ///
    /// A later reference for the same origin replaces an earlier one.
    #[must_use]
    pub fn new(references: impl IntoIterator<Item = FreightReference>) -> Self {
        let mut collection = Self::default();
        for reference in references {
            collection.freight.insert(reference.origin.to_string(), reference);
        }
        collection.update_id();
        collection
    }

    /// Recomputes the id from the current members.
    pub fn update_id(&mut self) {
        let mut names: Vec<&str> = self.freight.values().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        let mut hasher = Sha256::new();
        hasher.update(names.join(",").as_bytes());
        self.id = hex::encode(&hasher.finalize()[..20]);
    }

    /// Returns the member for an origin.
    #[must_use]
    pub fn for_origin(&self, origin: &FreightOrigin) -> Option<&FreightReference> {
        self.freight.get(&origin.to_string())
    }

    /// Returns true if the named Freight is a member.
    #[must_use]
    pub fn references(&self, freight_name: &str) -> bool {
        self.freight.values().any(|f| f.name == freight_name)
    }

    /// Iterates members in origin order.
    pub fn references_iter(&self) -> impl Iterator<Item = &FreightReference> {
        self.freight.values()
    }

    /// Returns the most recent verification attempt.
    #[must_use]
    pub fn current_verification(&self) -> Option<&VerificationInfo> {
        self.verification_history.current()
    }
}

/// Newest-first stack of FreightCollections deployed to a Stage.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FreightHistory(Vec<FreightCollection>);

impl FreightHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a collection with the default bound.
    pub fn record(&mut self, collection: FreightCollection) {
        self.record_bounded(collection, DEFAULT_FREIGHT_HISTORY_LIMIT);
    }

    /// Pushes a collection and evicts the oldest entries beyond `limit`.
    pub fn record_bounded(&mut self, collection: FreightCollection, limit: usize) {
        self.0.insert(0, collection);
        self.0.truncate(limit.max(1));
    }

    /// Returns the collection currently deployed.
    #[must_use]
    pub fn current(&self) -> Option<&FreightCollection> {
        self.0.first()
    }

    /// Returns the collection currently deployed, mutably.
    pub fn current_mut(&mut self) -> Option<&mut FreightCollection> {
        self.0.first_mut()
    }

    /// Iterates collections newest first.
    pub fn iter(&self) -> impl Iterator<Item = &FreightCollection> {
        self.0.iter()
    }

    /// Returns the number of collections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was ever deployed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(name: &str, warehouse: &str) -> FreightReference {
        FreightReference {
            name: name.to_string(),
            origin: FreightOrigin::warehouse(warehouse),
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
        }
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(FreightOrigin::warehouse("w").to_string(), "Warehouse/w");
    }

    #[test]
    fn test_collection_id_is_order_independent() {
        let a = FreightCollection::new([reference("f1", "w1"), reference("f2", "w2")]);
        let b = FreightCollection::new([reference("f2", "w2"), reference("f1", "w1")]);
        assert_eq!(a.id, b.id);

        let c = FreightCollection::new([reference("f1", "w1"), reference("f3", "w2")]);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_collection_lookup() {
        let fc = FreightCollection::new([reference("f1", "w1")]);
        assert_eq!(fc.for_origin(&FreightOrigin::warehouse("w1")).unwrap().name, "f1");
        assert!(fc.for_origin(&FreightOrigin::warehouse("w2")).is_none());
        assert!(fc.references("f1"));
        assert!(!fc.references("f2"));
    }

    #[test]
    fn test_history_bound_evicts_oldest() {
        let mut history = FreightHistory::new();
        for i in 0..4 {
            history.record_bounded(FreightCollection::new([reference(&format!("f{i}"), "w")]), 3);
        }

        assert_eq!(history.len(), 3);
        let names: Vec<_> = history
            .iter()
            .map(|fc| fc.references_iter().next().unwrap().name.clone())
            .collect();
        assert_eq!(names, vec!["f3", "f2", "f1"]);
    }

    #[test]
    fn test_freight_id_ignores_artifact_order() {
        let mut freight = Freight {
            metadata: ObjectMeta::new("ns", "x"),
            alias: None,
            origin: FreightOrigin::warehouse("w"),
            commits: Vec::new(),
            images: vec![
                Image { repo_url: "a".into(), tag: "1".into(), digest: String::new() },
                Image { repo_url: "b".into(), tag: "2".into(), digest: String::new() },
            ],
            charts: Vec::new(),
            status: FreightStatus::default(),
        };
        let id = freight.generate_id();
        freight.images.reverse();
        assert_eq!(freight.generate_id(), id);
        assert_eq!(id.len(), 40);
    }
}
