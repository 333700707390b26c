//! Typed status conditions.
//!
//! A Stage summarizes its state through a handful of conditions keyed by
//! type. The set keeps insertion order; `set` replaces an entry in place and
//! `delete` removes one without disturbing the others.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::meta::Timestamp;

/// Condition types reported on a Stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Overall readiness.
    Ready,
    /// A Promotion is in flight.
    Promoting,
    /// Post-promotion health.
    Healthy,
    /// Verification of the current Freight.
    Verified,
    /// The last pass failed and will be retried.
    Reconciling,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "Ready"),
            Self::Promoting => write!(f, "Promoting"),
            Self::Healthy => write!(f, "Healthy"),
            Self::Verified => write!(f, "Verified"),
            Self::Reconciling => write!(f, "Reconciling"),
        }
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// Not known yet.
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A single typed condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// The condition type.
    #[serde(rename = "type")]
    pub type_: ConditionType,
    /// The condition status.
    pub status: ConditionStatus,
    /// CamelCase machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Stage generation the condition was computed for.
    #[serde(default)]
    pub observed_generation: i64,
    /// When `status` last changed.
    #[serde(default)]
    pub last_transition_time: Option<Timestamp>,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(
        type_: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_,
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: 0,
            last_transition_time: None,
        }
    }

    /// Sets the observed generation.
    #[must_use]
    pub fn with_generation(mut self, generation: i64) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Returns true if the status is `True`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Ordered, type-keyed condition set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, type_: ConditionType) -> Option<usize> {
        self.0.iter().position(|c| c.type_ == type_)
    }

    /// Returns the condition of the given type.
    #[must_use]
    pub fn get(&self, type_: ConditionType) -> Option<&Condition> {
        self.index_of(type_).map(|i| &self.0[i])
    }

    /// Returns true if the condition exists with status `True`.
    #[must_use]
    pub fn is_true(&self, type_: ConditionType) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Upserts a condition.
    ///
    /// The transition time is carried over from the existing entry when the
    /// status did not change, and set to `now` otherwise.
    pub fn set(&mut self, mut condition: Condition, now: Timestamp) {
        match self.index_of(condition.type_) {
            Some(i) => {
                let existing = &self.0[i];
                condition.last_transition_time = if existing.status == condition.status {
                    existing.last_transition_time.or(Some(now))
                } else {
                    Some(now)
                };
                self.0[i] = condition;
            }
            None => {
                condition.last_transition_time = Some(now);
                self.0.push(condition);
            }
        }
    }

    /// Removes the condition of the given type, if present.
    pub fn delete(&mut self, type_: ConditionType) -> Option<Condition> {
        self.index_of(type_).map(|i| self.0.remove(i))
    }

    /// Iterates conditions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    /// Returns the number of conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
