//! Condition assertions.

use crate::core::{ConditionStatus, ConditionType, StageStatus};

/// Asserts that a condition is present with the expected status and reason.
pub fn assert_condition(status: &StageStatus, type_: ConditionType, expected: ConditionStatus, reason: &str) {
    let Some(condition) = status.conditions.get(type_) else {
        panic!(
            "Expected condition {type_} to be present. Conditions: {:?}",
            status.conditions.iter().map(|c| c.type_).collect::<Vec<_>>()
        );
    };
    assert_eq!(
        (condition.status, condition.reason.as_str()),
        (expected, reason),
        "Unexpected {type_} condition (message: {:?})",
        condition.message
    );
}

/// Asserts that a condition is absent.
pub fn assert_no_condition(status: &StageStatus, type_: ConditionType) {
    assert!(
        status.conditions.get(type_).is_none(),
        "Expected no {type_} condition, got {:?}",
        status.conditions.get(type_)
    );
}
