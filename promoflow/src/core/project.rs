//! Project-level promotion policy.

use serde::{Deserialize, Serialize};

use super::meta::ObjectMeta;

/// Promotion policy for one Stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPolicy {
    /// Stage the policy governs.
    pub stage: String,
    /// Whether new Freight is promoted automatically.
    #[serde(default)]
    pub auto_promotion_enabled: bool,
}

/// Policies of one project. There is at most one per namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Object metadata; the namespace is the project.
    pub metadata: ObjectMeta,
    /// Per-Stage policies.
    #[serde(default)]
    pub promotion_policies: Vec<PromotionPolicy>,
}

impl ProjectConfig {
    /// Creates an empty project configuration.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            metadata: ObjectMeta::new(namespace.clone(), namespace),
            promotion_policies: Vec::new(),
        }
    }

    /// Adds a policy.
    #[must_use]
    pub fn with_policy(mut self, stage: impl Into<String>, auto_promotion_enabled: bool) -> Self {
        self.promotion_policies.push(PromotionPolicy {
            stage: stage.into(),
            auto_promotion_enabled,
        });
        self
    }

    /// Returns the policy governing a Stage.
    #[must_use]
    pub fn policy_for(&self, stage: &str) -> Option<&PromotionPolicy> {
        self.promotion_policies.iter().find(|p| p.stage == stage)
    }

    /// Returns true if auto-promotion is enabled for the Stage.
    #[must_use]
    pub fn auto_promotion_enabled(&self, stage: &str) -> bool {
        self.policy_for(stage).is_some_and(|p| p.auto_promotion_enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_lookup() {
        let config = ProjectConfig::new("ns").with_policy("test", true).with_policy("prod", false);
        assert!(config.auto_promotion_enabled("test"));
        assert!(!config.auto_promotion_enabled("prod"));
        assert!(!config.auto_promotion_enabled("uat"));
    }
}
