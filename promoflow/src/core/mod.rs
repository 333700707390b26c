//! Resource model: Stages, Freight, Promotions, analysis runs and the
//! status types the reconciler maintains.

pub mod analysis;
pub mod annotations;
pub mod conditions;
pub mod freight;
pub mod health;
pub mod meta;
pub mod project;
pub mod promotion;
pub mod stage;
pub mod verification;

pub use analysis::{
    AnalysisRun, AnalysisRunPhase, AnalysisRunSpec, AnalysisRunStatus, AnalysisTemplate,
    AnalysisTemplateSpec, Metric,
};
pub use annotations::VerificationRequest;
pub use conditions::{Condition, ConditionStatus, ConditionType, Conditions};
pub use freight::{
    ApprovedStage, Chart, Freight, FreightCollection, FreightHistory, FreightOrigin,
    FreightReference, FreightStatus, GitCommit, Image, OriginKind, VerifiedStage,
    DEFAULT_FREIGHT_HISTORY_LIMIT,
};
pub use health::{Health, HealthCheckStep, HealthState};
pub use meta::{LabelSelector, ObjectKey, ObjectMeta, OwnerReference, Timestamp};
pub use project::{ProjectConfig, PromotionPolicy};
pub use promotion::{
    compare_promotions, generate_promotion_name, Promotion, PromotionPhase, PromotionReference,
    PromotionSpec, PromotionStatus, PromotionStep,
};
pub use stage::{
    AnalysisRunArgument, AnalysisRunMetadata, AnalysisTemplateReference, FreightRequest,
    FreightSources, PromotionTemplate, Stage, StageKind, StagePhase, StageSpec, StageStatus,
    VerificationSpec,
};
pub use verification::{
    AnalysisRunReference, VerificationHistory, VerificationInfo, VerificationPhase,
    MAX_VERIFICATION_HISTORY,
};
