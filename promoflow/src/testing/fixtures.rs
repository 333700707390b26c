//! Builders and a reconciliation harness.

use std::sync::Arc;

use crate::config::ControllerConfig;
use crate::core::{
    AnalysisRunArgument, AnalysisTemplateReference, ApprovedStage, Freight, FreightCollection, FreightOrigin,
    FreightReference, FreightRequest, FreightStatus, Health, HealthCheckStep, HealthState, ObjectMeta, Promotion,
    PromotionPhase, PromotionReference, PromotionStatus, PromotionStep, PromotionTemplate, Stage, StageStatus, Timestamp,
    VerificationSpec, VerifiedStage,
};
use crate::events::CollectingEventSink;
use crate::ports::{InMemoryAnalysisClient, InMemoryStore, ManualClock};
use crate::reconciler::{ReconcileContext, StageDriver};

use super::mocks::StaticHealthChecker;

/// Builds a reference to Freight from a Warehouse.
#[must_use]
pub fn reference(name: &str, warehouse: &str) -> FreightReference {
    FreightReference {
        name: name.to_string(),
        origin: FreightOrigin::warehouse(warehouse),
        commits: Vec::new(),
        images: Vec::new(),
        charts: Vec::new(),
    }
}

/// Builder for Stages.
#[derive(Debug, Clone)]
pub struct StageBuilder {
    stage: Stage,
}

impl StageBuilder {
    /// Starts a regular Stage with a one-step promotion template.
    #[must_use]
    pub fn regular(namespace: &str, name: &str) -> Self {
        let mut stage = Stage::new(namespace, name);
        stage.spec.promotion_template = Some(PromotionTemplate {
            steps: vec![PromotionStep {
                uses: "argocd-update".to_string(),
                ..Default::default()
            }],
        });
        Self { stage }
    }

    /// Starts a control-flow Stage.
    #[must_use]
    pub fn control_flow(namespace: &str, name: &str) -> Self {
        Self {
            stage: Stage::new(namespace, name),
        }
    }

    /// Adds a Freight request.
    #[must_use]
    pub fn request(mut self, request: FreightRequest) -> Self {
        self.stage.spec.requested_freight.push(request);
        self
    }

    /// Requests Freight directly from a Warehouse.
    #[must_use]
    pub fn direct(self, warehouse: &str) -> Self {
        self.request(FreightRequest::direct(warehouse))
    }

    /// Requests Freight of a Warehouse verified upstream.
    #[must_use]
    pub fn from_stages(self, warehouse: &str, stages: &[&str]) -> Self {
        self.request(FreightRequest::from_stages(warehouse, stages))
    }

    fn verification(&mut self) -> &mut VerificationSpec {
        self.stage.spec.verification.get_or_insert_with(VerificationSpec::default)
    }

    /// Verifies with an analysis template.
    #[must_use]
    pub fn analysis_template(mut self, name: &str) -> Self {
        self.verification()
            .analysis_templates
            .push(AnalysisTemplateReference { name: name.to_string() });
        self
    }

    /// Adds an analysis argument.
    #[must_use]
    pub fn arg(mut self, name: &str, value: &str) -> Self {
        self.verification().args.push(AnalysisRunArgument::new(name, value));
        self
    }

    /// Sets an annotation.
    #[must_use]
    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.stage.metadata.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Adds a finalizer.
    #[must_use]
    pub fn finalizer(mut self, finalizer: &str) -> Self {
        self.stage.metadata.add_finalizer(finalizer);
        self
    }

    /// Replaces the status.
    #[must_use]
    pub fn status(mut self, status: StageStatus) -> Self {
        self.stage.status = status;
        self
    }

    /// Records `fc` as deployed by a successful Promotion.
    #[must_use]
    pub fn deployed(mut self, fc: FreightCollection) -> Self {
        let first = fc.references_iter().next().cloned();
        let name = format!(
            "{}.01.{}",
            self.stage.name(),
            first.as_ref().map_or("none", |f| f.name.as_str())
        );
        self.stage.status.last_promotion = Some(PromotionReference {
            name,
            freight: first,
            status: Some(PromotionStatus {
                phase: PromotionPhase::Succeeded,
                freight_collection: Some(fc.clone()),
                ..Default::default()
            }),
        });
        self.stage.status.freight_history.record(fc);
        self
    }

    /// Sets the recorded health.
    #[must_use]
    pub fn health(mut self, state: HealthState) -> Self {
        self.stage.status.health = Some(Health::new(state));
        self
    }

    /// Builds the Stage.
    #[must_use]
    pub fn build(self) -> Stage {
        self.stage
    }
}

/// Builder for Freight from a Warehouse.
#[derive(Debug, Clone)]
pub struct FreightBuilder {
    freight: Freight,
}

impl FreightBuilder {
    /// Starts Freight named `name`.
    #[must_use]
    pub fn new(namespace: &str, name: &str, warehouse: &str) -> Self {
        Self {
            freight: Freight {
                metadata: ObjectMeta::new(namespace, name),
                alias: None,
                origin: FreightOrigin::warehouse(warehouse),
                commits: Vec::new(),
                images: Vec::new(),
                charts: Vec::new(),
                status: FreightStatus::default(),
            },
        }
    }

    /// Sets the alias.
    #[must_use]
    pub fn alias(mut self, alias: &str) -> Self {
        self.freight.alias = Some(alias.to_string());
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub fn created_at(mut self, at: Timestamp) -> Self {
        self.freight.metadata.creation_timestamp = Some(at);
        self
    }

    /// Marks the Freight verified in a Stage.
    #[must_use]
    pub fn verified_in(mut self, stage: &str, at: Timestamp) -> Self {
        self.freight
            .status
            .verified_in
            .insert(stage.to_string(), VerifiedStage { verified_at: Some(at) });
        self
    }

    /// Marks the Freight approved for a Stage.
    #[must_use]
    pub fn approved_for(mut self, stage: &str, at: Timestamp) -> Self {
        self.freight
            .status
            .approved_for
            .insert(stage.to_string(), ApprovedStage { approved_at: Some(at) });
        self
    }

    /// Builds the Freight.
    #[must_use]
    pub fn build(self) -> Freight {
        self.freight
    }
}

/// Builder for Promotions as the executor would write them.
#[derive(Debug, Clone)]
pub struct PromotionBuilder {
    promotion: Promotion,
}

impl PromotionBuilder {
    /// Starts a pending Promotion.
    #[must_use]
    pub fn new(namespace: &str, stage: &str, freight: &str) -> Self {
        Self {
            promotion: Promotion::new(namespace, stage, freight),
        }
    }

    /// Overrides the generated name.
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.promotion.metadata.name = name.to_string();
        self
    }

    /// Sets the phase.
    #[must_use]
    pub fn phase(mut self, phase: PromotionPhase) -> Self {
        self.promotion.status.phase = phase;
        self
    }

    /// Sets the deployed FreightCollection.
    #[must_use]
    pub fn freight_collection(mut self, fc: FreightCollection) -> Self {
        self.promotion.status.freight_collection = Some(fc);
        self
    }

    /// Adds a health check.
    #[must_use]
    pub fn health_check(mut self, step: HealthCheckStep) -> Self {
        self.promotion.status.health_checks.push(step);
        self
    }

    /// Builds the Promotion.
    #[must_use]
    pub fn build(self) -> Promotion {
        self.promotion
    }
}

/// In-memory collaborators wired into a [`ReconcileContext`].
///
/// Analysis is enabled, events are collected and time is frozen until
/// advanced.
pub struct TestHarness {
    /// The resource store.
    pub store: Arc<InMemoryStore>,
    /// The analysis engine.
    pub analysis: Arc<InMemoryAnalysisClient>,
    /// Recorded audit events.
    pub sink: Arc<CollectingEventSink>,
    /// The clock.
    pub clock: Arc<ManualClock>,
    /// The health checker.
    pub health: Arc<StaticHealthChecker>,
    /// The context handed to reconcilers.
    pub ctx: ReconcileContext,
}

impl TestHarness {
    /// Creates a harness with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ControllerConfig::default())
    }

    /// Creates a harness with `config`.
    #[must_use]
    pub fn with_config(config: ControllerConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let analysis = Arc::new(InMemoryAnalysisClient::new());
        let sink = Arc::new(CollectingEventSink::new());
        let clock = Arc::new(ManualClock::default());
        let health = Arc::new(StaticHealthChecker::healthy());
        let ctx = ReconcileContext::new(store.clone(), health.clone(), config)
            .with_analysis(analysis.clone())
            .with_clock(clock.clone())
            .with_event_sink(sink.clone());
        Self {
            store,
            analysis,
            sink,
            clock,
            health,
            ctx,
        }
    }

    /// Returns a driver over the current context.
    #[must_use]
    pub fn driver(&self) -> StageDriver {
        StageDriver::new(self.ctx.clone())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
