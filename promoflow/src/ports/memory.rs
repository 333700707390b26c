//! In-memory store and analysis engine.
//!
//! Both enforce the optimistic-concurrency and finalizer rules of a real
//! store, publish every change on a broadcast channel and support failure
//! injection per operation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{AnalysisClient, FreightQuery, PromotionQuery, ResourceStore};
use crate::controller::watch::WatchEvent;
use crate::core::{
    AnalysisRun, AnalysisRunPhase, AnalysisTemplate, Freight, LabelSelector, ObjectKey, ObjectMeta,
    ProjectConfig, Promotion, Stage, StageStatus,
};
use crate::errors::StoreError;

const WATCH_CHANNEL_CAPACITY: usize = 1024;

/// Operations that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `get_stage`
    GetStage,
    /// `list_stages`
    ListStages,
    /// `update_stage`
    UpdateStage,
    /// `patch_stage_status`
    PatchStageStatus,
    /// `get_freight`
    GetFreight,
    /// `list_freight`
    ListFreight,
    /// `patch_freight_status`
    PatchFreightStatus,
    /// `list_promotions`
    ListPromotions,
    /// `create_promotion`
    CreatePromotion,
    /// `get_project_config`
    GetProjectConfig,
    /// `get_analysis_template`
    GetAnalysisTemplate,
    /// `create_run`
    CreateAnalysisRun,
    /// `get_run`
    GetAnalysisRun,
    /// `list_runs`
    ListAnalysisRuns,
    /// `terminate_run`
    TerminateAnalysisRun,
    /// `delete_runs`
    DeleteAnalysisRuns,
}

#[derive(Debug)]
struct Failure {
    error: StoreError,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct FailureInjector {
    failures: Mutex<HashMap<StoreOp, Failure>>,
    calls: Mutex<HashMap<StoreOp, usize>>,
}

impl FailureInjector {
    fn check(&self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.lock().entry(op).or_default() += 1;

        let mut failures = self.failures.lock();
        let Some(failure) = failures.get_mut(&op) else {
            return Ok(());
        };
        let error = failure.error.clone();
        match failure.remaining.as_mut() {
            Some(0) => {
                failures.remove(&op);
                return Ok(());
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    failures.remove(&op);
                }
            }
            None => {}
        }
        Err(error)
    }

    fn fail(&self, op: StoreOp, error: StoreError, times: Option<usize>) {
        self.failures.lock().insert(op, Failure { error, remaining: times });
    }

    fn clear(&self) {
        self.failures.lock().clear();
    }

    fn count(&self, op: StoreOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }
}

fn stamp_new(meta: &mut ObjectMeta, version: u64) {
    if meta.uid.is_empty() {
        meta.uid = Uuid::new_v4().to_string();
    }
    if meta.creation_timestamp.is_none() {
        meta.creation_timestamp = Some(Utc::now());
    }
    if meta.generation == 0 {
        meta.generation = 1;
    }
    meta.resource_version = version;
}

#[derive(Debug, Default)]
struct Objects {
    stages: BTreeMap<ObjectKey, Stage>,
    freight: BTreeMap<ObjectKey, Freight>,
    promotions: BTreeMap<ObjectKey, Promotion>,
    projects: BTreeMap<String, ProjectConfig>,
    templates: BTreeMap<ObjectKey, AnalysisTemplate>,
    version: u64,
}

impl Objects {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }
}

/// In-memory [`ResourceStore`].
#[derive(Debug)]
pub struct InMemoryStore {
    objects: RwLock<Objects>,
    injector: FailureInjector,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: RwLock::new(Objects::default()),
            injector: FailureInjector::default(),
            events,
        }
    }

    /// Subscribes to change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Returns the sender used for change events, so other in-memory
    /// components can publish on the same channel.
    #[must_use]
    pub fn watch_sender(&self) -> broadcast::Sender<WatchEvent> {
        self.events.clone()
    }

    fn publish(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Makes the next `times` calls of `op` fail. `None` fails forever.
    pub fn fail(&self, op: StoreOp, error: StoreError, times: Option<usize>) {
        self.injector.fail(op, error, times);
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.fail(op, error, Some(1));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.injector.clear();
    }

    /// Returns how often `op` was called.
    #[must_use]
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.injector.count(op)
    }

    /// Creates or replaces a Stage. Spec changes bump the generation.
    pub fn put_stage(&self, mut stage: Stage) -> Stage {
        let mut objects = self.objects.write();
        let version = objects.next_version();
        let key = stage.key();
        let old = objects.stages.get(&key).cloned();
        if let Some(existing) = &old {
            stage.metadata.uid.clone_from(&existing.metadata.uid);
            stage.metadata.creation_timestamp = existing.metadata.creation_timestamp;
            stage.metadata.generation = if existing.spec == stage.spec {
                existing.metadata.generation
            } else {
                existing.metadata.generation + 1
            };
        }
        stamp_new(&mut stage.metadata, version);
        objects.stages.insert(key, stage.clone());
        drop(objects);

        self.publish(WatchEvent::stage(old, Some(stage.clone())));
        stage
    }

    /// Requests deletion of a Stage. Stages with finalizers are only marked.
    pub fn delete_stage(&self, key: &ObjectKey) -> bool {
        let mut objects = self.objects.write();
        let Some(existing) = objects.stages.get(key).cloned() else {
            return false;
        };
        if existing.metadata.finalizers.is_empty() {
            objects.stages.remove(key);
            drop(objects);
            self.publish(WatchEvent::stage(Some(existing), None));
            return true;
        }
        let version = objects.next_version();
        let mut updated = existing.clone();
        if updated.metadata.deletion_timestamp.is_none() {
            updated.metadata.deletion_timestamp = Some(Utc::now());
        }
        updated.metadata.resource_version = version;
        objects.stages.insert(key.clone(), updated.clone());
        drop(objects);
        self.publish(WatchEvent::stage(Some(existing), Some(updated)));
        true
    }

    /// Returns a Stage.
    #[must_use]
    pub fn stage(&self, key: &ObjectKey) -> Option<Stage> {
        self.objects.read().stages.get(key).cloned()
    }

    /// Creates or replaces a Freight.
    pub fn put_freight(&self, mut freight: Freight) -> Freight {
        let mut objects = self.objects.write();
        let version = objects.next_version();
        let key = freight.metadata.key();
        let old = objects.freight.get(&key).cloned();
        stamp_new(&mut freight.metadata, version);
        objects.freight.insert(key, freight.clone());
        drop(objects);

        self.publish(WatchEvent::freight(old, Some(freight.clone())));
        freight
    }

    /// Returns a Freight.
    #[must_use]
    pub fn freight(&self, namespace: &str, name: &str) -> Option<Freight> {
        self.objects.read().freight.get(&ObjectKey::new(namespace, name)).cloned()
    }

    /// Creates or replaces a Promotion, as the executor would.
    pub fn put_promotion(&self, mut promotion: Promotion) -> Promotion {
        let mut objects = self.objects.write();
        let version = objects.next_version();
        let key = promotion.metadata.key();
        let old = objects.promotions.get(&key).cloned();
        stamp_new(&mut promotion.metadata, version);
        objects.promotions.insert(key, promotion.clone());
        drop(objects);

        self.publish(WatchEvent::promotion(old, Some(promotion.clone())));
        promotion
    }

    /// Returns every Promotion in a namespace, ordered by name.
    #[must_use]
    pub fn promotions(&self, namespace: &str) -> Vec<Promotion> {
        self.objects
            .read()
            .promotions
            .values()
            .filter(|p| p.metadata.namespace == namespace)
            .cloned()
            .collect()
    }

    /// Creates or replaces the project configuration of its namespace.
    pub fn put_project_config(&self, config: ProjectConfig) {
        let namespace = config.metadata.namespace.clone();
        self.objects.write().projects.insert(namespace, config);
    }

    /// Creates or replaces an analysis template.
    pub fn put_analysis_template(&self, template: AnalysisTemplate) {
        let key = template.metadata.key();
        self.objects.write().templates.insert(key, template);
    }

    /// Publishes a signal from an external health source.
    pub fn emit_health_signal(&self, namespace: &str, source: &str, target: &str) {
        self.publish(WatchEvent::HealthSignal {
            namespace: namespace.to_string(),
            source: source.to_string(),
            target: target.to_string(),
        });
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_stage(&self, key: &ObjectKey) -> Result<Option<Stage>, StoreError> {
        self.injector.check(StoreOp::GetStage)?;
        Ok(self.stage(key))
    }

    async fn list_stages(&self, namespace: Option<&str>) -> Result<Vec<Stage>, StoreError> {
        self.injector.check(StoreOp::ListStages)?;
        Ok(self
            .objects
            .read()
            .stages
            .values()
            .filter(|s| namespace.map_or(true, |ns| s.namespace() == ns))
            .cloned()
            .collect())
    }

    async fn update_stage(&self, stage: &Stage) -> Result<Stage, StoreError> {
        self.injector.check(StoreOp::UpdateStage)?;
        let key = stage.key();
        let mut objects = self.objects.write();
        let existing = objects
            .stages
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Stage", key.to_string()))?;
        if existing.metadata.resource_version != stage.metadata.resource_version {
            return Err(StoreError::conflict("Stage", key.to_string()));
        }

        let mut updated = existing.clone();
        updated.metadata.labels.clone_from(&stage.metadata.labels);
        updated.metadata.annotations.clone_from(&stage.metadata.annotations);
        updated.metadata.finalizers.clone_from(&stage.metadata.finalizers);

        if updated.metadata.is_deleting() && updated.metadata.finalizers.is_empty() {
            objects.stages.remove(&key);
            drop(objects);
            self.publish(WatchEvent::stage(Some(existing), None));
            return Ok(updated);
        }

        updated.metadata.resource_version = objects.next_version();
        objects.stages.insert(key, updated.clone());
        drop(objects);
        self.publish(WatchEvent::stage(Some(existing), Some(updated.clone())));
        Ok(updated)
    }

    async fn patch_stage_status(
        &self,
        key: &ObjectKey,
        resource_version: u64,
        status: &StageStatus,
    ) -> Result<Stage, StoreError> {
        self.injector.check(StoreOp::PatchStageStatus)?;
        let mut objects = self.objects.write();
        let existing = objects
            .stages
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Stage", key.to_string()))?;
        if existing.metadata.resource_version != resource_version {
            return Err(StoreError::conflict("Stage", key.to_string()));
        }

        let mut updated = existing.clone();
        updated.status = status.clone();
        updated.metadata.resource_version = objects.next_version();
        objects.stages.insert(key.clone(), updated.clone());
        drop(objects);
        self.publish(WatchEvent::stage(Some(existing), Some(updated.clone())));
        Ok(updated)
    }

    async fn get_freight(&self, namespace: &str, name: &str) -> Result<Option<Freight>, StoreError> {
        self.injector.check(StoreOp::GetFreight)?;
        Ok(self.freight(namespace, name))
    }

    async fn list_freight(&self, namespace: &str, query: &FreightQuery) -> Result<Vec<Freight>, StoreError> {
        self.injector.check(StoreOp::ListFreight)?;
        Ok(self
            .objects
            .read()
            .freight
            .values()
            .filter(|f| f.metadata.namespace == namespace && query.matches(f))
            .cloned()
            .collect())
    }

    async fn patch_freight_status(&self, freight: &Freight) -> Result<Freight, StoreError> {
        self.injector.check(StoreOp::PatchFreightStatus)?;
        let key = freight.metadata.key();
        let mut objects = self.objects.write();
        let existing = objects
            .freight
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Freight", key.to_string()))?;
        if existing.metadata.resource_version != freight.metadata.resource_version {
            return Err(StoreError::conflict("Freight", key.to_string()));
        }

        let mut updated = existing.clone();
        updated.status = freight.status.clone();
        updated.metadata.resource_version = objects.next_version();
        objects.freight.insert(key, updated.clone());
        drop(objects);
        self.publish(WatchEvent::freight(Some(existing), Some(updated.clone())));
        Ok(updated)
    }

    async fn list_promotions(
        &self,
        namespace: &str,
        query: &PromotionQuery,
    ) -> Result<Vec<Promotion>, StoreError> {
        self.injector.check(StoreOp::ListPromotions)?;
        Ok(self
            .objects
            .read()
            .promotions
            .values()
            .filter(|p| p.metadata.namespace == namespace && query.matches(p))
            .cloned()
            .collect())
    }

    async fn create_promotion(&self, promotion: &Promotion) -> Result<Promotion, StoreError> {
        self.injector.check(StoreOp::CreatePromotion)?;
        let key = promotion.metadata.key();
        let mut objects = self.objects.write();
        if objects.promotions.contains_key(&key) {
            return Err(StoreError::already_exists("Promotion", key.to_string()));
        }
        let mut created = promotion.clone();
        let version = objects.next_version();
        stamp_new(&mut created.metadata, version);
        objects.promotions.insert(key, created.clone());
        drop(objects);
        self.publish(WatchEvent::promotion(None, Some(created.clone())));
        Ok(created)
    }

    async fn get_project_config(&self, namespace: &str) -> Result<Option<ProjectConfig>, StoreError> {
        self.injector.check(StoreOp::GetProjectConfig)?;
        Ok(self.objects.read().projects.get(namespace).cloned())
    }

    async fn get_analysis_template(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<AnalysisTemplate>, StoreError> {
        self.injector.check(StoreOp::GetAnalysisTemplate)?;
        Ok(self
            .objects
            .read()
            .templates
            .get(&ObjectKey::new(namespace, name))
            .cloned())
    }
}

/// In-memory [`AnalysisClient`].
///
/// Termination is reported by the simulated engine as a successful run.
#[derive(Debug, Default)]
pub struct InMemoryAnalysisClient {
    runs: RwLock<BTreeMap<ObjectKey, AnalysisRun>>,
    version: Mutex<u64>,
    injector: FailureInjector,
    events: Option<broadcast::Sender<WatchEvent>>,
}

impl InMemoryAnalysisClient {
    /// Creates an engine with no runs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes run changes on the given channel.
    #[must_use]
    pub fn with_watch(mut self, sender: broadcast::Sender<WatchEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    fn publish(&self, old: Option<AnalysisRun>, new: Option<AnalysisRun>) {
        if let Some(events) = &self.events {
            let _ = events.send(WatchEvent::analysis_run(old, new));
        }
    }

    fn next_version(&self) -> u64 {
        let mut version = self.version.lock();
        *version += 1;
        *version
    }

    /// Makes the next `times` calls of `op` fail. `None` fails forever.
    pub fn fail(&self, op: StoreOp, error: StoreError, times: Option<usize>) {
        self.injector.fail(op, error, times);
    }

    /// Makes the next call of `op` fail.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        self.fail(op, error, Some(1));
    }

    /// Returns how often `op` was called.
    #[must_use]
    pub fn call_count(&self, op: StoreOp) -> usize {
        self.injector.count(op)
    }

    /// Creates or replaces a run.
    pub fn put_run(&self, mut run: AnalysisRun) -> AnalysisRun {
        let key = run.metadata.key();
        stamp_new(&mut run.metadata, self.next_version());
        let old = self.runs.write().insert(key, run.clone());
        self.publish(old, Some(run.clone()));
        run
    }

    /// Moves a run to a new phase, as the engine would.
    pub fn set_phase(&self, namespace: &str, name: &str, phase: AnalysisRunPhase) -> Option<AnalysisRun> {
        let key = ObjectKey::new(namespace, name);
        let mut runs = self.runs.write();
        let run = runs.get_mut(&key)?;
        let old = run.clone();
        run.status.phase = phase;
        if phase.is_completed() {
            run.status.completed_at = Some(Utc::now());
        } else if run.status.started_at.is_none() {
            run.status.started_at = Some(Utc::now());
        }
        let new = run.clone();
        drop(runs);
        self.publish(Some(old), Some(new.clone()));
        Some(new)
    }

    /// Returns a run.
    #[must_use]
    pub fn run(&self, namespace: &str, name: &str) -> Option<AnalysisRun> {
        self.runs.read().get(&ObjectKey::new(namespace, name)).cloned()
    }

    /// Returns every run.
    #[must_use]
    pub fn runs(&self) -> Vec<AnalysisRun> {
        self.runs.read().values().cloned().collect()
    }
}

#[async_trait]
impl AnalysisClient for InMemoryAnalysisClient {
    async fn create_run(&self, run: &AnalysisRun) -> Result<AnalysisRun, StoreError> {
        self.injector.check(StoreOp::CreateAnalysisRun)?;
        let key = run.metadata.key();
        if self.runs.read().contains_key(&key) {
            return Err(StoreError::already_exists("AnalysisRun", key.to_string()));
        }
        Ok(self.put_run(run.clone()))
    }

    async fn get_run(&self, namespace: &str, name: &str) -> Result<Option<AnalysisRun>, StoreError> {
        self.injector.check(StoreOp::GetAnalysisRun)?;
        Ok(self.run(namespace, name))
    }

    async fn list_runs(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<AnalysisRun>, StoreError> {
        self.injector.check(StoreOp::ListAnalysisRuns)?;
        Ok(self
            .runs
            .read()
            .values()
            .filter(|r| r.metadata.namespace == namespace && r.metadata.matches(selector))
            .cloned()
            .collect())
    }

    async fn terminate_run(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.injector.check(StoreOp::TerminateAnalysisRun)?;
        let key = ObjectKey::new(namespace, name);
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found("AnalysisRun", key.to_string()))?;
        let old = run.clone();
        run.spec.terminate = true;
        run.status.phase = AnalysisRunPhase::Successful;
        run.status.completed_at = Some(Utc::now());
        let new = run.clone();
        drop(runs);
        self.publish(Some(old), Some(new));
        Ok(())
    }

    async fn delete_runs(&self, namespace: &str, selector: &LabelSelector) -> Result<usize, StoreError> {
        self.injector.check(StoreOp::DeleteAnalysisRuns)?;
        let mut runs = self.runs.write();
        let doomed: Vec<ObjectKey> = runs
            .iter()
            .filter(|(_, r)| r.metadata.namespace == namespace && r.metadata.matches(selector))
            .map(|(k, _)| k.clone())
            .collect();
        let removed: Vec<AnalysisRun> = doomed.iter().filter_map(|k| runs.remove(k)).collect();
        drop(runs);
        let count = removed.len();
        for run in removed {
            self.publish(Some(run), None);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnalysisRunSpec, FreightOrigin, StageSpec, VerifiedStage};

    fn freight(name: &str) -> Freight {
        Freight {
            metadata: ObjectMeta::new("ns", name),
            alias: None,
            origin: FreightOrigin::warehouse("w"),
            commits: Vec::new(),
            images: Vec::new(),
            charts: Vec::new(),
            status: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_status_patch_requires_current_version() {
        let store = InMemoryStore::new();
        let stage = store.put_stage(Stage::new("ns", "test"));

        let mut status = StageStatus::default();
        status.freight_summary = "x".into();
        let patched = store
            .patch_stage_status(&stage.key(), stage.metadata.resource_version, &status)
            .await
            .unwrap();
        assert_eq!(patched.status.freight_summary, "x");

        let err = store
            .patch_stage_status(&stage.key(), stage.metadata.resource_version, &status)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_generation_bumps_on_spec_change_only() {
        let store = InMemoryStore::new();
        let mut stage = store.put_stage(Stage::new("ns", "test"));
        assert_eq!(stage.metadata.generation, 1);

        stage = store.put_stage(stage);
        assert_eq!(stage.metadata.generation, 1);

        stage.spec = StageSpec {
            promotion_template: Some(Default::default()),
            ..Default::default()
        };
        stage = store.put_stage(stage);
        assert_eq!(stage.metadata.generation, 2);
    }

    #[tokio::test]
    async fn test_finalizer_gates_deletion() {
        let store = InMemoryStore::new();
        let mut stage = Stage::new("ns", "test");
        stage.metadata.add_finalizer("f");
        let stage = store.put_stage(stage);

        assert!(store.delete_stage(&stage.key()));
        let mut marked = store.stage(&stage.key()).unwrap();
        assert!(marked.metadata.is_deleting());

        marked.metadata.remove_finalizer("f");
        store.update_stage(&marked).await.unwrap();
        assert!(store.stage(&stage.key()).is_none());
    }

    #[tokio::test]
    async fn test_freight_patch_and_query() {
        let store = InMemoryStore::new();
        let mut f = store.put_freight(freight("a"));
        store.put_freight(freight("b"));

        f.status.verified_in.insert("test".into(), VerifiedStage::default());
        store.patch_freight_status(&f).await.unwrap();

        let verified = store
            .list_freight("ns", &FreightQuery::VerifiedIn { origin: None, stage: "test".into() })
            .await
            .unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].name(), "a");

        let err = store.patch_freight_status(&f).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_failure_injection_is_bounded() {
        let store = InMemoryStore::new();
        store.fail(StoreOp::ListStages, StoreError::Unavailable("down".into()), Some(2));

        assert!(store.list_stages(None).await.is_err());
        assert!(store.list_stages(None).await.is_err());
        assert!(store.list_stages(None).await.is_ok());
        assert_eq!(store.call_count(StoreOp::ListStages), 3);
    }

    #[tokio::test]
    async fn test_duplicate_promotion_rejected() {
        let store = InMemoryStore::new();
        let promotion = Promotion::new("ns", "test", "abc");
        store.create_promotion(&promotion).await.unwrap();
        let err = store.create_promotion(&promotion).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        store.put_stage(Stage::new("ns", "test"));

        match rx.recv().await.unwrap() {
            WatchEvent::Stage { old, new } => {
                assert!(old.is_none());
                assert_eq!(new.unwrap().name(), "test");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_analysis_client_lifecycle() {
        let client = InMemoryAnalysisClient::new();
        let mut run = AnalysisRun {
            metadata: ObjectMeta::new("ns", "run"),
            spec: AnalysisRunSpec::default(),
            status: Default::default(),
        };
        run.metadata.labels.insert("stage".into(), "test".into());
        client.create_run(&run).await.unwrap();
        assert!(client.create_run(&run).await.unwrap_err().is_already_exists());

        client.terminate_run("ns", "run").await.unwrap();
        let terminated = client.get_run("ns", "run").await.unwrap().unwrap();
        assert!(terminated.spec.terminate);
        assert_eq!(terminated.phase(), AnalysisRunPhase::Successful);

        let mut selector = LabelSelector::new();
        selector.insert("stage".into(), "test".into());
        assert_eq!(client.delete_runs("ns", &selector).await.unwrap(), 1);
        assert!(client.runs().is_empty());
    }
}
