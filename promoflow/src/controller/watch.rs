//! Translates changes of related resources into Stage reconciliations.
//!
//! Each watch source produces a [`WatchEvent`]. [`stages_to_enqueue`] is a
//! pure mapping from an event to the Stage keys it affects;
//! [`WatchEnqueuer`] applies the result to the work queue and keeps the
//! [`StageIndex`] up to date.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::queue::WorkQueue;
use super::shutdown::ShutdownSignal;
use crate::core::annotations::{COMMAND_ANNOTATIONS, LABEL_STAGE};
use crate::core::{AnalysisRun, Freight, FreightOrigin, ObjectKey, Promotion, Stage};

/// A change observed on a watched resource.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A Stage changed.
    Stage {
        /// Previous state; `None` on create.
        old: Option<Box<Stage>>,
        /// New state; `None` on delete.
        new: Option<Box<Stage>>,
    },
    /// A Promotion changed.
    Promotion {
        /// Previous state; `None` on create.
        old: Option<Box<Promotion>>,
        /// New state; `None` on delete.
        new: Option<Box<Promotion>>,
    },
    /// A Freight changed.
    Freight {
        /// Previous state; `None` on create.
        old: Option<Box<Freight>>,
        /// New state; `None` on delete.
        new: Option<Box<Freight>>,
    },
    /// An analysis run changed.
    AnalysisRun {
        /// Previous state; `None` on create.
        old: Option<Box<AnalysisRun>>,
        /// New state; `None` on delete.
        new: Option<Box<AnalysisRun>>,
    },
    /// An external health source reported on a target.
    HealthSignal {
        /// Namespace of the affected Stages.
        namespace: String,
        /// Kind of health check reporting, e.g. `argocd-update`.
        source: String,
        /// Observed resource.
        target: String,
    },
}

impl WatchEvent {
    /// Builds a Stage event.
    #[must_use]
    pub fn stage(old: Option<Stage>, new: Option<Stage>) -> Self {
        Self::Stage {
            old: old.map(Box::new),
            new: new.map(Box::new),
        }
    }

    /// Builds a Promotion event.
    #[must_use]
    pub fn promotion(old: Option<Promotion>, new: Option<Promotion>) -> Self {
        Self::Promotion {
            old: old.map(Box::new),
            new: new.map(Box::new),
        }
    }

    /// Builds a Freight event.
    #[must_use]
    pub fn freight(old: Option<Freight>, new: Option<Freight>) -> Self {
        Self::Freight {
            old: old.map(Box::new),
            new: new.map(Box::new),
        }
    }

    /// Builds an analysis run event.
    #[must_use]
    pub fn analysis_run(old: Option<AnalysisRun>, new: Option<AnalysisRun>) -> Self {
        Self::AnalysisRun {
            old: old.map(Box::new),
            new: new.map(Box::new),
        }
    }
}

type Keys = BTreeSet<ObjectKey>;

/// Reverse indices from related resources to the Stages that care.
#[derive(Debug, Clone, Default)]
pub struct StageIndex {
    known: Keys,
    direct: HashMap<(String, FreightOrigin), Keys>,
    downstream: HashMap<(String, String, FreightOrigin), Keys>,
    health: HashMap<(String, String, String), Keys>,
}

fn remove_from<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Keys>, key: &ObjectKey) {
    map.retain(|_, keys| {
        keys.remove(key);
        !keys.is_empty()
    });
}

impl StageIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes a Stage, replacing any previous entries for it.
    pub fn upsert(&mut self, stage: &Stage) {
        let key = stage.key();
        self.remove(&key);
        let ns = stage.namespace().to_string();

        for request in &stage.spec.requested_freight {
            if request.sources.direct {
                self.direct
                    .entry((ns.clone(), request.origin.clone()))
                    .or_default()
                    .insert(key.clone());
            }
            for upstream in &request.sources.stages {
                self.downstream
                    .entry((ns.clone(), upstream.clone(), request.origin.clone()))
                    .or_default()
                    .insert(key.clone());
            }
        }

        if let Some(last) = &stage.status.last_promotion {
            for step in last.health_checks() {
                for target in &step.targets {
                    self.health
                        .entry((ns.clone(), step.uses.clone(), target.clone()))
                        .or_default()
                        .insert(key.clone());
                }
            }
        }

        self.known.insert(key);
    }

    /// Drops every entry of a Stage.
    pub fn remove(&mut self, key: &ObjectKey) {
        if !self.known.remove(key) {
            return;
        }
        remove_from(&mut self.direct, key);
        remove_from(&mut self.downstream, key);
        remove_from(&mut self.health, key);
    }

    /// Stages requesting the origin directly.
    #[must_use]
    pub fn direct_requesters(&self, namespace: &str, origin: &FreightOrigin) -> Keys {
        self.direct
            .get(&(namespace.to_string(), origin.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Stages requesting the origin from an upstream Stage.
    #[must_use]
    pub fn downstream_of(&self, namespace: &str, upstream: &str, origin: &FreightOrigin) -> Keys {
        self.downstream
            .get(&(namespace.to_string(), upstream.to_string(), origin.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Stages whose last Promotion checks the target.
    #[must_use]
    pub fn health_watchers(&self, namespace: &str, source: &str, target: &str) -> Keys {
        self.health
            .get(&(namespace.to_string(), source.to_string(), target.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Every indexed Stage.
    #[must_use]
    pub fn all(&self) -> Keys {
        self.known.clone()
    }
}

fn stage_needs_reconcile(old: &Stage, new: &Stage) -> bool {
    if old.metadata.generation != new.metadata.generation {
        return true;
    }
    if !old.metadata.is_deleting() && new.metadata.is_deleting() {
        return true;
    }
    COMMAND_ANNOTATIONS
        .iter()
        .any(|a| old.metadata.annotation(a) != new.metadata.annotation(a))
}

/// Computes the Stages affected by an event.
#[must_use]
pub fn stages_to_enqueue(event: &WatchEvent, index: &StageIndex) -> Keys {
    let mut keys = Keys::new();
    match event {
        WatchEvent::Stage { old, new } => match (old, new) {
            (None, Some(new)) => {
                keys.insert(new.key());
            }
            (Some(old), Some(new)) if stage_needs_reconcile(old, new) => {
                keys.insert(new.key());
            }
            _ => {}
        },

        WatchEvent::Promotion { old, new } => {
            let changed = match (old, new) {
                (Some(old), Some(new)) => old.phase() != new.phase(),
                _ => true,
            };
            if let Some(p) = new.as_ref().or(old.as_ref()).filter(|_| changed) {
                keys.insert(ObjectKey::new(&p.metadata.namespace, &p.spec.stage));
            }
        }

        WatchEvent::Freight { old, new } => {
            let Some(new) = new else {
                return keys;
            };
            let ns = &new.metadata.namespace;
            if old.is_none() {
                keys.extend(index.direct_requesters(ns, &new.origin));
            }
            let was_verified = |s: &str| old.as_ref().is_some_and(|o| o.is_verified_in(s));
            for stage in new.status.verified_in.keys().filter(|s| !was_verified(s.as_str())) {
                keys.extend(index.downstream_of(ns, stage, &new.origin));
            }
            let was_approved = |s: &str| old.as_ref().is_some_and(|o| o.is_approved_for(s));
            for stage in new.status.approved_for.keys().filter(|s| !was_approved(s.as_str())) {
                keys.insert(ObjectKey::new(ns, stage));
            }
        }

        WatchEvent::AnalysisRun { old, new } => {
            if let (Some(old), Some(new)) = (old, new) {
                if old.phase() != new.phase() {
                    if let Some(stage) = new.metadata.label(LABEL_STAGE) {
                        keys.insert(ObjectKey::new(&new.metadata.namespace, stage));
                    }
                }
            }
        }

        WatchEvent::HealthSignal {
            namespace,
            source,
            target,
        } => {
            keys.extend(index.health_watchers(namespace, source, target));
        }
    }
    keys
}

/// Applies watch events to the work queue.
#[derive(Debug)]
pub struct WatchEnqueuer {
    queue: Arc<WorkQueue>,
    index: RwLock<StageIndex>,
}

impl WatchEnqueuer {
    /// Creates an enqueuer feeding `queue`.
    #[must_use]
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self {
            queue,
            index: RwLock::new(StageIndex::new()),
        }
    }

    /// Seeds the index from a full Stage listing.
    pub fn prime(&self, stages: &[Stage]) {
        let mut index = self.index.write();
        for stage in stages {
            index.upsert(stage);
        }
    }

    /// Returns a snapshot of the index.
    #[must_use]
    pub fn index(&self) -> StageIndex {
        self.index.read().clone()
    }

    /// Handles one event. Returns how many keys were queued.
    pub fn handle(&self, event: &WatchEvent) -> usize {
        if let WatchEvent::Stage { old, new } = event {
            let mut index = self.index.write();
            match (old, new) {
                (_, Some(new)) => index.upsert(new),
                (Some(old), None) => index.remove(&old.key()),
                (None, None) => {}
            }
        }

        let keys = stages_to_enqueue(event, &self.index.read());
        let count = keys.len();
        for key in keys {
            debug!(stage = %key, "Enqueueing Stage from watch event");
            self.queue.add(key);
        }
        count
    }

    /// Pumps events until shutdown or until the channel closes.
    ///
    /// When the receiver lags behind, every known Stage is queued.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<WatchEvent>, shutdown: Arc<ShutdownSignal>) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => {
                        self.handle(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Watch receiver lagged; resyncing all Stages");
                        for key in self.index.read().all() {
                            self.queue.add(key);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Watch pump stopped");
    }
}
