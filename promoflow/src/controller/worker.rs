//! The controller: a bounded pool of workers draining the work queue.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::queue::WorkQueue;
use super::shutdown::ShutdownSignal;
use super::watch::{WatchEnqueuer, WatchEvent};
use crate::core::ObjectKey;
use crate::errors::PromoflowError;
use crate::reconciler::{ReconcileContext, Requeue, StageDriver};

/// Runs Stage reconciliations driven by watch events.
pub struct Controller {
    driver: StageDriver,
    queue: Arc<WorkQueue>,
    enqueuer: Arc<WatchEnqueuer>,
    shutdown: Arc<ShutdownSignal>,
    workers: usize,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("workers", &self.workers)
            .field("queued", &self.queue.len())
            .field("shutdown", &self.shutdown.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a controller using the context's configuration.
    #[must_use]
    pub fn new(ctx: ReconcileContext) -> Self {
        let queue = Arc::new(WorkQueue::new(ctx.config.requeue_backoff.clone()));
        Self {
            workers: ctx.config.workers.max(1),
            enqueuer: Arc::new(WatchEnqueuer::new(Arc::clone(&queue))),
            queue,
            shutdown: Arc::new(ShutdownSignal::new()),
            driver: StageDriver::new(ctx),
        }
    }

    /// Returns the work queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Returns the shutdown signal.
    #[must_use]
    pub fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        Arc::clone(&self.shutdown)
    }

    /// Stops the controller. Reconciliations in progress finish first.
    pub fn shutdown(&self, reason: impl Into<String>) {
        self.shutdown.shutdown(reason);
        self.queue.shutdown();
    }

    /// Queues every Stage and rebuilds the watch index.
    pub async fn resync(&self) -> Result<usize, PromoflowError> {
        let stages = self.driver.context().store.list_stages(None).await?;
        self.enqueuer.prime(&stages);
        for stage in &stages {
            self.queue.add(stage.key());
        }
        info!(count = stages.len(), "Queued all Stages");
        Ok(stages.len())
    }

    /// Processes one key. Returns false once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        let result = self.driver.reconcile(&key).await;
        self.schedule(key.clone(), result);
        self.queue.done(&key);
        true
    }

    fn schedule(&self, key: ObjectKey, result: Result<Requeue, PromoflowError>) {
        match result {
            Ok(Requeue::Never) => self.queue.forget(&key),
            Ok(Requeue::After(delay)) => {
                self.queue.forget(&key);
                self.queue.add_after(key, delay);
            }
            Ok(Requeue::Immediately) => self.queue.add_rate_limited(key),
            Err(err) => {
                warn!(stage = %key, error = %err, "Reconciliation failed; requeueing");
                self.queue.add_rate_limited(key);
            }
        }
    }

    /// Runs until shutdown: resyncs, pumps `events` into the queue and
    /// drains it with the configured number of workers.
    pub async fn run(self: Arc<Self>, events: broadcast::Receiver<WatchEvent>) -> Result<(), PromoflowError> {
        self.resync().await?;

        let pump = tokio::spawn(Arc::clone(&self.enqueuer).run(events, self.shutdown_signal()));
        let stopper = {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                controller.shutdown.cancelled().await;
                controller.queue.shutdown();
            })
        };

        info!(workers = self.workers, "Starting workers");
        let handles = (0..self.workers).map(|worker| {
            let controller = Arc::clone(&self);
            tokio::spawn(async move {
                while controller.process_next().await {}
                debug!(worker, "Worker stopped");
            })
        });
        for joined in join_all(handles).await {
            if let Err(err) = joined {
                error!(error = %err, "Worker task failed");
            }
        }

        self.shutdown.shutdown("workers stopped");
        if let Err(err) = pump.await {
            error!(error = %err, "Watch pump failed");
        }
        stopper.abort();
        info!("Controller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotations::FINALIZER;
    use crate::errors::StoreError;
    use crate::ports::StoreOp;
    use crate::testing::{StageBuilder, TestHarness};
    use std::time::Duration;

    #[tokio::test]
    async fn test_process_next_schedules_poll() {
        let harness = TestHarness::new();
        let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());
        let controller = Controller::new(harness.ctx.clone());

        assert_eq!(controller.resync().await.unwrap(), 1);
        assert!(controller.process_next().await);

        assert!(controller.queue().is_empty());
        assert_eq!(controller.queue().num_requeues(&stage.key()), 0);
        assert!(harness.store.stage(&stage.key()).unwrap().metadata.has_finalizer(FINALIZER));
    }

    #[tokio::test]
    async fn test_failure_is_rate_limited() {
        let harness = TestHarness::new();
        let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").build());
        harness
            .store
            .fail_next(StoreOp::GetStage, StoreError::Unavailable("down".into()));
        let controller = Controller::new(harness.ctx.clone());

        controller.queue().add(stage.key());
        controller.process_next().await;
        assert_eq!(controller.queue().num_requeues(&stage.key()), 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let harness = TestHarness::new();
        let stage = harness.store.put_stage(StageBuilder::regular("ns", "test").direct("w").build());
        let controller = Arc::new(Controller::new(harness.ctx.clone()));
        let handle = tokio::spawn(Arc::clone(&controller).run(harness.store.subscribe()));

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let stored = harness.store.stage(&stage.key()).unwrap();
                if stored.status.conditions.get(crate::core::ConditionType::Ready).is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        controller.shutdown("test finished");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(controller.shutdown_signal().reason().as_deref(), Some("test finished"));
    }
}
