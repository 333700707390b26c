//! De-duplicating work queue keyed by Stage.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already queued is a no-op; adding a key that is being processed marks it
//! dirty so it is queued again when the worker calls [`WorkQueue::done`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

use super::retry::RetryConfig;
use crate::core::ObjectKey;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    shutting_down: bool,
}

/// Per-key work queue with delayed and rate-limited adds.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    failures: DashMap<ObjectKey, usize>,
    delayed: DashMap<ObjectKey, Instant>,
    backoff: RetryConfig,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(RetryConfig::requeue())
    }
}

impl WorkQueue {
    /// Creates a queue using `backoff` for rate-limited adds.
    #[must_use]
    pub fn new(backoff: RetryConfig) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            failures: DashMap::new(),
            delayed: DashMap::new(),
            backoff,
        }
    }

    /// Queues a key.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            trace!(key = %key, "Key is being processed; marked dirty");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queues a key after `delay`.
    ///
    /// Each key has at most one live timer. A call whose deadline is not
    /// earlier than the pending one is dropped; an earlier deadline replaces
    /// it and the later timer fires as a no-op.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        match self.delayed.entry(key.clone()) {
            Entry::Occupied(mut pending) => {
                if *pending.get() <= deadline {
                    trace!(key = %key, "Earlier delayed add already pending");
                    return;
                }
                pending.insert(deadline);
            }
            Entry::Vacant(slot) => {
                slot.insert(deadline);
            }
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if queue.delayed.remove_if(&key, |_, pending| *pending == deadline).is_some() {
                queue.add(key);
            }
        });
    }

    /// Returns the number of keys waiting on a delayed add.
    #[must_use]
    pub fn num_delayed(&self) -> usize {
        self.delayed.len()
    }

    /// Queues a key after a per-key backoff that grows with every call
    /// until [`WorkQueue::forget`] is called.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) {
        let attempt = {
            let mut failures = self.failures.entry(key.clone()).or_insert(0);
            let attempt = *failures;
            *failures += 1;
            attempt
        };
        let delay = self.backoff.delay_after(attempt, None);
        trace!(key = %key, attempt, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Rate-limited requeue");
        self.add_after(key, delay);
    }

    /// Resets the backoff of a key.
    pub fn forget(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Returns how many rate-limited requeues a key has accumulated.
    #[must_use]
    pub fn num_requeues(&self, key: &ObjectKey) -> usize {
        self.failures.get(key).map_or(0, |n| *n)
    }

    /// Waits for the next key. Returns `None` once the queue shuts down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
                self.notify.notified()
            };
            notified.await;
        }
    }

    /// Marks a key as no longer being processed.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stops handing out keys. Waiting workers receive `None`.
    pub fn shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Returns true once the queue is shutting down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    /// Returns the number of queued keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::retry::JitterStrategy;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("ns", name)
    }

    #[test]
    fn test_add_deduplicates() {
        let queue = WorkQueue::default();
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_get_waits_for_add() {
        let queue = WorkQueue::default();
        let mut get = task::spawn(queue.get());
        assert_pending!(get.poll());

        queue.add(key("a"));
        assert!(get.is_woken());
        assert_ready_eq!(get.poll(), Some(key("a")));
    }

    #[test]
    fn test_key_in_flight_is_not_handed_out_twice() {
        let queue = WorkQueue::default();
        queue.add(key("a"));
        assert_ready_eq!(task::spawn(queue.get()).poll(), Some(key("a")));

        queue.add(key("a"));
        assert!(queue.is_empty());
        let mut second = task::spawn(queue.get());
        assert_pending!(second.poll());

        queue.done(&key("a"));
        assert!(second.is_woken());
        assert_ready_eq!(second.poll(), Some(key("a")));
    }

    #[test]
    fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::default();
        queue.add(key("a"));
        assert_ready_eq!(task::spawn(queue.get()).poll(), Some(key("a")));
        queue.done(&key("a"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let queue = WorkQueue::default();
        let mut get = task::spawn(queue.get());
        assert_pending!(get.poll());

        queue.shutdown();
        assert!(get.is_woken());
        assert_ready_eq!(get.poll(), None);

        queue.add(key("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_add_after_delays_delivery() {
        let queue = Arc::new(WorkQueue::default());
        queue.add_after(key("a"), Duration::from_millis(10));
        assert!(queue.is_empty());

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));
    }

    #[tokio::test]
    async fn test_add_after_coalesces_timers_per_key() {
        let queue = Arc::new(WorkQueue::default());
        for _ in 0..5 {
            queue.add_after(key("a"), Duration::from_millis(20));
        }
        queue.add_after(key("b"), Duration::from_millis(20));
        assert_eq!(queue.num_delayed(), 2);

        let first = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        let mut got = vec![first.unwrap(), second.unwrap()];
        got.sort_by(|x, y| x.name.cmp(&y.name));
        assert_eq!(got, vec![key("a"), key("b")]);
        queue.done(&key("a"));
        queue.done(&key("b"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.num_delayed(), 0);
    }

    #[tokio::test]
    async fn test_earlier_deadline_replaces_pending_timer() {
        let queue = Arc::new(WorkQueue::default());
        queue.add_after(key("a"), Duration::from_secs(30));
        queue.add_after(key("a"), Duration::from_millis(10));
        assert_eq!(queue.num_delayed(), 1);

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));
        assert_eq!(queue.num_delayed(), 0);

        // A later deadline after the earlier one fired starts a new timer.
        queue.done(&key("a"));
        queue.add_after(key("a"), Duration::from_millis(10));
        assert_eq!(queue.num_delayed(), 1);
        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));
    }

    #[tokio::test]
    async fn test_rate_limited_requeues_are_counted() {
        let backoff = RetryConfig::new()
            .with_base_delay_ms(1)
            .with_jitter(JitterStrategy::None);
        let queue = Arc::new(WorkQueue::new(backoff));

        queue.add_rate_limited(key("a"));
        queue.add_rate_limited(key("a"));
        assert_eq!(queue.num_requeues(&key("a")), 2);

        let got = tokio::time::timeout(Duration::from_secs(1), queue.get()).await.unwrap();
        assert_eq!(got, Some(key("a")));

        queue.forget(&key("a"));
        assert_eq!(queue.num_requeues(&key("a")), 0);
    }
}
