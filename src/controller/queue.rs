//! Deduplicating work queue with per-key exponential backoff
//!
//! A key is in at most one of three places: waiting in the queue, being processed
//! by a worker, or nowhere. Adding a key that is already waiting is a no-op;
//! adding a key that is being processed marks it dirty so it is queued again when
//! the worker calls [`WorkQueue::done`]. No key is ever handed to two workers at
//! once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

struct QueueState<K> {
    queue: VecDeque<K>,
    /// Keys that need processing, waiting or not
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> Default for WorkQueue<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                shutting_down: false,
            }),
            notify: Notify::new(),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `key` as needing processing
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down || !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for the next key; `None` once the queue is shut down and drained
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Finish processing `key`, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ExponentialBackoff<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<K, u32>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a failure of `key` and return how long to wait before retrying it
    pub fn when(&self, key: &K) -> Duration {
        let mut failures = self.failures();
        let attempt = failures.entry(key.clone()).or_insert(0);
        let exponent = *attempt;
        *attempt = attempt.saturating_add(1);

        self.base
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max)
    }

    /// Clear the failure history of `key`
    pub fn forget(&self, key: &K) {
        self.failures().remove(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures().get(key).copied().unwrap_or(0)
    }
}

/// [`WorkQueue`] plus delayed and rate-limited adds
pub struct RateLimitingQueue<K> {
    queue: Arc<WorkQueue<K>>,
    limiter: ExponentialBackoff<K>,
}

impl<K> RateLimitingQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    pub fn new(limiter: ExponentialBackoff<K>) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            limiter,
        }
    }

    pub fn add(&self, key: K) {
        self.queue.add(key);
    }

    /// Add `key` once `delay` has passed
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            self.queue.add(key);
            return;
        }
        trace!("Requeueing {:?} in {:?}", key, delay);
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Add `key` after its current backoff delay
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Reset the backoff of `key` after a successful reconcile
    pub fn forget(&self, key: &K) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &K) -> u32 {
        self.limiter.num_requeues(key)
    }

    pub async fn get(&self) -> Option<K> {
        self.queue.get().await
    }

    pub fn done(&self, key: &K) {
        self.queue.done(key);
    }

    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
