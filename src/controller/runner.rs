//! Drives a reconciler from a rate-limited work queue
//!
//! Every controller owns one queue and one logical key. The key is enqueued at
//! start, on every forced resync tick and on every trigger event; workers pull it,
//! run the reconciler and either forget its backoff (success) or requeue it with
//! backoff (failure).

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::queue::{ExponentialBackoff, RateLimitingQueue};
use crate::config::ControllerSettings;
use crate::crd::INSTANCE_NAME;
use crate::error::Result;

/// One pass of a reconciler over its logical key
#[async_trait]
pub trait Reconcile: Send + Sync {
    /// Name used in logs and metrics, e.g. "webconsole"
    fn name(&self) -> &str;

    async fn reconcile(&self, key: &str) -> Result<()>;
}

pub struct Controller<R> {
    reconciler: Arc<R>,
    queue: Arc<RateLimitingQueue<String>>,
    key: String,
    workers: usize,
    resync_period: Duration,
    triggers: Vec<BoxStream<'static, ()>>,
}

impl<R> Controller<R>
where
    R: Reconcile + 'static,
{
    pub fn new(reconciler: R, settings: &ControllerSettings) -> Self {
        let limiter = ExponentialBackoff::new(settings.backoff_base(), settings.backoff_max());
        Self {
            reconciler: Arc::new(reconciler),
            queue: Arc::new(RateLimitingQueue::new(limiter)),
            key: INSTANCE_NAME.to_string(),
            workers: settings.workers.max(1),
            resync_period: settings.resync_period(),
            triggers: Vec::new(),
        }
    }

    /// Enqueue the key whenever `trigger` yields
    pub fn trigger_on(mut self, trigger: impl Stream<Item = ()> + Send + 'static) -> Self {
        self.triggers.push(trigger.boxed());
        self
    }

    pub fn queue(&self) -> Arc<RateLimitingQueue<String>> {
        Arc::clone(&self.queue)
    }

    /// Run until `shutdown` resolves; in-flight reconciles are allowed to finish
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) {
        let name = self.reconciler.name().to_string();
        info!(
            "Starting controller {} with {} worker(s), resync every {:?}",
            name, self.workers, self.resync_period
        );

        self.queue.add(self.key.clone());

        let mut feeders: Vec<JoinHandle<()>> = Vec::new();
        feeders.push(tokio::spawn(resync(
            Arc::clone(&self.queue),
            self.key.clone(),
            self.resync_period,
        )));
        for trigger in self.triggers {
            feeders.push(tokio::spawn(forward(
                trigger,
                Arc::clone(&self.queue),
                self.key.clone(),
            )));
        }

        let workers: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|_| {
                let reconciler = Arc::clone(&self.reconciler);
                let queue = Arc::clone(&self.queue);
                tokio::spawn(async move {
                    while process_next_item(reconciler.as_ref(), &queue).await {}
                })
            })
            .collect();

        shutdown.await;
        info!("Shutting down controller {}", name);
        self.queue.shut_down();
        for feeder in &feeders {
            feeder.abort();
        }
        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                error!("Controller {} worker failed: {}", name, e);
            }
        }
    }
}

async fn resync(queue: Arc<RateLimitingQueue<String>>, key: String, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if queue.is_shutting_down() {
            return;
        }
        debug!("Resync of {}", key);
        queue.add(key.clone());
    }
}

async fn forward(
    mut trigger: BoxStream<'static, ()>,
    queue: Arc<RateLimitingQueue<String>>,
    key: String,
) {
    while trigger.next().await.is_some() {
        queue.add(key.clone());
    }
}

/// Process one key; `false` once the queue is shut down
pub(crate) async fn process_next_item<R>(reconciler: &R, queue: &RateLimitingQueue<String>) -> bool
where
    R: Reconcile + ?Sized,
{
    let Some(key) = queue.get().await else {
        return false;
    };

    let start = Instant::now();
    let span = info_span!("reconcile", controller = %reconciler.name(), key = %key);
    let result = reconciler.reconcile(&key).instrument(span).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        reconciler.name(),
        start.elapsed().as_secs_f64(),
    );

    match result {
        Ok(()) => {
            debug!("Reconciled {} in {:?}", key, start.elapsed());
            queue.forget(&key);
        }
        Err(e) => {
            error!(
                "Reconcile of {} by {} failed (retry {}): {}",
                key,
                reconciler.name(),
                queue.num_requeues(&key) + 1,
                e
            );
            #[cfg(feature = "metrics")]
            {
                super::metrics::inc_reconcile_error(reconciler.name(), &e);
                super::metrics::inc_workqueue_retry(reconciler.name());
            }
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
    true
}

/// Turn a watch on any kind into a stream of "something changed" events
pub fn watch_trigger<K>(api: Api<K>) -> impl Stream<Item = ()> + Send + 'static
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(_) => Some(()),
                Err(e) => {
                    warn!("Watch error: {}", e);
                    None
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;

    use super::*;
    use crate::error::Error;

    struct Counting {
        calls: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait]
    impl Reconcile for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn reconcile(&self, key: &str) -> Result<()> {
            assert_eq!(key, INSTANCE_NAME);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(Error::StoreError("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn settings(resync_secs: u64) -> ControllerSettings {
        ControllerSettings {
            resync_period_secs: resync_secs,
            backoff_base_millis: 100,
            backoff_max_secs: 10,
            workers: 1,
        }
    }

    fn counting(failures: usize) -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                calls: Arc::clone(&calls),
                failures,
            },
            calls,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_reenqueues_without_triggers() {
        let (reconciler, calls) = counting(0);
        let controller = Controller::new(reconciler, &settings(10));

        controller
            .run(tokio::time::sleep(Duration::from_secs(25)))
            .await;

        // start, then t=10s and t=20s
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_retry_with_backoff_then_forget() {
        let (reconciler, calls) = counting(2);
        let controller = Controller::new(reconciler, &settings(3600));
        let queue = controller.queue();

        controller
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.num_requeues(&INSTANCE_NAME.to_string()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_keeps_backing_off() {
        let (reconciler, calls) = counting(usize::MAX);
        let controller = Controller::new(reconciler, &settings(3600));
        let queue = controller.queue();

        // retries at 0.1, 0.3, 0.7, 1.5, 3.1 seconds
        controller
            .run(tokio::time::sleep(Duration::from_secs(2)))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(queue.num_requeues(&INSTANCE_NAME.to_string()), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_events_collapse_into_queue() {
        let (reconciler, calls) = counting(0);
        let events = stream::iter(vec![(); 5]);
        let controller = Controller::new(reconciler, &settings(3600)).trigger_on(events);

        controller
            .run(tokio::time::sleep(Duration::from_secs(1)))
            .await;

        let calls = calls.load(Ordering::SeqCst);
        assert!((1..=3).contains(&calls), "got {calls} reconciles");
    }

    #[tokio::test]
    async fn test_process_next_item_stops_after_shutdown() {
        let (reconciler, _) = counting(0);
        let queue = RateLimitingQueue::new(ExponentialBackoff::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
        ));
        queue.add(INSTANCE_NAME.to_string());
        queue.shut_down();

        assert!(process_next_item(&reconciler, &queue).await);
        assert!(!process_next_item(&reconciler, &queue).await);
    }
}
