use super::runner::{TaskRunner, WorkerLabel};
use crate::observability::Metrics;
use crate::queue::WorkQueue;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Settings for a [`WorkerPool`] beyond queue, size and runner
#[derive(Debug, Clone)]
pub struct PoolOptions {
    context: Arc<str>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
}

impl PoolOptions {
    pub fn new(context: impl Into<Arc<str>>) -> Self {
        Self {
            context: context.into(),
            shutdown: CancellationToken::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Stop the pool when this token is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Count panicking items into a shared metrics handle
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new("local")
    }
}

/// Fixed-size set of workers draining one [`WorkQueue`]
///
/// Workers run until [`shutdown`](Self::shutdown) is called or the pool's
/// token is cancelled; an empty queue does not stop them. This lets a pool
/// be loaded and joined several times.
///
/// Dropping the pool cancels its workers without waiting for them.
pub struct WorkerPool<T> {
    queue: WorkQueue<T>,
    context: Arc<str>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
    workers: Vec<JoinHandle<()>>,
}

impl<T> WorkerPool<T>
where
    T: Send + Sync + 'static,
{
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn spawn<R>(queue: WorkQueue<T>, size: usize, runner: Arc<R>) -> Self
    where
        R: TaskRunner<T> + ?Sized + 'static,
    {
        Self::spawn_with(queue, size, runner, PoolOptions::default())
    }

    /// Start `size` workers bound to `queue`
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero: a pool without workers never drains its queue.
    pub fn spawn_with<R>(
        queue: WorkQueue<T>,
        size: usize,
        runner: Arc<R>,
        options: PoolOptions,
    ) -> Self
    where
        R: TaskRunner<T> + ?Sized + 'static,
    {
        assert!(size > 0, "worker pool needs at least one worker");

        let PoolOptions {
            context,
            shutdown,
            metrics,
        } = options;

        let workers = (0..size)
            .map(|index| {
                tokio::spawn(work(
                    WorkerLabel::new(Arc::clone(&context), index),
                    queue.clone(),
                    Arc::clone(&runner),
                    shutdown.clone(),
                    Arc::clone(&metrics),
                ))
            })
            .collect();

        info!(context = %context, size, "Worker pool started");

        Self {
            queue,
            context,
            shutdown,
            metrics,
            workers,
        }
    }

    /// Queue items for the workers, returning how many were added
    pub fn load<I>(&self, items: I) -> usize
    where
        I: IntoIterator<Item = T>,
    {
        let added = self.queue.extend(items);
        debug!(context = %self.context, added, "Items loaded");
        added
    }

    /// Wait until every loaded item has been processed and acknowledged
    pub async fn join(&self) {
        self.queue.join().await;
    }

    pub fn queue(&self) -> &WorkQueue<T> {
        &self.queue
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Token that stops this pool when cancelled
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop every worker and wait for them to exit
    ///
    /// Items being processed are finished and acknowledged first;
    /// items still pending stay in the queue.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();

        for handle in std::mem::take(&mut self.workers) {
            if let Err(e) = handle.await {
                error!(context = %self.context, error = %e, "Worker exited abnormally");
            }
        }

        info!(
            context = %self.context,
            pending = self.queue.len(),
            "Worker pool stopped"
        );
    }
}

impl<T> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn work<T, R>(
    label: WorkerLabel,
    queue: WorkQueue<T>,
    runner: Arc<R>,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
) where
    T: Send + Sync + 'static,
    R: TaskRunner<T> + ?Sized,
{
    debug!(worker = %label, "Worker started");

    loop {
        let claim = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            claim = queue.pop() => claim,
        };

        let outcome = AssertUnwindSafe(runner.run(&label, claim.item()))
            .catch_unwind()
            .await;

        if outcome.is_err() {
            metrics.item_panicked();
            warn!(worker = %label, "Task runner panicked, item acknowledged anyway");
        }

        claim.ack();
    }

    debug!(worker = %label, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    /// Records which items were processed and by whom
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<HashMap<u32, usize>>,
        delay: Duration,
    }

    #[async_trait]
    impl TaskRunner<u32> for Recorder {
        async fn run(&self, _worker: &WorkerLabel, item: &u32) {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            *self.seen.lock().unwrap().entry(*item).or_default() += 1;
        }
    }

    struct Panicky;

    #[async_trait]
    impl TaskRunner<u32> for Panicky {
        async fn run(&self, _worker: &WorkerLabel, item: &u32) {
            if *item == 3 {
                panic!("item 3 is cursed");
            }
        }
    }

    #[tokio::test]
    async fn test_pool_processes_every_item_once() {
        let runner = Arc::new(Recorder {
            delay: Duration::from_millis(2),
            ..Default::default()
        });
        let pool = WorkerPool::spawn(WorkQueue::new(), 5, Arc::clone(&runner));
        assert_eq!(pool.size(), 5);

        assert_eq!(pool.load(0..50), 50);
        timeout(Duration::from_secs(5), pool.join()).await.unwrap();

        let seen = runner.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 50);
        assert!(seen.values().all(|&count| count == 1));
        assert_eq!(pool.queue().acknowledged(), 50);

        pool.shutdown().await;
    }

    #[tokio::test]
    #[should_panic(expected = "at least one worker")]
    async fn test_zero_workers_rejected() {
        let _pool = WorkerPool::spawn(WorkQueue::<u32>::new(), 0, Arc::new(Recorder::default()));
    }

    #[tokio::test]
    async fn test_pool_can_be_loaded_repeatedly() {
        let runner = Arc::new(Recorder::default());
        let pool = WorkerPool::spawn(WorkQueue::new(), 3, Arc::clone(&runner));

        pool.load(0..10);
        timeout(Duration::from_secs(5), pool.join()).await.unwrap();
        pool.load(10..25);
        timeout(Duration::from_secs(5), pool.join()).await.unwrap();

        assert_eq!(runner.seen.lock().unwrap().len(), 25);
        assert_eq!(pool.queue().acknowledged(), 25);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let queue = WorkQueue::new();
        let pool = WorkerPool::spawn(queue.clone(), 4, Arc::new(Recorder::default()));

        timeout(Duration::from_secs(1), pool.shutdown())
            .await
            .expect("idle workers should stop on shutdown");

        // Nothing is consuming any more
        queue.push(1);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_parent_token_stops_pool() {
        let parent = CancellationToken::new();
        let queue = WorkQueue::new();
        let pool = WorkerPool::spawn_with(
            queue.clone(),
            2,
            Arc::new(Recorder::default()),
            PoolOptions::new("ctx-test").with_shutdown(parent.child_token()),
        );

        parent.cancel();
        assert!(pool.shutdown_token().is_cancelled());
        timeout(Duration::from_secs(1), pool.shutdown()).await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_item_is_acknowledged() {
        let metrics = Arc::new(Metrics::new());
        let pool = WorkerPool::spawn_with(
            WorkQueue::new(),
            2,
            Arc::new(Panicky),
            PoolOptions::new("ctx-test").with_metrics(Arc::clone(&metrics)),
        );

        pool.load(0..10);
        timeout(Duration::from_secs(5), pool.join()).await.unwrap();

        assert_eq!(pool.queue().acknowledged(), 10);
        assert_eq!(metrics.snapshot().items_panicked, 1);
        pool.shutdown().await;
    }
}
