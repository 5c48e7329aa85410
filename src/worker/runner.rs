//! Task runner - executes one work item and reports it through the sink

use super::http::Fetcher;
use crate::observability::Metrics;
use crate::sink::{FetchRecord, SynchronizedSink};
use async_trait::async_trait;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Diagnostic identity of a worker: its context plus a pool-relative index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerLabel {
    pub context: Arc<str>,
    pub index: usize,
}

impl WorkerLabel {
    pub fn new(context: impl Into<Arc<str>>, index: usize) -> Self {
        Self {
            context: context.into(),
            index,
        }
    }

    /// Label without the context prefix, e.g. `worker-3`
    pub fn worker(&self) -> String {
        format!("worker-{}", self.index)
    }
}

impl fmt::Display for WorkerLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/worker-{}", self.context, self.index)
    }
}

/// Executes a single work item
///
/// Runners report results as side effects; nothing flows back to the pool.
/// Failures must be handled inside `run` so the worker keeps going.
#[async_trait]
pub trait TaskRunner<T>: Send + Sync {
    async fn run(&self, worker: &WorkerLabel, item: &T);
}

/// Fetches one URL per item and writes a [`FetchRecord`] for every attempt
pub struct FetchRunner<W> {
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<SynchronizedSink<W>>,
    metrics: Arc<Metrics>,
}

impl<W> FetchRunner<W> {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        sink: Arc<SynchronizedSink<W>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            fetcher,
            sink,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[async_trait]
impl<W> TaskRunner<String> for FetchRunner<W>
where
    W: Write + Send + 'static,
{
    async fn run(&self, worker: &WorkerLabel, url: &String) {
        let started = Instant::now();
        let result = self.fetcher.fetch(url).await;
        let latency = started.elapsed();

        let record = FetchRecord::new(&*worker.context, worker.worker(), url.as_str(), latency);
        let record = match result {
            Ok(status) => {
                self.metrics.item_succeeded();
                debug!(worker = %worker, url = %url, status, latency_ms = record.latency_ms, "Fetched");
                record.with_status(status)
            }
            Err(e) => {
                self.metrics.item_failed();
                warn!(worker = %worker, url = %url, error = %e, "Fetch failed");
                record.with_error(e.to_string())
            }
        };

        if let Err(e) = self.sink.write(&record) {
            error!(worker = %worker, url = %url, error = %e, "Failed to write record");
        }
    }
}
