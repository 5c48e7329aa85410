//! Top-level tasks and the per-context routine that drains them

use crate::dispatch::ContextError;
use crate::observability::{Metrics, MetricsSnapshot};
use crate::queue::WorkQueue;
use crate::sink::SynchronizedSink;
use crate::worker::{FetchRunner, Fetcher, PoolOptions, WorkerPool};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A named list of URLs fetched inside one execution context
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Batch {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

impl Batch {
    pub fn new(name: impl Into<String>, urls: Vec<String>) -> Self {
        Self {
            name: name.into(),
            urls,
        }
    }
}

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch '{batch}' needs at least one worker")]
    NoWorkers { batch: String },

    #[error("batch '{batch}' interrupted after {processed} of {total} items")]
    Interrupted {
        batch: String,
        processed: u64,
        total: usize,
    },
}

impl From<BatchError> for ContextError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::Interrupted { .. } => ContextError::Cancelled,
            other => ContextError::Failed(other.to_string()),
        }
    }
}

/// What one context did with its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub items: usize,
    pub elapsed_ms: u64,
    pub metrics: MetricsSnapshot,
}

/// Everything an execution context owns while draining a batch
///
/// Nothing here is shared with sibling contexts: each context builds its
/// own `BatchContext` with its own sink.
pub struct BatchContext<W> {
    pub label: String,
    pub workers: usize,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<SynchronizedSink<W>>,
    pub shutdown: CancellationToken,
}

impl<W> BatchContext<W>
where
    W: Write + Send + 'static,
{
    /// Fetch every URL of `batch` with a fresh queue and worker pool
    ///
    /// Returns once the queue is drained and the pool is shut down,
    /// or early with [`BatchError::Interrupted`] if the shutdown token fires.
    /// A context configured with zero workers fails with [`BatchError::NoWorkers`].
    pub async fn run(&self, batch: &Batch) -> Result<BatchSummary, BatchError> {
        if self.workers == 0 {
            return Err(BatchError::NoWorkers {
                batch: batch.name.clone(),
            });
        }

        let started = Instant::now();
        let metrics = Arc::new(Metrics::new());
        let runner = Arc::new(FetchRunner::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.sink),
            Arc::clone(&metrics),
        ));

        let pool = WorkerPool::spawn_with(
            WorkQueue::new(),
            self.workers,
            runner,
            PoolOptions::new(self.label.as_str())
                .with_shutdown(self.shutdown.child_token())
                .with_metrics(Arc::clone(&metrics)),
        );

        let total = pool.load(batch.urls.iter().cloned());
        info!(context = %self.label, batch = %batch.name, total, workers = self.workers, "Batch loaded");

        let interrupted = tokio::select! {
            _ = pool.join() => false,
            _ = self.shutdown.cancelled() => true,
        };

        let processed = pool.queue().acknowledged();
        pool.shutdown().await;

        if interrupted {
            warn!(context = %self.label, batch = %batch.name, processed, total, "Batch interrupted");
            return Err(BatchError::Interrupted {
                batch: batch.name.clone(),
                processed,
                total,
            });
        }

        let summary = BatchSummary {
            items: total,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            metrics: metrics.snapshot(),
        };

        info!(
            context = %self.label,
            batch = %batch.name,
            items = summary.items,
            succeeded = summary.metrics.items_succeeded,
            failed = summary.metrics.items_failed,
            elapsed_ms = summary.elapsed_ms,
            "Batch finished"
        );

        Ok(summary)
    }
}
