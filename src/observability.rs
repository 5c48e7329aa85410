//! Logging setup and per-pool counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber
///
/// Logs go to stderr so the record stream on stdout stays machine-readable.
/// Filtering follows `RUST_LOG`, defaulting to `info`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // A second init (tests, re-entry) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Metrics handle for counting processed work items
#[derive(Debug, Default)]
pub struct Metrics {
    items_succeeded: AtomicU64,
    items_failed: AtomicU64,
    items_panicked: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_succeeded(&self) {
        self.items_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "items_succeeded", "Metric incremented");
    }

    pub fn item_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "items_failed", "Metric incremented");
    }

    pub fn item_panicked(&self) {
        self.items_panicked.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "items_panicked", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_succeeded: self.items_succeeded.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            items_panicked: self.items_panicked.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub items_succeeded: u64,
    pub items_failed: u64,
    pub items_panicked: u64,
}

impl MetricsSnapshot {
    pub fn total(&self) -> u64 {
        self.items_succeeded + self.items_failed + self.items_panicked
    }
}
