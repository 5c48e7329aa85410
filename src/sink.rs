//! Shared record writer for concurrent workers
//!
//! Every worker in an execution context reports through one
//! [`SynchronizedSink`]. A record is emitted while the sink's lock is held,
//! so fields of two records never interleave.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    #[error("record encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Rendering of records on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line human-readable block
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Result of fetching one work item, as reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FetchRecord {
    pub context: String,
    pub worker: String,
    pub url: String,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub at: String,
}

impl FetchRecord {
    pub fn new(
        context: impl Into<String>,
        worker: impl Into<String>,
        url: impl Into<String>,
        latency: Duration,
    ) -> Self {
        Self {
            context: context.into(),
            worker: worker.into(),
            url: url.into(),
            status: None,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            error: None,
            at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn render(&self, format: OutputFormat) -> Result<String, SinkError> {
        match format {
            OutputFormat::Json => {
                let mut line = serde_json::to_string(self)?;
                line.push('\n');
                Ok(line)
            }
            OutputFormat::Text => {
                let mut block = String::new();
                let status = self
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string());

                // Writing into a String cannot fail
                let _ = writeln!(block, "[{} {}] {}", self.context, self.worker, self.url);
                let _ = writeln!(block, "    status:  {}", status);
                let _ = writeln!(block, "    latency: {}ms", self.latency_ms);
                if let Some(error) = &self.error {
                    let _ = writeln!(block, "    error:   {}", error);
                }
                Ok(block)
            }
        }
    }
}

/// Mutex-guarded writer emitting one record at a time
#[derive(Debug)]
pub struct SynchronizedSink<W> {
    writer: Mutex<W>,
    format: OutputFormat,
    written: AtomicU64,
}

impl SynchronizedSink<io::Stdout> {
    /// Sink writing to this process's standard output
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write> SynchronizedSink<W> {
    pub fn new(writer: W, format: OutputFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
            written: AtomicU64::new(0),
        }
    }

    /// Emit a record as one uninterrupted block
    pub fn write(&self, record: &FetchRecord) -> Result<(), SinkError> {
        let rendered = record.render(self.format)?;

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(rendered.as_bytes())?;
        writer.flush()?;
        drop(writer);

        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Number of records emitted successfully
    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Inspect the underlying writer while holding the lock
    pub fn with_writer<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        f(&writer)
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
