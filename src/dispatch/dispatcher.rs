use super::launcher::{ContextError, ContextId, ContextLauncher};
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

/// Final state of one execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ContextStatus {
    Completed,
    /// The context ran and reported an error
    Failed(String),
    /// The context died abnormally (panic, signal)
    Crashed(String),
    /// Stopped by shutdown before finishing
    Cancelled,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextStatus::Completed => write!(f, "completed"),
            ContextStatus::Failed(reason) => write!(f, "failed: {}", reason),
            ContextStatus::Crashed(reason) => write!(f, "crashed: {}", reason),
            ContextStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<ContextError> for ContextStatus {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::Terminated(_) => ContextStatus::Crashed(error.to_string()),
            ContextError::Cancelled => ContextStatus::Cancelled,
            other => ContextStatus::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOutcome {
    pub context: ContextId,
    pub status: ContextStatus,
}

impl ContextOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == ContextStatus::Completed
    }

    fn from_join(context: ContextId, joined: Result<Result<(), ContextError>, JoinError>) -> Self {
        let status = match joined {
            Ok(Ok(())) => ContextStatus::Completed,
            Ok(Err(e)) => e.into(),
            Err(e) if e.is_panic() => ContextStatus::Crashed(panic_message(e.into_panic())),
            Err(_) => ContextStatus::Cancelled,
        };
        Self { context, status }
    }
}

/// One outcome per dispatched task, in input order
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    outcomes: Vec<ContextOutcome>,
}

impl DispatchReport {
    pub fn outcomes(&self) -> &[ContextOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    /// Outcomes of contexts that did not complete
    pub fn failures(&self) -> impl Iterator<Item = &ContextOutcome> {
        self.outcomes.iter().filter(|o| !o.is_completed())
    }

    pub fn all_completed(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Runs one isolated context per task with bounded parallelism
///
/// `dispatch` is a barrier: it returns after every context has finished,
/// whether it completed or not. Contexts start in input order; completion
/// order is unspecified.
#[derive(Debug, Clone, Copy)]
pub struct ProcessDispatcher {
    parallelism: NonZeroUsize,
}

impl ProcessDispatcher {
    /// `0` selects the available hardware concurrency
    pub fn new(parallelism: usize) -> Self {
        let parallelism = NonZeroUsize::new(parallelism).unwrap_or_else(available_parallelism);
        Self { parallelism }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism.get()
    }

    pub async fn dispatch<T, L>(&self, tasks: Vec<T>, launcher: Arc<L>) -> DispatchReport
    where
        T: Send + 'static,
        L: ContextLauncher<T> + ?Sized + 'static,
    {
        let total = tasks.len();
        info!(total, parallelism = self.parallelism(), "Dispatching contexts");

        // The stream is pulled lazily, so at most `parallelism` contexts are
        // spawned at any time and they are spawned in input order.
        let mut outcomes: Vec<ContextOutcome> = stream::iter(tasks.into_iter().enumerate())
            .map(|(index, task)| {
                let context = ContextId(index);
                let launcher = Arc::clone(&launcher);
                debug!(%context, "Context started");
                let handle = tokio::spawn(async move { launcher.launch(context, task).await });
                async move {
                    let outcome = ContextOutcome::from_join(context, handle.await);
                    match &outcome.status {
                        ContextStatus::Completed => debug!(%context, "Context completed"),
                        ContextStatus::Cancelled => warn!(%context, "Context cancelled"),
                        status => error!(%context, %status, "Context did not complete"),
                    }
                    outcome
                }
            })
            .buffer_unordered(self.parallelism())
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.context);

        let report = DispatchReport { outcomes };
        info!(
            total,
            completed = report.completed(),
            "All contexts finished"
        );
        report
    }
}

impl Default for ProcessDispatcher {
    fn default() -> Self {
        Self::new(0)
    }
}

fn available_parallelism() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
