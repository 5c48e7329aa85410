use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Position of a context in the dispatched task list
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub usize);

impl ContextId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context failed: {0}")]
    Failed(String),

    #[error("failed to spawn context process: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for context process: {0}")]
    Wait(#[source] io::Error),

    #[error("context process exited with code {code}")]
    Exited { code: i32 },

    #[error("context process terminated: {0}")]
    Terminated(String),

    #[error("context cancelled")]
    Cancelled,
}

/// Runs one top-level task inside an isolated execution context
#[async_trait]
pub trait ContextLauncher<T>: Send + Sync {
    async fn launch(&self, context: ContextId, task: T) -> Result<(), ContextError>;
}

/// Runs each task through an async closure on its own tokio task
///
/// The closure must build everything the context needs (queue, pool, sink)
/// itself; nothing mutable is handed to it by the dispatcher. A
/// [`ContextError`] returned by the closure is kept as is; any other error
/// becomes [`ContextError::Failed`].
pub struct TaskLauncher<F> {
    f: F,
}

impl<F> TaskLauncher<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F, Fut> ContextLauncher<T> for TaskLauncher<F>
where
    T: Send + 'static,
    F: Fn(ContextId, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AnyError>> + Send,
{
    async fn launch(&self, context: ContextId, task: T) -> Result<(), ContextError> {
        (self.f)(context, task).await.map_err(|e| match e.downcast::<ContextError>() {
            Ok(e) => *e,
            Err(e) => ContextError::Failed(e.to_string()),
        })
    }
}

/// Runs each task in a child process
///
/// `args` builds the child's argument list from the context and task.
/// The child inherits stdout and stderr, so its records reach the console
/// directly. Children are killed when the shutdown token fires.
pub struct ProcessLauncher<A> {
    program: PathBuf,
    args: A,
    shutdown: CancellationToken,
}

impl<A> ProcessLauncher<A> {
    pub fn new(program: impl Into<PathBuf>, args: A) -> Self {
        Self {
            program: program.into(),
            args,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

#[async_trait]
impl<T, A> ContextLauncher<T> for ProcessLauncher<A>
where
    T: Send + 'static,
    A: Fn(ContextId, &T) -> Vec<String> + Send + Sync,
{
    async fn launch(&self, context: ContextId, task: T) -> Result<(), ContextError> {
        let args = (self.args)(context, &task);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ContextError::Spawn)?;

        debug!(%context, pid = ?child.id(), program = %self.program.display(), "Context process spawned");

        let status = tokio::select! {
            status = child.wait() => status.map_err(ContextError::Wait)?,
            _ = self.shutdown.cancelled() => {
                warn!(%context, "Killing context process on shutdown");
                if let Err(e) = child.kill().await {
                    warn!(%context, error = %e, "Failed to kill context process");
                }
                return Err(ContextError::Cancelled);
            }
        };

        if status.success() {
            return Ok(());
        }

        match status.code() {
            Some(code) => Err(ContextError::Exited { code }),
            None => Err(ContextError::Terminated(status.to_string())),
        }
    }
}
