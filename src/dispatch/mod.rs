//! Bounded fan-out of top-level tasks across isolated execution contexts
//!
//! The [`ProcessDispatcher`] runs one context per task, at most `P` at a
//! time, and returns only after every context has finished. How a context
//! is isolated is up to the [`ContextLauncher`]:
//!
//! - [`ProcessLauncher`] starts a child OS process per context. A crash in
//!   one child cannot affect its siblings.
//! - [`TaskLauncher`] runs a closure on its own tokio task. Contexts share
//!   the address space but no mutable state; panics are contained by the
//!   task boundary.

mod dispatcher;
mod launcher;

pub use dispatcher::{ContextOutcome, ContextStatus, DispatchReport, ProcessDispatcher};
pub use launcher::{AnyError, ContextError, ContextId, ContextLauncher, ProcessLauncher, TaskLauncher};

use serde::{Deserialize, Serialize};

/// Isolation boundary used for each execution context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// One child process per context
    #[default]
    Process,
    /// One tokio task per context
    Task,
}
