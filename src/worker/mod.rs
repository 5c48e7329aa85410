//! Worker pool draining a [`WorkQueue`](crate::queue::WorkQueue)
//!
//! A pool runs a fixed number of tokio tasks. Each one pops an item,
//! hands it to a [`TaskRunner`], then acknowledges it, until the pool's
//! cancellation token fires.

pub mod http;
pub mod pool;
pub mod runner;

pub use http::{FetchError, Fetcher, HttpConfig, HttpFetcher};
pub use pool::{PoolOptions, WorkerPool};
pub use runner::{FetchRunner, TaskRunner, WorkerLabel};
