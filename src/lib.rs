pub mod batch;
pub mod config;
pub mod dispatch;
pub mod humanize;
pub mod observability;
pub mod queue;
pub mod sink;
pub mod worker;
