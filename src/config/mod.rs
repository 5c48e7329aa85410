//! Configuration management for fetchpool
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use fetchpool::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Workers per context: {}", config.pool.workers);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `FETCHPOOL__<section>__<key>`
//!
//! Examples:
//! - `FETCHPOOL__POOL__WORKERS=10`
//! - `FETCHPOOL__DISPATCHER__ISOLATION=task`
//! - `FETCHPOOL__HTTP__REQUEST_TIMEOUT=30s`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/fetchpool.toml`.
//! This can be overridden using the `FETCHPOOL_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::HumanDuration;
pub use models::{Config, DispatcherConfig, HttpSettings, OutputConfig, PoolConfig};
pub use sources::CONFIG_ENV_VAR;
pub use validation::ValidationError;

use crate::batch::Batch;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`FETCHPOOL__*`)
    /// 2. TOML file (default: `config/fetchpool.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (no batches, duplicate names, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load from `path` (or the default location) without validating
    ///
    /// For callers that adjust the result, e.g. with CLI flags, and
    /// validate afterwards.
    pub fn load_unvalidated(path: Option<std::path::PathBuf>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let _ = dotenvy::dotenv();
                sources::load_from_sources(path)?
            }
            None => sources::load()?,
        };
        Ok(config)
    }

    /// Re-check the configuration after programmatic changes
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }

    pub fn batch(&self, name: &str) -> Option<&Batch> {
        self.batches.iter().find(|b| b.name == name)
    }
}
