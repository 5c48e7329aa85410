use super::models::Config;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Worker pool needs at least one worker")]
    NoWorkers,

    #[error("No batches configured (at least one [[batches]] entry is required)")]
    NoBatchesConfigured,

    #[error("Batch #{index} has an empty name")]
    EmptyBatchName { index: usize },

    #[error("Batch name '{name}' is used more than once")]
    DuplicateBatchName { name: String },

    #[error("HTTP timeout must be positive: {field}")]
    ZeroTimeout { field: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_pool(config)?;
    validate_batches(config)?;
    validate_http(config)?;
    Ok(())
}

fn validate_pool(config: &Config) -> Result<(), ValidationError> {
    if config.pool.workers == 0 {
        return Err(ValidationError::NoWorkers);
    }
    Ok(())
}

/// Batch names select the batch inside a child process, so they must be unique
fn validate_batches(config: &Config) -> Result<(), ValidationError> {
    if config.batches.is_empty() {
        return Err(ValidationError::NoBatchesConfigured);
    }

    let mut seen = HashSet::new();
    for (index, batch) in config.batches.iter().enumerate() {
        if batch.name.trim().is_empty() {
            return Err(ValidationError::EmptyBatchName { index });
        }
        if !seen.insert(batch.name.as_str()) {
            return Err(ValidationError::DuplicateBatchName {
                name: batch.name.clone(),
            });
        }
        if batch.urls.is_empty() {
            tracing::warn!(batch = %batch.name, "Batch has no URLs");
        }
    }

    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    if config.http.connect_timeout.is_zero() {
        return Err(ValidationError::ZeroTimeout {
            field: "connect_timeout".to_string(),
        });
    }
    if config.http.request_timeout.is_zero() {
        return Err(ValidationError::ZeroTimeout {
            field: "request_timeout".to_string(),
        });
    }
    Ok(())
}
