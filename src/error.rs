use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the harvesting pipeline.
///
/// Only `Launch` and `Navigation` abort a run. The rest are raised by the
/// browser layer and absorbed by the step that issued the call.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("page evaluation failed: {0}")]
    Evaluate(String),
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl HarvestError {
    /// Whether the run can go on after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarvestError::Launch(_) | HarvestError::Navigation { .. })
    }
}
