//! Error types for aide-frame

use thiserror::Error;

/// Main error type for the framework and its update core
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Size exceeded: response larger than {limit} bytes")]
    SizeExceeded { limit: u64 },

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Apply error: {0}")]
    Apply(String),

    #[error("Rollback error: {0}")]
    Rollback(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Path security error: {0}")]
    PathSecurity(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FrameError {
    /// Transient failures are safe to retry from `idle` / `update_available`
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FrameError::Network(_)
                | FrameError::Timeout(_)
                | FrameError::SizeExceeded { .. }
                | FrameError::HttpError(_)
        )
    }

    /// Whether a check may retry this failure
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FrameError::Network(_) | FrameError::Timeout(_) | FrameError::RemoteUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for FrameError {
    fn from(err: anyhow::Error) -> Self {
        FrameError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FrameError {
    fn from(err: tokio::task::JoinError) -> Self {
        FrameError::Internal(format!("task failed: {}", err))
    }
}
