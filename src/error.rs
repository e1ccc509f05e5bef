//! Error types for the cache and scheduler.

/// Top-level error type for the refresh-cache service.
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    /// Upstream fetch failed (network, status, or decode).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Credential lookup failed.
    #[error("credential error: {0}")]
    Credential(String),

    /// Failure reported by a scheduled task's action.
    #[error("task error: {0}")]
    Task(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PulseError>;
