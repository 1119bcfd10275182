//! Unified error types for Station.

use thiserror::Error;

/// Result type alias using StationError.
pub type Result<T> = std::result::Result<T, StationError>;

#[derive(Error, Debug)]
pub enum StationError {
    // Declined operations, surfaced to the caller as-is
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Queue is empty")]
    QueueEmpty,

    // Execution errors, captured on the owning room or task
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    // Lease store errors
    #[error("Lease store error: {0}")]
    Lease(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),
}

impl StationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn busy(what: impl Into<String>) -> Self {
        Self::Busy(what.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteCall(msg.into())
    }

    pub fn lease(msg: impl Into<String>) -> Self {
        Self::Lease(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for errors the core hands back to the caller instead of storing
    /// on a room or task.
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Busy(_) | Self::QueueEmpty)
    }
}
