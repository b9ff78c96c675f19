//! Error types for warden-core

use thiserror::Error;

use crate::config::ConfigError;

/// Top-level error type for the compliance engine
#[derive(Debug, Error)]
pub enum WardenError {
    /// The engine is locked; no further actions are accepted until a manual reset
    #[error("Engine is locked: {0}")]
    Locked(String),

    /// An operation that needs the background tasks was called before `start()`
    #[error("Engine not started")]
    NotStarted,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Audit log error: {0}")]
    AuditLog(#[from] AuditLogError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),
}

/// Errors from the append-only audit sink
#[derive(Debug, Error)]
pub enum AuditLogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize entry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Audit writer closed")]
    Closed,
}

/// Errors from alert delivery
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Sink responded with status {0}")]
    Status(u16),

    #[error("Failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised inside a single detector evaluation
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Detector panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, WardenError>;
