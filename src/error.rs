//! Error types for Lesson Guide.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lesson store error: {0}")]
    Store(#[from] StoreError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lesson-store errors. Never cached by the lesson cache, so callers may retry.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Malformed lesson data: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the completion and guidance oracles.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Oracle {oracle} request failed: {reason}")]
    RequestFailed { oracle: String, reason: String },

    #[error("Invalid response from {oracle}: {reason}")]
    InvalidResponse { oracle: String, reason: String },

    #[error("Oracle {oracle} timed out after {timeout:?}")]
    Timeout { oracle: String, timeout: Duration },

    #[error("Authentication failed for oracle {oracle}")]
    AuthFailed { oracle: String },
}

/// Popup delivery errors. Logged by the engine, never surfaced as an outcome.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("No connected client to receive the popup")]
    NoSubscribers,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Popup relay rejected the message with status {status}")]
    Rejected { status: u16 },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
