//! Error types for Tollgate
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::llm::InferenceError;

/// All error types that can occur in Tollgate
#[derive(Debug, Error)]
pub enum TollgateError {
    /// Backing store unreachable or failed an operation
    #[error("Store error: {0}")]
    Store(String),

    /// A queued or logged payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Inference endpoint error
    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Resource snapshot could not be taken
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// A mandatory dependency was unavailable when the loop started
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Unknown role name
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;
