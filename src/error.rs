//! Error types for the analysis engine

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {

    // =============================
    // Construction
    // =============================

    /// Missing or invalid provider settings. Fatal: the engine is never built.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single orchestration strategy could not wire backend and capabilities.
    #[error("Orchestration construction error: {0}")]
    Construction(String),

    // =============================
    // Query-time Errors
    // =============================

    /// Malformed or incompatible backend output; recovered inside the loop.
    #[error("Backend protocol error: {0}")]
    BackendProtocol(String),

    /// Transport or provider-side failure of the reasoning backend.
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Duplicate capability: {0}")]
    DuplicateCapability(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("SQL error: {0}")]
    SqlError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl EngineError {
    /// Errors the reasoning loop folds back into the transcript instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::BackendProtocol(_) | EngineError::Timeout(_))
    }
}
