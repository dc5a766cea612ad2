//! Error types for the gold investment agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, GoldAgentError>;

#[derive(Error, Debug)]
pub enum GoldAgentError {

    // =============================
    // Collaborator Errors
    // =============================

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Price oracle error: {0}")]
    PriceError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // Local Errors
    // =============================

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for GoldAgentError {
    fn from(error: sqlx::Error) -> Self {
        GoldAgentError::DatabaseError(error.to_string())
    }
}
