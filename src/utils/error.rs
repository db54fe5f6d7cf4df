use thiserror::Error;

/// Error types raised by the security services and their backing stores
#[derive(Error, Debug)]
pub enum SecurityError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Redis related errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backing store failures that are not tied to a specific driver
    #[error("Store error: {0}")]
    Store(String),

    /// Entry (de)serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for security service operations
pub type SecurityResult<T> = Result<T, SecurityError>;
