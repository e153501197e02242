//! Common error types for PDT

use thiserror::Error;

/// Common result type for PDT operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across PDT services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored JSON column could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request parameter or payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Migration dependencies form a cycle; holds the migrations that could not be ordered
    #[error("Migration dependency cycle between migrations {0:?}")]
    DependencyCycle(Vec<i64>),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::Validation`]
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Shorthand for [`Error::NotFound`]
    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        Error::NotFound(format!("{} {}", entity, id))
    }
}
