//! Common error types for the CNPJ services

use thiserror::Error;

/// Common result type for CNPJ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the CNPJ services
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
