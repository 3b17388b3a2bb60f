//! Error types for fieldsync-core

use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Outbound HTTP failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// Whether the error originated in the network layer rather than local storage.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
