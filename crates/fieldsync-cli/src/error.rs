use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] fieldsync_core::Error),
    #[error(transparent)]
    Config(#[from] fieldsync_core::ConfigError),
    #[error(transparent)]
    Transport(#[from] fieldsync_core::transport::TransportError),
    #[error(transparent)]
    Worker(#[from] fieldsync_core::WorkerError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("This device is not paired. Run `fieldsync pair` first.")]
    NotPaired,
    #[error("No pending upload for {0}")]
    UploadNotFound(String),
}
