//! fieldsync-core - Core library for fieldsync
//!
//! This crate contains the local store, credential cache, request router,
//! sync orchestrator, upload and telemetry queues, and the background worker
//! that drives them. The CLI and local API server are thin shells around it.

pub mod cache;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod router;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod transport;
pub mod uploads;
pub mod util;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use error::{Error, Result};
pub use models::{Credentials, SyncMetadata, SyncStatus};
pub use transport::{HttpClient, ReqwestClient};
pub use worker::{Worker, WorkerError, WorkerEvent, WorkerHandle, WorkerMessage};
