//! Incremental pull sync between the backend and the local store.

mod orchestrator;
mod protocol;

pub use crate::models::{SyncMetadata, SyncStatus};
pub use orchestrator::{SyncOrchestrator, SyncSettings};
pub use protocol::{refresh_url, sync_url, ParsedBatch, ProtocolError, RefreshResponse};
