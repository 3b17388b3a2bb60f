//! Data models for fieldsync

mod credentials;
mod record;
mod sync_status;

pub use credentials::Credentials;
pub use record::{Record, RecordError, STATISTICS_TYPE};
pub use sync_status::{SyncMetadata, SyncStatus, DEFAULT_SCOPE};
