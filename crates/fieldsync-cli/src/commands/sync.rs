use fieldsync_core::{SyncMetadata, SyncStatus};

use crate::commands::common::{print_json, CliEngine};
use crate::error::CliError;

pub async fn run_sync(engine: &CliEngine, as_json: bool) -> Result<(), CliError> {
    let metadata = engine.orchestrator().run_manual().await;
    if as_json {
        return print_json(&metadata);
    }
    println!("{}", describe_sync(&metadata));
    Ok(())
}

/// One-line summary of a sync outcome.
pub fn describe_sync(metadata: &SyncMetadata) -> String {
    match &metadata.status {
        SyncStatus::NotAsked => "Never synced".to_string(),
        SyncStatus::Loading { revision, .. } => format!("Sync in progress after revision {revision}"),
        SyncStatus::Success { .. } if metadata.remaining > 0 => format!(
            "Sync paused with {} records remaining; run `fieldsync sync` again",
            metadata.remaining
        ),
        SyncStatus::Success { .. } => "Sync completed".to_string(),
        SyncStatus::NoCredentials { .. } => {
            "Sync skipped: device is not paired (run `fieldsync pair`)".to_string()
        }
        SyncStatus::NetworkError { message, .. } => {
            format!("Sync failed, backend unreachable: {message}")
        }
        SyncStatus::BadResponse {
            status,
            status_text,
            ..
        } => format!("Sync failed: backend answered {status} {status_text}"),
        SyncStatus::BadJson { .. } => "Sync failed: backend sent an unreadable batch".to_string(),
        SyncStatus::DatabaseError { message, .. } => {
            format!("Sync failed: local store error: {message}")
        }
    }
}
