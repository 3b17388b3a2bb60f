use fieldsync_core::SyncMetadata;
use serde::Serialize;

use crate::commands::common::{print_json, CliEngine};
use crate::commands::sync::describe_sync;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub paired: bool,
    pub backend_url: Option<String>,
    pub sync: SyncMetadata,
    pub pending_uploads: usize,
    pub queued_error_reports: usize,
}

pub async fn collect_status(engine: &CliEngine) -> Result<StatusReport, CliError> {
    let credentials = engine.credentials.load().await?;
    Ok(StatusReport {
        paired: credentials.is_some(),
        backend_url: credentials.map(|credentials| credentials.backend_base().to_string()),
        sync: engine.orchestrator().metadata().await?,
        pending_uploads: engine.uploads().pending_urls().await?.len(),
        queued_error_reports: engine.telemetry().queued().await?.len(),
    })
}

pub async fn run_status(engine: &CliEngine, as_json: bool) -> Result<(), CliError> {
    let report = collect_status(engine).await?;
    if as_json {
        return print_json(&report);
    }

    match &report.backend_url {
        Some(url) => println!("Paired with: {url}"),
        None => println!("Paired with: (not paired)"),
    }
    println!("Sync: {}", describe_sync(&report.sync));
    println!("Pending uploads: {}", report.pending_uploads);
    println!("Queued error reports: {}", report.queued_error_reports);
    Ok(())
}
