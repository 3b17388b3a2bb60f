use fieldsync_core::telemetry::{PendingErrorReport, SendOutcome};
use fieldsync_core::util::is_http_url;

use crate::commands::common::{require_credentials, CliEngine};
use crate::error::CliError;

/// Build a report for the paired backend; relative URLs are rebased on it.
pub async fn build_report(
    engine: &CliEngine,
    method: &str,
    url: &str,
    body: String,
) -> Result<PendingErrorReport, CliError> {
    serde_json::from_str::<serde_json::Value>(&body)?;
    let credentials = require_credentials(engine).await?;
    let url = if is_http_url(url) {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            credentials.backend_base(),
            url.trim_start_matches('/')
        )
    };

    Ok(PendingErrorReport {
        method: method.to_string(),
        url,
        access_token: credentials.access_token,
        body,
    })
}

pub async fn run_telemetry_send(
    engine: &CliEngine,
    method: &str,
    url: &str,
    body: String,
) -> Result<(), CliError> {
    let report = build_report(engine, method, url, body).await?;
    match engine.telemetry().send(report).await? {
        SendOutcome::Delivered(response) => {
            println!("Delivered: HTTP {}", response.status.as_u16());
        }
        SendOutcome::Queued => println!("Backend unreachable; report queued"),
    }
    Ok(())
}

pub async fn run_telemetry_list(engine: &CliEngine) -> Result<(), CliError> {
    let reports = engine.telemetry().queued().await?;
    if reports.is_empty() {
        println!("No queued error reports.");
        return Ok(());
    }
    for report in reports {
        println!("{} {} ({} bytes)", report.method, report.url, report.body.len());
    }
    Ok(())
}

pub async fn run_telemetry_drain(engine: &CliEngine) -> Result<(), CliError> {
    let report = engine.telemetry().drain().await?;
    println!(
        "Delivered {} error reports, {} still queued",
        report.delivered, report.remaining
    );
    if report.stopped_on_failure {
        println!("Backend unreachable; remaining reports stay queued.");
    }
    Ok(())
}
