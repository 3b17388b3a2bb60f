use std::path::Path;

use fieldsync_core::uploads::{Delivery, DeliveryRequest};

use crate::commands::common::{require_credentials, CliEngine};
use crate::error::CliError;

/// Capture a file; returns the local URL it is served under.
pub async fn capture_file(
    engine: &CliEngine,
    file: &Path,
    content_type: Option<String>,
) -> Result<String, CliError> {
    let bytes = std::fs::read(file)?;
    let content_type = content_type.or_else(|| {
        mime_guess::from_path(file)
            .first()
            .map(|mime| mime.essence_str().to_string())
    });
    Ok(engine.uploads().capture(content_type, bytes).await?)
}

pub async fn run_upload_capture(
    engine: &CliEngine,
    file: &Path,
    content_type: Option<String>,
) -> Result<(), CliError> {
    let url = capture_file(engine, file, content_type).await?;
    println!("{url}");
    Ok(())
}

pub async fn run_upload_list(engine: &CliEngine) -> Result<(), CliError> {
    let urls = engine.uploads().pending_urls().await?;
    if urls.is_empty() {
        println!("No pending uploads.");
    }
    for url in urls {
        println!("{url}");
    }
    Ok(())
}

/// Deliver a pending photo; it is removed locally once the backend accepts it.
pub async fn run_upload_deliver(engine: &CliEngine, url: &str) -> Result<(), CliError> {
    let credentials = require_credentials(engine).await?;
    let uploads = engine.uploads();
    let request = DeliveryRequest {
        backend_url: credentials.backend_base().to_string(),
        access_token: credentials.access_token,
        cached_url: url.to_string(),
    };

    match uploads.deliver(&request).await? {
        Delivery::NotCached => Err(CliError::UploadNotFound(url.to_string())),
        Delivery::Forwarded(response) if response.is_success() => {
            uploads.remove_pending(url).await?;
            println!("Delivered {url}");
            Ok(())
        }
        Delivery::Forwarded(response) => {
            println!(
                "Backend rejected {url}: {} {}",
                response.status.as_u16(),
                response.body_excerpt()
            );
            Ok(())
        }
    }
}

pub async fn run_upload_remove(engine: &CliEngine, url: &str) -> Result<(), CliError> {
    if engine.uploads().remove_pending(url).await? {
        println!("Removed {url}");
        Ok(())
    } else {
        Err(CliError::UploadNotFound(url.to_string()))
    }
}
