use fieldsync_core::Credentials;

use crate::commands::common::CliEngine;
use crate::error::CliError;

pub async fn run_pair(
    engine: &CliEngine,
    backend_url: String,
    access_token: String,
    refresh_token: String,
) -> Result<(), CliError> {
    let credentials = Credentials::new(backend_url, access_token, refresh_token)?;
    engine.credentials.save(&credentials).await?;
    println!("Paired with {}", credentials.backend_base());
    Ok(())
}

pub async fn run_unpair(engine: &CliEngine) -> Result<(), CliError> {
    if engine.credentials.clear().await? {
        println!("Credentials removed");
    } else {
        println!("Device was not paired");
    }
    Ok(())
}
