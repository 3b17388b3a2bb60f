//! fieldsync CLI - pair a device, pull records, and serve them locally
//!
//! Every command opens the same on-disk store and cache the background
//! worker uses, so the CLI and `fieldsync serve` can be mixed freely.

mod cli;
mod commands;
mod error;

#[cfg(test)]
mod tests;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, TelemetryCommands, UploadCommands};
use commands::common::{open_engine, resolve_config};
use commands::completions::run_completions;
use commands::pair::{run_pair, run_unpair};
use commands::request::run_request;
use commands::serve::run_serve;
use commands::status::run_status;
use commands::sync::run_sync;
use commands::telemetry::{run_telemetry_drain, run_telemetry_list, run_telemetry_send};
use commands::upload::{run_upload_capture, run_upload_deliver, run_upload_list, run_upload_remove};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fieldsync=info,fieldsync_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let mut config = resolve_config(cli.data_dir)?;
    if let Commands::Serve {
        bind: Some(bind), ..
    } = &cli.command
    {
        config.bind_addr = bind
            .parse()
            .map_err(|_| CliError::InvalidArgument(format!("invalid listen address: {bind}")))?;
    }
    let engine = open_engine(&config).await?;

    match cli.command {
        Commands::Pair {
            backend_url,
            access_token,
            refresh_token,
        } => run_pair(&engine, backend_url, access_token, refresh_token).await?,
        Commands::Unpair => run_unpair(&engine).await?,
        Commands::Sync { json } => run_sync(&engine, json).await?,
        Commands::Status { json } => run_status(&engine, json).await?,
        Commands::Request {
            method,
            path,
            body,
            body_file,
            content_type,
        } => {
            let body = match body_file {
                Some(path) => Some(std::fs::read(path)?),
                None => body.map(String::into_bytes),
            };
            run_request(&engine, &method, &path, body, content_type.as_deref()).await?;
        }
        Commands::Upload { command } => match command {
            UploadCommands::Capture { file, content_type } => {
                run_upload_capture(&engine, &file, content_type).await?;
            }
            UploadCommands::List => run_upload_list(&engine).await?,
            UploadCommands::Deliver { url } => run_upload_deliver(&engine, &url).await?,
            UploadCommands::Remove { url } => run_upload_remove(&engine, &url).await?,
        },
        Commands::Telemetry { command } => match command {
            TelemetryCommands::Send { url, body, method } => {
                run_telemetry_send(&engine, &method, &url, body).await?;
            }
            TelemetryCommands::List => run_telemetry_list(&engine).await?,
            TelemetryCommands::Drain => run_telemetry_drain(&engine).await?,
        },
        Commands::Serve { .. } => run_serve(engine, config.bind_addr).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
