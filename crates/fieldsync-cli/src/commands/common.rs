use std::path::PathBuf;

use fieldsync_core::{Credentials, Engine, EngineConfig, ReqwestClient};

use crate::error::CliError;

pub type CliEngine = Engine<ReqwestClient>;

/// Platform data directory, falling back to `./.fieldsync`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".fieldsync"), |dir| dir.join("fieldsync"))
}

/// Environment configuration with the `--data-dir` flag taking precedence.
pub fn resolve_config(data_dir: Option<PathBuf>) -> Result<EngineConfig, CliError> {
    let mut config = EngineConfig::from_env(&default_data_dir())?;
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    Ok(config)
}

pub async fn open_engine(config: &EngineConfig) -> Result<CliEngine, CliError> {
    let client = ReqwestClient::new(config.http_timeout)?;
    Ok(Engine::open(config, client).await?)
}

pub async fn require_credentials(engine: &CliEngine) -> Result<Credentials, CliError> {
    engine.credentials.load().await?.ok_or(CliError::NotPaired)
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
