//! Engine configuration loaded from the environment.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::db::LOCAL_STORE_VERSION;
use crate::models::DEFAULT_SCOPE;
use crate::scheduler::RetryPolicy;
use crate::sync::SyncSettings;

const STORE_FILE: &str = "store.db";
const CACHE_FILE: &str = "cache.db";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings shared by every engine component.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Directory holding `store.db` and `cache.db`
    pub data_dir: PathBuf,
    pub scope: String,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_manual_passes: u32,
    /// Address of the local API server
    pub bind_addr: SocketAddr,
}

impl EngineConfig {
    /// Defaults rooted at the given data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            scope: DEFAULT_SCOPE.to_string(),
            http_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_manual_passes: SyncSettings::default().max_manual_passes,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
        }
    }

    /// Load from process environment variables.
    ///
    /// `default_data_dir` is used when `FIELDSYNC_DATA_DIR` is unset.
    pub fn from_env(default_data_dir: &Path) -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(default_data_dir, |name| values.get(name).cloned())
    }

    pub fn from_lookup(
        default_data_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::with_data_dir(
            optional_trimmed(&lookup, "FIELDSYNC_DATA_DIR")
                .map_or_else(|| default_data_dir.to_path_buf(), PathBuf::from),
        );

        if let Some(scope) = optional_trimmed(&lookup, "FIELDSYNC_SCOPE") {
            config.scope = scope;
        }

        if let Some(secs) = parse_u64(&lookup, "FIELDSYNC_HTTP_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(ConfigError::Invalid(
                    "FIELDSYNC_HTTP_TIMEOUT_SECS must be > 0".to_string(),
                ));
            }
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(attempts) = parse_u64(&lookup, "FIELDSYNC_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = u32::try_from(attempts)
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(
                        "FIELDSYNC_RETRY_MAX_ATTEMPTS must be an integer >= 1".to_string(),
                    )
                })?;
        }

        if let Some(millis) = parse_u64(&lookup, "FIELDSYNC_RETRY_INITIAL_DELAY_MS")? {
            config.retry.initial_delay = Duration::from_millis(millis);
        }
        if let Some(millis) = parse_u64(&lookup, "FIELDSYNC_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(millis);
        }
        if config.retry.max_delay < config.retry.initial_delay {
            return Err(ConfigError::Invalid(
                "FIELDSYNC_RETRY_MAX_DELAY_MS must be >= FIELDSYNC_RETRY_INITIAL_DELAY_MS"
                    .to_string(),
            ));
        }

        if let Some(passes) = parse_u64(&lookup, "FIELDSYNC_MAX_MANUAL_PASSES")? {
            config.max_manual_passes = u32::try_from(passes)
                .ok()
                .filter(|passes| *passes > 0)
                .ok_or_else(|| {
                    ConfigError::Invalid(
                        "FIELDSYNC_MAX_MANUAL_PASSES must be an integer >= 1".to_string(),
                    )
                })?;
        }

        if let Some(addr) = optional_trimmed(&lookup, "FIELDSYNC_BIND_ADDR") {
            config.bind_addr = addr.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "FIELDSYNC_BIND_ADDR must be a socket address, got {addr}"
                ))
            })?;
        }

        Ok(config)
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            scope: self.scope.clone(),
            db_version: LOCAL_STORE_VERSION,
            max_manual_passes: self.max_manual_passes,
        }
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u64(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<u64>, ConfigError> {
    optional_trimmed(lookup, name)
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| ConfigError::Invalid(format!("{name} must be an integer")))
        })
        .transpose()
}
