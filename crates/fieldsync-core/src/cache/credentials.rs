//! Device credentials stored in the config cache namespace.

use crate::db::CachedResponse;
use crate::models::Credentials;
use crate::{Error, Result};

use super::{CacheStore, CONFIG_CACHE};

/// Well-known key; the same entry is served locally as `/config/device`.
pub const CREDENTIALS_KEY: &str = "device";

/// Typed access to the device credentials.
#[derive(Clone)]
pub struct CredentialCache {
    cache: CacheStore,
}

impl CredentialCache {
    pub const fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    /// Stored credentials, or `None` when the device is not paired.
    ///
    /// An entry that no longer parses is treated as absent.
    pub async fn load(&self) -> Result<Option<Credentials>> {
        let Some(entry) = self.cache.get(CONFIG_CACHE, CREDENTIALS_KEY).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<Credentials>(&entry.body) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(error) => {
                tracing::warn!("Ignoring unreadable device credentials: {error}");
                Ok(None)
            }
        }
    }

    /// Atomically overwrite the stored credentials.
    pub async fn save(&self, credentials: &Credentials) -> Result<()> {
        let body = serde_json::to_vec(credentials)?;
        let entry = CachedResponse::new(Some("application/json".to_string()), body);
        self.cache.put(CONFIG_CACHE, CREDENTIALS_KEY, &entry).await?;
        tracing::debug!("Saved credentials for {}", credentials.backend_url);
        Ok(())
    }

    pub async fn clear(&self) -> Result<bool> {
        self.cache.delete(CONFIG_CACHE, CREDENTIALS_KEY).await
    }

    /// Replace the token pair, keeping the backend URL.
    pub async fn refresh_tokens(
        &self,
        access_token: String,
        refresh_token: String,
    ) -> Result<Credentials> {
        let current = self
            .load()
            .await?
            .ok_or_else(|| Error::NotFound("device credentials".to_string()))?;
        let refreshed = current.with_tokens(access_token, refresh_token);
        self.save(&refreshed).await?;
        tracing::info!("Refreshed access token for {}", refreshed.backend_url);
        Ok(refreshed)
    }
}
