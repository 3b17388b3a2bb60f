//! Durable response cache and the credentials kept in it.

mod credentials;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{CacheRepository, CachedResponse, Database, LibSqlCacheRepository, Schema};
use crate::Result;

pub use credentials::{CredentialCache, CREDENTIALS_KEY};

/// Namespace for `/config/{key}` values, including the device credentials.
pub const CONFIG_CACHE: &str = "config";
/// Confirmed photos fetched from the backend.
pub const PHOTOS_CACHE: &str = "photos";
/// Captured photos not yet confirmed by the backend.
pub const PHOTOS_UPLOAD_CACHE: &str = "photos-upload";
/// Error reports waiting to be resent.
pub const ERROR_REPORTS_CACHE: &str = "error-reports";

/// Shared handle over the cache database; clones share one connection.
#[derive(Clone)]
pub struct CacheStore {
    db: Arc<Mutex<Database>>,
}

impl CacheStore {
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, Schema::ResponseCache).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Schema::ResponseCache).await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .get(cache, key)
            .await
    }

    pub async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .put(cache, key, response)
            .await
    }

    pub async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .delete(cache, key)
            .await
    }

    /// Keys in insertion order, oldest first.
    pub async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .keys(cache)
            .await
    }

    pub async fn count(&self, cache: &str) -> Result<usize> {
        let db = self.db.lock().await;
        LibSqlCacheRepository::new(db.connection())
            .count(cache)
            .await
    }
}
