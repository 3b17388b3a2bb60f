//! Response cache repository implementation

use crate::error::{Error, Result};
use libsql::{params, Connection};

/// One cached response body with the content type it was stored with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Unix milliseconds of the last write
    pub stored_at: i64,
}

impl CachedResponse {
    pub fn new(content_type: Option<String>, body: Vec<u8>) -> Self {
        Self {
            content_type,
            body,
            stored_at: crate::util::unix_millis_now(),
        }
    }
}

/// Trait for namespaced response cache operations (async)
#[allow(async_fn_in_trait)]
pub trait CacheRepository {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Insert or atomically replace an entry
    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()>;

    /// Remove an entry, returning whether it existed
    async fn delete(&self, cache: &str, key: &str) -> Result<bool>;

    /// Keys of a namespace in insertion order
    async fn keys(&self, cache: &str) -> Result<Vec<String>>;

    async fn count(&self, cache: &str) -> Result<usize>;
}

/// libSQL implementation of `CacheRepository`
pub struct LibSqlCacheRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlCacheRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl CacheRepository for LibSqlCacheRepository<'_> {
    async fn get(&self, cache: &str, key: &str) -> Result<Option<CachedResponse>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content_type, body, stored_at FROM cache_entries
                 WHERE cache = ? AND key = ?",
                [cache, key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(CachedResponse {
                content_type: row.get(0)?,
                body: row.get(1)?,
                stored_at: row.get(2)?,
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, cache: &str, key: &str, response: &CachedResponse) -> Result<()> {
        // Replacing keeps the original `seq` so FIFO order survives overwrites
        self.conn
            .execute(
                "INSERT INTO cache_entries (cache, key, content_type, body, stored_at)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(cache, key) DO UPDATE SET
                    content_type = excluded.content_type,
                    body = excluded.body,
                    stored_at = excluded.stored_at",
                params![
                    cache,
                    key,
                    response.content_type.clone(),
                    response.body.clone(),
                    response.stored_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM cache_entries WHERE cache = ? AND key = ?",
                [cache, key],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key FROM cache_entries WHERE cache = ? ORDER BY seq",
                [cache],
            )
            .await?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }

    async fn count(&self, cache: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM cache_entries WHERE cache = ?", [cache])
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Schema};
    use pretty_assertions::assert_eq;

    async fn setup() -> Database {
        Database::open_in_memory(Schema::ResponseCache).await.unwrap()
    }

    fn json_entry(body: &str) -> CachedResponse {
        CachedResponse::new(Some("application/json".into()), body.as_bytes().to_vec())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_put_get_delete() {
        let db = setup().await;
        let repo = LibSqlCacheRepository::new(db.connection());

        repo.put("config", "device", &json_entry("{}")).await.unwrap();
        let stored = repo.get("config", "device").await.unwrap().unwrap();
        assert_eq!(stored.body, b"{}".to_vec());
        assert_eq!(stored.content_type.as_deref(), Some("application/json"));
        assert!(repo.get("photos", "device").await.unwrap().is_none());

        assert!(repo.delete("config", "device").await.unwrap());
        assert!(!repo.delete("config", "device").await.unwrap());
        assert!(repo.get("config", "device").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_keys_keep_insertion_order_across_overwrites() {
        let db = setup().await;
        let repo = LibSqlCacheRepository::new(db.connection());

        for key in ["b", "a", "c"] {
            repo.put("error-reports", key, &json_entry(key)).await.unwrap();
        }
        repo.put("error-reports", "b", &json_entry("again"))
            .await
            .unwrap();

        assert_eq!(repo.keys("error-reports").await.unwrap(), vec!["b", "a", "c"]);
        assert_eq!(repo.count("error-reports").await.unwrap(), 3);
        assert_eq!(repo.count("photos").await.unwrap(), 0);
    }
}
