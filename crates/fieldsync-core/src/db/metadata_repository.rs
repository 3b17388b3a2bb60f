//! Sync metadata repository implementation

use crate::error::Result;
use crate::models::{SyncMetadata, SyncStatus};
use libsql::{params, Connection};

/// Trait for per-scope sync metadata storage (async)
#[allow(async_fn_in_trait)]
pub trait MetadataRepository {
    /// Load metadata for a scope, defaulting to `NotAsked` when absent
    async fn load(&self, scope: &str) -> Result<SyncMetadata>;

    /// Save metadata for a scope
    async fn save(&self, scope: &str, metadata: &SyncMetadata) -> Result<()>;
}

/// libSQL implementation of `MetadataRepository`
pub struct LibSqlMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetadataRepository for LibSqlMetadataRepository<'_> {
    async fn load(&self, scope: &str) -> Result<SyncMetadata> {
        let mut rows = self
            .conn
            .query(
                "SELECT status, last_timestamp, last_contact, remaining
                 FROM sync_metadata WHERE scope = ?",
                [scope],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(SyncMetadata::default());
        };

        let status: String = row.get(0)?;
        let status = serde_json::from_str::<SyncStatus>(&status).unwrap_or_else(|error| {
            tracing::warn!("Discarding unreadable sync status for scope {scope}: {error}");
            SyncStatus::NotAsked
        });

        Ok(SyncMetadata {
            status,
            last_timestamp: row.get(1)?,
            last_contact: row.get(2)?,
            remaining: row.get(3)?,
        })
    }

    async fn save(&self, scope: &str, metadata: &SyncMetadata) -> Result<()> {
        let status = serde_json::to_string(&metadata.status)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO sync_metadata
                    (scope, status, last_timestamp, last_contact, remaining)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    scope,
                    status,
                    metadata.last_timestamp,
                    metadata.last_contact,
                    metadata.remaining
                ],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Schema};
    use pretty_assertions::assert_eq;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_load_defaults_when_absent() {
        let db = Database::open_in_memory(Schema::LocalStore).await.unwrap();
        let repo = LibSqlMetadataRepository::new(db.connection());

        assert_eq!(repo.load("default").await.unwrap(), SyncMetadata::default());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_save_and_load_per_scope() {
        let db = Database::open_in_memory(Schema::LocalStore).await.unwrap();
        let repo = LibSqlMetadataRepository::new(db.connection());

        let metadata = SyncMetadata {
            status: SyncStatus::NetworkError {
                message: "offline".into(),
                timestamp: 42,
                will_retry: true,
            },
            last_timestamp: 1_700_000_000,
            last_contact: 42,
            remaining: 70,
        };
        repo.save("default", &metadata).await.unwrap();

        assert_eq!(repo.load("default").await.unwrap(), metadata);
        assert_eq!(repo.load("clinic-2").await.unwrap(), SyncMetadata::default());
    }
}
