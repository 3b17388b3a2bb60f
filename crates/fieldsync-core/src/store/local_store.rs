//! Thread-safe handle over the local record store.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::{
    Database, LibSqlMetadataRepository, LibSqlNodeRepository, MetadataRepository, NodeRepository,
    Schema,
};
use crate::models::{Record, SyncMetadata};
use crate::Result;

/// A page of documents of one type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePage {
    pub offset: usize,
    /// Total for the type, not the page length
    pub count: usize,
    pub data: Vec<Value>,
}

/// Shared handle over the record store; clones share one connection.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
}

impl LocalStore {
    /// Open (or create) the store at the given filesystem path.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::open(path, Schema::LocalStore).await?;
        Ok(Self::from_database(db))
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory(Schema::LocalStore).await?;
        Ok(Self::from_database(db))
    }

    fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    /// Page through documents of one type in a scope, ordered by `id`.
    pub async fn list_nodes(
        &self,
        scope: &str,
        node_type: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<NodePage> {
        let db = self.db.lock().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        let count = repo.count_by_type(scope, node_type).await?;
        let data = repo.list_by_type(scope, node_type, offset, limit).await?;
        Ok(NodePage {
            offset,
            count,
            data,
        })
    }

    pub async fn get_node(&self, scope: &str, node_type: &str, id: i64) -> Result<Option<Value>> {
        let db = self.db.lock().await;
        LibSqlNodeRepository::new(db.connection())
            .get(scope, node_type, id)
            .await
    }

    pub async fn list_statistics(&self, scope: &str) -> Result<NodePage> {
        let db = self.db.lock().await;
        let data = LibSqlNodeRepository::new(db.connection())
            .list_statistics(scope)
            .await?;
        Ok(NodePage {
            offset: 0,
            count: data.len(),
            data,
        })
    }

    /// Highest committed revision for the scope; the next pull's `base_revision`.
    pub async fn max_vid(&self, scope: &str) -> Result<i64> {
        let db = self.db.lock().await;
        LibSqlNodeRepository::new(db.connection())
            .max_vid(scope)
            .await
    }

    /// Commit a pulled batch as a single transaction.
    pub async fn apply_batch(&self, scope: &str, records: &[Record]) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlNodeRepository::new(db.connection())
            .apply_batch(scope, records)
            .await?;
        tracing::info!("Committed {} records for scope {scope}", records.len());
        Ok(())
    }

    pub async fn load_metadata(&self, scope: &str) -> Result<SyncMetadata> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .load(scope)
            .await
    }

    pub async fn save_metadata(&self, scope: &str, metadata: &SyncMetadata) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlMetadataRepository::new(db.connection())
            .save(scope, metadata)
            .await
    }

    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(sql, ()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn list_nodes_reports_total_count() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let batch: Vec<Record> = (1..=25)
            .map(|id| Record::from_value(json!({"id": id, "vid": id, "type": "person"})).unwrap())
            .collect();
        store.apply_batch("default", &batch).await.unwrap();

        let page = store.list_nodes("default", "person", 10, Some(5)).await.unwrap();
        assert_eq!(page.offset, 10);
        assert_eq!(page.count, 25);
        assert_eq!(page.data.len(), 5);

        let empty = store.list_nodes("default", "visit", 0, None).await.unwrap();
        assert_eq!(empty.count, 0);
        assert!(empty.data.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clones_share_the_same_store() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let other = store.clone();
        let record = Record::from_value(json!({"id": 7, "vid": 3, "type": "person"})).unwrap();
        store.apply_batch("default", &[record]).await.unwrap();

        assert_eq!(other.max_vid("default").await.unwrap(), 3);
        assert!(other.get_node("default", "person", 7).await.unwrap().is_some());
        assert!(other.get_node("east", "person", 7).await.unwrap().is_none());
    }
}
