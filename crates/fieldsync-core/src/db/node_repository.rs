//! Node and statistics repository implementation

use crate::error::{Error, Result};
use crate::models::Record;
use crate::util::to_sql_int;
use libsql::{params, Connection};
use serde_json::Value;

/// Trait for synced record storage operations (async)
#[allow(async_fn_in_trait)]
pub trait NodeRepository {
    /// List documents of one type within a scope, ordered by `id`.
    ///
    /// `limit = None` returns everything after `offset`.
    async fn list_by_type(
        &self,
        scope: &str,
        node_type: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Value>>;

    /// Total number of stored documents of one type
    async fn count_by_type(&self, scope: &str, node_type: &str) -> Result<usize>;

    /// Get a single document by scope, type and id
    async fn get(&self, scope: &str, node_type: &str, id: i64) -> Result<Option<Value>>;

    /// Highest revision committed for a scope, 0 when nothing is stored
    async fn max_vid(&self, scope: &str) -> Result<i64>;

    /// Upsert a whole batch in one transaction
    async fn apply_batch(&self, scope: &str, records: &[Record]) -> Result<()>;

    /// All statistics documents of a scope ordered by `id`
    async fn list_statistics(&self, scope: &str) -> Result<Vec<Value>>;
}

/// libSQL implementation of `NodeRepository`
pub struct LibSqlNodeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlNodeRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn collect_documents(mut rows: libsql::Rows) -> Result<Vec<Value>> {
        let mut documents = Vec::new();
        while let Some(row) = rows.next().await? {
            let raw: String = row.get(0)?;
            documents.push(serde_json::from_str(&raw)?);
        }
        Ok(documents)
    }

    async fn write_record(&self, scope: &str, record: &Record) -> Result<()> {
        let document = serde_json::to_string(&record.document)?;
        if record.is_statistics() {
            self.conn
                .execute(
                    "INSERT INTO statistics (id, vid, scope, document) VALUES (?, ?, ?, ?)
                     ON CONFLICT(scope, id) DO UPDATE SET
                        vid = excluded.vid,
                        document = excluded.document",
                    params![record.id, record.vid, scope, document],
                )
                .await?;
        } else {
            self.conn
                .execute(
                    "INSERT INTO nodes (id, vid, type, scope, document) VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(scope, id) DO UPDATE SET
                        vid = excluded.vid,
                        type = excluded.type,
                        document = excluded.document",
                    params![
                        record.id,
                        record.vid,
                        record.node_type.as_str(),
                        scope,
                        document
                    ],
                )
                .await?;
        }
        Ok(())
    }
}

impl NodeRepository for LibSqlNodeRepository<'_> {
    async fn list_by_type(
        &self,
        scope: &str,
        node_type: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit = limit.map_or(-1, to_sql_int);
        let rows = self
            .conn
            .query(
                "SELECT document FROM nodes
                 WHERE scope = ? AND type = ?
                 ORDER BY id LIMIT ? OFFSET ?",
                params![scope, node_type, limit, to_sql_int(offset)],
            )
            .await?;
        Self::collect_documents(rows).await
    }

    async fn count_by_type(&self, scope: &str, node_type: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM nodes WHERE scope = ? AND type = ?",
                [scope, node_type],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        usize::try_from(count).map_err(|error| Error::Database(error.to_string()))
    }

    async fn get(&self, scope: &str, node_type: &str, id: i64) -> Result<Option<Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document FROM nodes WHERE scope = ? AND type = ? AND id = ?",
                params![scope, node_type, id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn max_vid(&self, scope: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT MAX(
                    COALESCE((SELECT MAX(vid) FROM nodes WHERE scope = ?1), 0),
                    COALESCE((SELECT MAX(vid) FROM statistics WHERE scope = ?1), 0)
                )",
                [scope],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    async fn apply_batch(&self, scope: &str, records: &[Record]) -> Result<()> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;

        for record in records {
            if let Err(error) = self.write_record(scope, record).await {
                self.conn.execute("ROLLBACK", ()).await.ok();
                return Err(error);
            }
        }

        if let Err(error) = self.conn.execute("COMMIT", ()).await {
            self.conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
        Ok(())
    }

    async fn list_statistics(&self, scope: &str) -> Result<Vec<Value>> {
        let rows = self
            .conn
            .query(
                "SELECT document FROM statistics WHERE scope = ? ORDER BY id",
                [scope],
            )
            .await?;
        Self::collect_documents(rows).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Schema};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> Database {
        Database::open_in_memory(Schema::LocalStore).await.unwrap()
    }

    fn person(id: i64, vid: i64) -> Record {
        Record::from_value(json!({"id": id, "vid": vid, "type": "person", "name": format!("p{id}")}))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_and_get() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());

        repo.apply_batch("default", &[person(1, 10), person(2, 11)])
            .await
            .unwrap();

        let doc = repo.get("default", "person", 2).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("p2"));
        assert!(repo.get("default", "person", 3).await.unwrap().is_none());
        assert!(repo.get("default", "visit", 1).await.unwrap().is_none());
        assert_eq!(repo.max_vid("default").await.unwrap(), 11);
        assert_eq!(repo.max_vid("other").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replaying_batch_is_idempotent() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        let batch = [person(1, 10), person(2, 11), person(3, 12)];

        repo.apply_batch("default", &batch).await.unwrap();
        let first = repo.list_by_type("default", "person", 0, None).await.unwrap();
        repo.apply_batch("default", &batch).await.unwrap();
        let second = repo.list_by_type("default", "person", 0, None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.count_by_type("default", "person").await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_by_type_pages_in_id_order() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        let batch: Vec<Record> = (1..=25).rev().map(|id| person(id, id + 100)).collect();
        repo.apply_batch("default", &batch).await.unwrap();

        let page = repo.list_by_type("default", "person", 10, Some(5)).await.unwrap();
        let ids: Vec<i64> = page.iter().filter_map(|doc| doc["id"].as_i64()).collect();
        assert_eq!(ids, vec![11, 12, 13, 14, 15]);

        let tail = repo.list_by_type("default", "person", 20, None).await.unwrap();
        assert_eq!(tail.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_statistics_go_to_their_own_table() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        let stats =
            Record::from_value(json!({"id": 900, "vid": 50, "type": "statistics", "total": 3}))
                .unwrap();

        repo.apply_batch("default", &[person(1, 10), stats])
            .await
            .unwrap();

        assert_eq!(repo.count_by_type("default", "statistics").await.unwrap(), 0);
        let statistics = repo.list_statistics("default").await.unwrap();
        assert_eq!(statistics, vec![json!({"id": 900, "vid": 50, "type": "statistics", "total": 3})]);
        assert_eq!(repo.max_vid("default").await.unwrap(), 50);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_batch_rolls_back() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        repo.apply_batch("default", &[person(1, 10)]).await.unwrap();

        db.connection()
            .execute("DROP TABLE statistics", ())
            .await
            .unwrap();
        let stats = Record::from_value(json!({"id": 2, "vid": 20, "type": "statistics"})).unwrap();
        assert!(repo
            .apply_batch("default", &[person(3, 15), stats])
            .await
            .is_err());

        assert!(repo.get("default", "person", 3).await.unwrap().is_none());
        assert_eq!(repo.count_by_type("default", "person").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scopes_do_not_share_rows() {
        let db = setup().await;
        let repo = LibSqlNodeRepository::new(db.connection());
        let north = Record::from_value(json!({"id": 1, "vid": 10, "type": "person", "name": "north"}))
            .unwrap();
        let south = Record::from_value(json!({"id": 1, "vid": 3, "type": "person", "name": "south"}))
            .unwrap();

        repo.apply_batch("north", &[north]).await.unwrap();
        repo.apply_batch("south", &[south]).await.unwrap();

        let doc = repo.get("north", "person", 1).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("north"));
        let doc = repo.get("south", "person", 1).await.unwrap().unwrap();
        assert_eq!(doc["name"], json!("south"));
        assert_eq!(repo.count_by_type("north", "person").await.unwrap(), 1);
        assert!(repo.list_by_type("east", "person", 0, None).await.unwrap().is_empty());
        assert_eq!(repo.max_vid("north").await.unwrap(), 10);
        assert_eq!(repo.max_vid("south").await.unwrap(), 3);
    }
}
