//! Database connection management

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Which schema a database file carries.
///
/// The local store and the response cache live in separate files so the cache
/// (credentials, pending uploads, queued reports) survives a store reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Synced records, sync metadata and statistics.
    LocalStore,
    /// Keyed response cache namespaces.
    ResponseCache,
}

/// Database wrapper for libSQL connections
pub struct Database {
    /// Keeps the libSQL database open for as long as `conn` is in use
    _db: LibSqlDatabase,
    conn: Connection,
    schema: Schema,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            schema,
        };
        database.configure().await?;
        database.migrate().await?;
        tracing::debug!("Opened {:?} database at {}", schema, path.display());
        Ok(database)
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(schema: Schema) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            schema,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore failures there.
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        match self.schema {
            Schema::LocalStore => migrations::run_local_store(&self.conn).await,
            Schema::ResponseCache => migrations::run_response_cache(&self.conn).await,
        }
    }

    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory(Schema::LocalStore).await.unwrap();
        assert_eq!(db.schema(), Schema::LocalStore);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("cache.db");

        let db = Database::open(&db_path, Schema::ResponseCache).await.unwrap();
        assert!(db_path.exists());

        let mut rows = db.connection().query("SELECT 1", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let val: i32 = row.get(0).unwrap();
        assert_eq!(val, 1);
    }
}
