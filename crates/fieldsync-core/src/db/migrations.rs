//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current local store schema version, reported to the backend as `db_version`.
pub const LOCAL_STORE_VERSION: i32 = 3;

/// Current response cache schema version
const RESPONSE_CACHE_VERSION: i32 = 1;

/// Run all pending local store migrations
pub async fn run_local_store(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        apply(
            conn,
            1,
            &[
                // Synced nodes, one row per record id
                "CREATE TABLE IF NOT EXISTS nodes (
                    id INTEGER PRIMARY KEY,
                    vid INTEGER NOT NULL,
                    type TEXT NOT NULL,
                    scope TEXT NOT NULL,
                    document TEXT NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type, id)",
                "CREATE INDEX IF NOT EXISTS idx_nodes_scope_vid ON nodes(scope, vid)",
                // Sync progress, one row per scope
                "CREATE TABLE IF NOT EXISTS sync_metadata (
                    scope TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    last_timestamp INTEGER NOT NULL DEFAULT 0,
                    last_contact INTEGER NOT NULL DEFAULT 0,
                    remaining INTEGER NOT NULL DEFAULT 0
                )",
            ],
        )
        .await?;
    }
    if version < 2 {
        apply(
            conn,
            2,
            &[
                "CREATE TABLE IF NOT EXISTS statistics (
                    id INTEGER PRIMARY KEY,
                    vid INTEGER NOT NULL,
                    scope TEXT NOT NULL,
                    document TEXT NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS idx_statistics_scope_vid ON statistics(scope, vid)",
            ],
        )
        .await?;
    }
    if version < 3 {
        // Key rows by (scope, id) so records from different scopes never collide
        apply(
            conn,
            3,
            &[
                "CREATE TABLE nodes_scoped (
                    scope TEXT NOT NULL,
                    id INTEGER NOT NULL,
                    vid INTEGER NOT NULL,
                    type TEXT NOT NULL,
                    document TEXT NOT NULL,
                    PRIMARY KEY (scope, id)
                )",
                "INSERT INTO nodes_scoped (scope, id, vid, type, document)
                    SELECT scope, id, vid, type, document FROM nodes",
                "DROP TABLE nodes",
                "ALTER TABLE nodes_scoped RENAME TO nodes",
                "CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(scope, type, id)",
                "CREATE INDEX IF NOT EXISTS idx_nodes_scope_vid ON nodes(scope, vid)",
                "CREATE TABLE statistics_scoped (
                    scope TEXT NOT NULL,
                    id INTEGER NOT NULL,
                    vid INTEGER NOT NULL,
                    document TEXT NOT NULL,
                    PRIMARY KEY (scope, id)
                )",
                "INSERT INTO statistics_scoped (scope, id, vid, document)
                    SELECT scope, id, vid, document FROM statistics",
                "DROP TABLE statistics",
                "ALTER TABLE statistics_scoped RENAME TO statistics",
                "CREATE INDEX IF NOT EXISTS idx_statistics_scope_vid ON statistics(scope, vid)",
            ],
        )
        .await?;
    }

    Ok(())
}

/// Run all pending response cache migrations
pub async fn run_response_cache(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < RESPONSE_CACHE_VERSION {
        apply(
            conn,
            1,
            &[
                // `seq` preserves insertion order for FIFO namespaces
                "CREATE TABLE IF NOT EXISTS cache_entries (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    cache TEXT NOT NULL,
                    key TEXT NOT NULL,
                    content_type TEXT,
                    body BLOB NOT NULL,
                    stored_at INTEGER NOT NULL,
                    UNIQUE (cache, key)
                )",
                "CREATE INDEX IF NOT EXISTS idx_cache_entries_cache ON cache_entries(cache, seq)",
            ],
        )
        .await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Apply one migration inside a transaction and record its version.
async fn apply(conn: &Connection, version: i32, statements: &[&str]) -> Result<()> {
    // libsql doesn't have execute_batch, so we run each statement separately
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let steps = statements
        .iter()
        .copied()
        .chain(["CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)"]);
    for stmt in steps {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn
        .execute(
            "INSERT INTO schema_version (version) VALUES (?)",
            [i64::from(version)],
        )
        .await
    {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_store_migrations() {
        let conn = setup().await;
        run_local_store(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, LOCAL_STORE_VERSION);
        assert!(table_exists(&conn, "nodes").await);
        assert!(table_exists(&conn, "sync_metadata").await);
        assert!(table_exists(&conn, "statistics").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run_local_store(&conn).await.unwrap();
        run_local_store(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, LOCAL_STORE_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_two_rows_survive_scope_rekey() {
        let conn = setup().await;
        apply(
            &conn,
            1,
            &[
                "CREATE TABLE nodes (
                    id INTEGER PRIMARY KEY,
                    vid INTEGER NOT NULL,
                    type TEXT NOT NULL,
                    scope TEXT NOT NULL,
                    document TEXT NOT NULL
                )",
                "CREATE INDEX idx_nodes_type ON nodes(type, id)",
                "CREATE INDEX idx_nodes_scope_vid ON nodes(scope, vid)",
                "CREATE TABLE sync_metadata (
                    scope TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    last_timestamp INTEGER NOT NULL DEFAULT 0,
                    last_contact INTEGER NOT NULL DEFAULT 0,
                    remaining INTEGER NOT NULL DEFAULT 0
                )",
                "INSERT INTO nodes (id, vid, type, scope, document)
                    VALUES (7, 70, 'person', 'north', '{\"id\":7}')",
            ],
        )
        .await
        .unwrap();
        apply(
            &conn,
            2,
            &["CREATE TABLE statistics (
                id INTEGER PRIMARY KEY,
                vid INTEGER NOT NULL,
                scope TEXT NOT NULL,
                document TEXT NOT NULL
            )"],
        )
        .await
        .unwrap();

        run_local_store(&conn).await.unwrap();
        assert_eq!(get_version(&conn).await.unwrap(), LOCAL_STORE_VERSION);

        // Same id in another scope is now a separate row
        conn.execute(
            "INSERT INTO nodes (scope, id, vid, type, document)
                VALUES ('south', 7, 71, 'person', '{}')",
            (),
        )
        .await
        .unwrap();
        let mut rows = conn
            .query("SELECT scope FROM nodes WHERE id = 7 ORDER BY scope", ())
            .await
            .unwrap();
        let mut scopes = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            scopes.push(row.get::<String>(0).unwrap());
        }
        assert_eq!(scopes, vec!["north".to_string(), "south".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_response_cache_migrations() {
        let conn = setup().await;
        run_response_cache(&conn).await.unwrap();
        run_response_cache(&conn).await.unwrap();

        assert_eq!(get_version(&conn).await.unwrap(), RESPONSE_CACHE_VERSION);
        assert!(table_exists(&conn, "cache_entries").await);
        assert!(!table_exists(&conn, "nodes").await);
    }
}
