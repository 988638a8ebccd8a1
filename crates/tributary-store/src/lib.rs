//! SQLite-backed mirror store.
//!
//! Holds everything Tributary persists between sync passes: connector rows,
//! mirrored documents (keyed by caller-supplied stable ids, so upserts are
//! idempotent), the synced-item ledger that garbage collection reconciles
//! against upstream, per-enumeration cursors, and sync status markers.
//! Crawl folder/page records live in [`crawl`].

pub mod crawl;

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tracing::instrument;

pub use crawl::{CrawlFolder, CrawlPage, ResourceNode};

/// A mirrored document. `document_id` is the caller-supplied stable
/// identifier; writing the same id twice replaces the content in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub source: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// A connector row: one external installation/account mirrored into one
/// destination data source.
#[derive(Debug, Clone)]
pub struct ConnectorRow {
    pub id: i64,
    pub kind: String,
    pub connection_id: String,
    pub data_source: String,
}

/// One entry in the synced-item ledger: a mirrored artifact whose backing
/// upstream resource garbage collection re-checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedItem {
    pub kind: String,
    pub external_id: String,
    /// External id of the containing resource (repository), if any.
    pub parent_external_id: Option<String>,
    pub document_id: String,
}

#[derive(Clone)]
pub struct MirrorStore {
    pool: SqlitePool,
}

impl MirrorStore {
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str("sqlite:")?
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS connectors (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                kind TEXT NOT NULL,\
                connection_id TEXT NOT NULL,\
                data_source TEXT NOT NULL,\
                created_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS crawl_configurations (\
                connector_id INTEGER PRIMARY KEY REFERENCES connectors(id),\
                url TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (\
                document_id TEXT PRIMARY KEY,\
                source TEXT NOT NULL,\
                url TEXT,\
                title TEXT,\
                body TEXT NOT NULL,\
                updated_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS synced_items (\
                connector_id INTEGER NOT NULL,\
                kind TEXT NOT NULL,\
                external_id TEXT NOT NULL,\
                parent_external_id TEXT,\
                document_id TEXT NOT NULL,\
                updated_at TEXT NOT NULL,\
                PRIMARY KEY (connector_id, kind, external_id)\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_cursors (\
                scope TEXT PRIMARY KEY,\
                cursor TEXT,\
                updated_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_status (\
                connector_id INTEGER PRIMARY KEY,\
                last_sync_started_at TEXT,\
                last_sync_succeeded_at TEXT\
            )",
        )
        .execute(&self.pool)
        .await?;

        crawl::init_schema(&self.pool).await?;

        Ok(())
    }

    // --- Connectors ---

    /// Create a connector row. Returns the new connector id.
    pub async fn create_connector(
        &self,
        kind: &str,
        connection_id: &str,
        data_source: &str,
    ) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO connectors (kind, connection_id, data_source, created_at) \
            VALUES (?1, ?2, ?3, ?4) RETURNING id",
        )
        .bind(kind)
        .bind(connection_id)
        .bind(data_source)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Create a crawl connector and its configuration in one transaction, so
    /// a half-created connector never becomes visible.
    pub async fn create_crawl_connector(&self, url: &str, data_source: &str) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO connectors (kind, connection_id, data_source, created_at) \
            VALUES ('webcrawler', ?1, ?2, ?3) RETURNING id",
        )
        .bind(url)
        .bind(data_source)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO crawl_configurations (connector_id, url) VALUES (?1, ?2)")
            .bind(id)
            .bind(url)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    pub async fn get_connector(&self, connector_id: i64) -> Result<Option<ConnectorRow>> {
        let row = sqlx::query_as::<_, (i64, String, String, String)>(
            "SELECT id, kind, connection_id, data_source FROM connectors WHERE id = ?1",
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, kind, connection_id, data_source)| ConnectorRow {
            id,
            kind,
            connection_id,
            data_source,
        }))
    }

    pub async fn crawl_seed_url(&self, connector_id: i64) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT url FROM crawl_configurations WHERE connector_id = ?1",
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(url,)| url))
    }

    /// Remove a connector and everything mirrored under it, transactionally:
    /// documents first, then page/folder records, ledger, config, connector.
    pub async fn delete_connector_data(&self, connector_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM documents WHERE document_id IN \
            (SELECT document_id FROM synced_items WHERE connector_id = ?1 \
             UNION SELECT document_id FROM crawl_pages WHERE connector_id = ?1)",
        )
        .bind(connector_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM crawl_pages WHERE connector_id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM crawl_folders WHERE connector_id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM synced_items WHERE connector_id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sync_status WHERE connector_id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM crawl_configurations WHERE connector_id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM connectors WHERE id = ?1")
            .bind(connector_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // --- Documents ---

    #[instrument(skip(self, doc), fields(document_id = %doc.document_id))]
    pub async fn upsert_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO documents (document_id, source, url, title, body, updated_at) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(document_id) DO UPDATE SET \
                source=excluded.source, \
                url=excluded.url, \
                title=excluded.title, \
                body=excluded.body, \
                updated_at=excluded.updated_at",
        )
        .bind(&doc.document_id)
        .bind(&doc.source)
        .bind(&doc.url)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, Option<String>, String, String)>(
            "SELECT document_id, source, url, title, body, updated_at \
            FROM documents WHERE document_id = ?1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(document_id, source, url, title, body, updated_at)| DocumentRecord {
                document_id,
                source,
                url,
                title,
                body,
                updated_at: parse_timestamp(&updated_at),
            },
        ))
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // --- Synced-item ledger ---

    pub async fn record_synced_item(&self, connector_id: i64, item: &SyncedItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO synced_items \
            (connector_id, kind, external_id, parent_external_id, document_id, updated_at) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(connector_id, kind, external_id) DO UPDATE SET \
                parent_external_id=excluded.parent_external_id, \
                document_id=excluded.document_id, \
                updated_at=excluded.updated_at",
        )
        .bind(connector_id)
        .bind(&item.kind)
        .bind(&item.external_id)
        .bind(&item.parent_external_id)
        .bind(&item.document_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_synced_items(&self, connector_id: i64) -> Result<Vec<SyncedItem>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT kind, external_id, parent_external_id, document_id \
            FROM synced_items WHERE connector_id = ?1 ORDER BY kind, external_id",
        )
        .bind(connector_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(kind, external_id, parent_external_id, document_id)| SyncedItem {
                kind,
                external_id,
                parent_external_id,
                document_id,
            })
            .collect())
    }

    pub async fn get_synced_item(
        &self,
        connector_id: i64,
        kind: &str,
        external_id: &str,
    ) -> Result<Option<SyncedItem>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT kind, external_id, parent_external_id, document_id \
            FROM synced_items WHERE connector_id = ?1 AND kind = ?2 AND external_id = ?3",
        )
        .bind(connector_id)
        .bind(kind)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(kind, external_id, parent_external_id, document_id)| SyncedItem {
            kind,
            external_id,
            parent_external_id,
            document_id,
        }))
    }

    pub async fn delete_synced_item(
        &self,
        connector_id: i64,
        kind: &str,
        external_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM synced_items WHERE connector_id = ?1 AND kind = ?2 AND external_id = ?3",
        )
        .bind(connector_id)
        .bind(kind)
        .bind(external_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every ledger entry whose containing resource is `parent_external_id`.
    pub async fn items_under(
        &self,
        connector_id: i64,
        parent_external_id: &str,
    ) -> Result<Vec<SyncedItem>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT kind, external_id, parent_external_id, document_id \
            FROM synced_items WHERE connector_id = ?1 AND parent_external_id = ?2",
        )
        .bind(connector_id)
        .bind(parent_external_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(kind, external_id, parent_external_id, document_id)| SyncedItem {
                kind,
                external_id,
                parent_external_id,
                document_id,
            })
            .collect())
    }

    // --- Cursors & sync status ---

    pub async fn set_cursor(&self, scope: &str, cursor: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_cursors (scope, cursor, updated_at) VALUES (?1, ?2, ?3) \
            ON CONFLICT(scope) DO UPDATE SET cursor=excluded.cursor, updated_at=excluded.updated_at",
        )
        .bind(scope)
        .bind(cursor)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cursor(&self, scope: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT cursor FROM sync_cursors WHERE scope = ?1",
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(cursor,)| cursor))
    }

    pub async fn sync_started(&self, connector_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_status (connector_id, last_sync_started_at) VALUES (?1, ?2) \
            ON CONFLICT(connector_id) DO UPDATE SET \
                last_sync_started_at=excluded.last_sync_started_at",
        )
        .bind(connector_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sync_succeeded(&self, connector_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_status (connector_id, last_sync_succeeded_at) VALUES (?1, ?2) \
            ON CONFLICT(connector_id) DO UPDATE SET \
                last_sync_succeeded_at=excluded.last_sync_succeeded_at",
        )
        .bind(connector_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn sync_status(
        &self,
        connector_id: i64,
    ) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let row = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT last_sync_started_at, last_sync_succeeded_at \
            FROM sync_status WHERE connector_id = ?1",
        )
        .bind(connector_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some((started, succeeded)) => (
                started.as_deref().map(parse_timestamp),
                succeeded.as_deref().map(parse_timestamp),
            ),
            None => (None, None),
        })
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (MirrorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(&dir.path().join("mirror.db")).await.unwrap();
        (store, dir)
    }

    fn doc(id: &str, body: &str) -> DocumentRecord {
        DocumentRecord {
            document_id: id.to_string(),
            source: "github".to_string(),
            url: None,
            title: Some("t".to_string()),
            body: body.to_string(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_document_upsert_is_idempotent() {
        let (store, _dir) = test_store().await;
        store.upsert_document(&doc("d1", "v1")).await.unwrap();
        store.upsert_document(&doc("d1", "v2")).await.unwrap();
        assert_eq!(store.document_count().await.unwrap(), 1);
        let fetched = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(fetched.body, "v2");
    }

    #[tokio::test]
    async fn test_synced_item_ledger_roundtrip() {
        let (store, _dir) = test_store().await;
        let connector = store
            .create_connector("github", "inst-1", "ds-main")
            .await
            .unwrap();
        let item = SyncedItem {
            kind: "issue".to_string(),
            external_id: "42".to_string(),
            parent_external_id: Some("repo-7".to_string()),
            document_id: "github-issue-42".to_string(),
        };
        store.record_synced_item(connector, &item).await.unwrap();
        store.record_synced_item(connector, &item).await.unwrap();

        let items = store.list_synced_items(connector).await.unwrap();
        assert_eq!(items, vec![item.clone()]);
        assert_eq!(
            store.items_under(connector, "repo-7").await.unwrap(),
            vec![item]
        );

        store
            .delete_synced_item(connector, "issue", "42")
            .await
            .unwrap();
        assert!(store.list_synced_items(connector).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crawl_connector_is_created_transactionally() {
        let (store, _dir) = test_store().await;
        let id = store
            .create_crawl_connector("https://docs.example.com", "ds-main")
            .await
            .unwrap();
        let connector = store.get_connector(id).await.unwrap().unwrap();
        assert_eq!(connector.kind, "webcrawler");
        assert_eq!(
            store.crawl_seed_url(id).await.unwrap().as_deref(),
            Some("https://docs.example.com")
        );
    }

    #[tokio::test]
    async fn test_delete_connector_data_cascades() {
        let (store, _dir) = test_store().await;
        let connector = store
            .create_connector("github", "inst-1", "ds-main")
            .await
            .unwrap();
        store.upsert_document(&doc("d1", "body")).await.unwrap();
        store
            .record_synced_item(
                connector,
                &SyncedItem {
                    kind: "issue".to_string(),
                    external_id: "1".to_string(),
                    parent_external_id: None,
                    document_id: "d1".to_string(),
                },
            )
            .await
            .unwrap();

        store.delete_connector_data(connector).await.unwrap();
        assert!(store.get_connector(connector).await.unwrap().is_none());
        assert!(store.get_document("d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursor_scopes_are_independent() {
        let (store, _dir) = test_store().await;
        store.set_cursor("c1/issues", "p3").await.unwrap();
        store.set_cursor("c1/discussions", "abc").await.unwrap();
        assert_eq!(store.get_cursor("c1/issues").await.unwrap().as_deref(), Some("p3"));
        assert_eq!(
            store.get_cursor("c1/discussions").await.unwrap().as_deref(),
            Some("abc")
        );
        assert!(store.get_cursor("c2/issues").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_status_markers() {
        let (store, _dir) = test_store().await;
        let connector = store
            .create_connector("github", "inst-1", "ds-main")
            .await
            .unwrap();
        let (started, succeeded) = store.sync_status(connector).await.unwrap();
        assert!(started.is_none() && succeeded.is_none());

        store.sync_started(connector).await.unwrap();
        store.sync_succeeded(connector).await.unwrap();
        let (started, succeeded) = store.sync_status(connector).await.unwrap();
        assert!(started.is_some() && succeeded.is_some());
    }
}
