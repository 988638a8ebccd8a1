//! Crawl folder/page records and hierarchy queries.
//!
//! Folders are synthetic nodes for URL path prefixes; pages are crawled
//! documents. A URL can be both at once (a page that is also a folder prefix
//! of deeper pages) — listings merge the two into a single expandable node
//! rather than showing duplicates, and downstream permission checks depend on
//! that single merged identifier.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tracing::warn;

use crate::MirrorStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlFolder {
    pub url: String,
    pub parent_url: Option<String>,
    pub internal_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlPage {
    pub url: String,
    pub parent_url: Option<String>,
    pub document_id: String,
    pub title: Option<String>,
}

/// One entry in a merged folder/page listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub internal_id: String,
    pub parent_internal_id: Option<String>,
    pub title: String,
    pub source_url: Option<String>,
    pub expandable: bool,
    pub is_folder: bool,
}

pub(crate) async fn init_schema(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS crawl_folders (\
            connector_id INTEGER NOT NULL,\
            url TEXT NOT NULL,\
            parent_url TEXT,\
            internal_id TEXT NOT NULL,\
            updated_at TEXT NOT NULL,\
            PRIMARY KEY (connector_id, url)\
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS crawl_pages (\
            connector_id INTEGER NOT NULL,\
            url TEXT NOT NULL,\
            parent_url TEXT,\
            document_id TEXT NOT NULL,\
            title TEXT,\
            updated_at TEXT NOT NULL,\
            PRIMARY KEY (connector_id, url)\
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crawl_folders_parent \
        ON crawl_folders(connector_id, parent_url)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_crawl_pages_parent \
        ON crawl_pages(connector_id, parent_url)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

impl MirrorStore {
    pub async fn upsert_crawl_folder(&self, connector_id: i64, folder: &CrawlFolder) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_folders (connector_id, url, parent_url, internal_id, updated_at) \
            VALUES (?1, ?2, ?3, ?4, ?5) \
            ON CONFLICT(connector_id, url) DO UPDATE SET \
                parent_url=excluded.parent_url, \
                internal_id=excluded.internal_id, \
                updated_at=excluded.updated_at",
        )
        .bind(connector_id)
        .bind(&folder.url)
        .bind(&folder.parent_url)
        .bind(&folder.internal_id)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn upsert_crawl_page(&self, connector_id: i64, page: &CrawlPage) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_pages (connector_id, url, parent_url, document_id, title, updated_at) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(connector_id, url) DO UPDATE SET \
                parent_url=excluded.parent_url, \
                document_id=excluded.document_id, \
                title=excluded.title, \
                updated_at=excluded.updated_at",
        )
        .bind(connector_id)
        .bind(&page.url)
        .bind(&page.parent_url)
        .bind(&page.document_id)
        .bind(&page.title)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_crawl_folder(
        &self,
        connector_id: i64,
        url: &str,
    ) -> Result<Option<CrawlFolder>> {
        let row = sqlx::query_as::<_, (String, Option<String>, String)>(
            "SELECT url, parent_url, internal_id FROM crawl_folders \
            WHERE connector_id = ?1 AND url = ?2",
        )
        .bind(connector_id)
        .bind(url)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(url, parent_url, internal_id)| CrawlFolder {
            url,
            parent_url,
            internal_id,
        }))
    }

    pub async fn crawl_page_count(&self, connector_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM crawl_pages WHERE connector_id = ?1")
                .bind(connector_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count)
    }

    /// Walk parent links from `url` upward, returning the chain including
    /// `url` itself. A corrupted graph could carry a cycle; the visited set
    /// stops the walk at the first repeat and returns the partial chain.
    pub async fn folder_parent_chain(&self, connector_id: i64, url: &str) -> Result<Vec<String>> {
        let mut chain = vec![url.to_string()];
        let mut visited: HashSet<String> = HashSet::new();
        let mut ptr = url.to_string();

        loop {
            let Some(folder) = self.get_crawl_folder(connector_id, &ptr).await? else {
                return Ok(chain);
            };
            let Some(parent_url) = folder.parent_url else {
                return Ok(chain);
            };
            if !visited.insert(parent_url.clone()) {
                warn!(connector_id, url, "cycle in folder parent graph, truncating chain");
                return Ok(chain);
            }
            chain.push(parent_url.clone());
            ptr = parent_url;
        }
    }

    /// List the children of a folder (or the top level when
    /// `parent_internal_id` is `None`), merging dual-role nodes: a folder
    /// that is also a page is suppressed from the folder list and its page
    /// row is returned under the folder's identifier, marked expandable.
    pub async fn list_crawl_children(
        &self,
        connector_id: i64,
        parent_internal_id: Option<&str>,
    ) -> Result<Vec<ResourceNode>> {
        let parent_url = match parent_internal_id {
            Some(id) => {
                let row = sqlx::query_as::<_, (String,)>(
                    "SELECT url FROM crawl_folders WHERE connector_id = ?1 AND internal_id = ?2",
                )
                .bind(connector_id)
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
                match row {
                    Some((url,)) => Some(url),
                    None => anyhow::bail!("parent folder not found: {id}"),
                }
            }
            None => None,
        };

        let folders = self.folders_with_parent(connector_id, parent_url.as_deref()).await?;
        let pages = self.pages_with_parent(connector_id, parent_url.as_deref()).await?;

        let page_urls: HashSet<String> =
            pages.iter().map(|p| trim_slash(&p.url).to_string()).collect();
        // Folders that are also pages collapse into the page entry.
        let dual_role: HashSet<String> = folders
            .iter()
            .map(|f| f.url.clone())
            .filter(|u| page_urls.contains(trim_slash(u)))
            .collect();

        let mut nodes = Vec::new();
        for folder in &folders {
            if dual_role.contains(&folder.url) {
                continue;
            }
            nodes.push(ResourceNode {
                internal_id: folder.internal_id.clone(),
                parent_internal_id: self
                    .folder_internal_id(connector_id, folder.parent_url.as_deref())
                    .await?,
                title: display_name(&folder.url),
                source_url: None,
                expandable: true,
                is_folder: true,
            });
        }
        for page in &pages {
            let merged_folder = folders
                .iter()
                .find(|f| dual_role.contains(&f.url) && trim_slash(&f.url) == trim_slash(&page.url));
            nodes.push(ResourceNode {
                internal_id: match merged_folder {
                    Some(folder) => folder.internal_id.clone(),
                    None => page.document_id.clone(),
                },
                parent_internal_id: self
                    .folder_internal_id(connector_id, page.parent_url.as_deref())
                    .await?,
                title: page
                    .title
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| display_name(&page.url)),
                source_url: Some(page.url.clone()),
                expandable: merged_folder.is_some(),
                is_folder: false,
            });
        }

        nodes.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(nodes)
    }

    async fn folders_with_parent(
        &self,
        connector_id: i64,
        parent_url: Option<&str>,
    ) -> Result<Vec<CrawlFolder>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, String)>(
            "SELECT url, parent_url, internal_id FROM crawl_folders \
            WHERE connector_id = ?1 AND parent_url IS ?2",
        )
        .bind(connector_id)
        .bind(parent_url)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(url, parent_url, internal_id)| CrawlFolder {
                url,
                parent_url,
                internal_id,
            })
            .collect())
    }

    async fn pages_with_parent(
        &self,
        connector_id: i64,
        parent_url: Option<&str>,
    ) -> Result<Vec<CrawlPage>> {
        let rows = sqlx::query_as::<_, (String, Option<String>, String, Option<String>)>(
            "SELECT url, parent_url, document_id, title FROM crawl_pages \
            WHERE connector_id = ?1 AND parent_url IS ?2",
        )
        .bind(connector_id)
        .bind(parent_url)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(url, parent_url, document_id, title)| CrawlPage {
                url,
                parent_url,
                document_id,
                title,
            })
            .collect())
    }

    async fn folder_internal_id(
        &self,
        connector_id: i64,
        url: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(url) = url else { return Ok(None) };
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT internal_id FROM crawl_folders WHERE connector_id = ?1 AND url = ?2",
        )
        .bind(connector_id)
        .bind(url)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|(id,)| id))
    }
}

fn trim_slash(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Last path segment of a URL, or the URL itself at the top level.
fn display_name(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(|s| s.to_string())
            .unwrap_or_else(|| url.to_string()),
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (MirrorStore, tempfile::TempDir, i64) {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(&dir.path().join("mirror.db")).await.unwrap();
        let connector = store
            .create_crawl_connector("https://x.com", "ds-main")
            .await
            .unwrap();
        (store, dir, connector)
    }

    fn folder(url: &str, parent: Option<&str>) -> CrawlFolder {
        CrawlFolder {
            url: url.to_string(),
            parent_url: parent.map(str::to_string),
            internal_id: format!("folder-{url}"),
        }
    }

    fn page(url: &str, parent: Option<&str>, title: &str) -> CrawlPage {
        CrawlPage {
            url: url.to_string(),
            parent_url: parent.map(str::to_string),
            document_id: format!("page-{url}"),
            title: Some(title.to_string()),
        }
    }

    #[tokio::test]
    async fn test_parent_chain_walks_to_root() {
        let (store, _dir, c) = test_store().await;
        store.upsert_crawl_folder(c, &folder("https://x.com", None)).await.unwrap();
        store
            .upsert_crawl_folder(c, &folder("https://x.com/a", Some("https://x.com")))
            .await
            .unwrap();
        store
            .upsert_crawl_folder(c, &folder("https://x.com/a/b", Some("https://x.com/a")))
            .await
            .unwrap();

        let chain = store.folder_parent_chain(c, "https://x.com/a/b").await.unwrap();
        assert_eq!(
            chain,
            vec!["https://x.com/a/b", "https://x.com/a", "https://x.com"]
        );
    }

    #[tokio::test]
    async fn test_parent_chain_terminates_on_cycle() {
        let (store, _dir, c) = test_store().await;
        // A.parent = B, B.parent = A: corrupted by construction.
        store
            .upsert_crawl_folder(c, &folder("https://x.com/a", Some("https://x.com/b")))
            .await
            .unwrap();
        store
            .upsert_crawl_folder(c, &folder("https://x.com/b", Some("https://x.com/a")))
            .await
            .unwrap();

        let chain = store.folder_parent_chain(c, "https://x.com/a").await.unwrap();
        assert!(chain.len() <= 3);
        assert_eq!(chain[0], "https://x.com/a");
    }

    #[tokio::test]
    async fn test_dual_role_node_is_merged() {
        let (store, _dir, c) = test_store().await;
        store.upsert_crawl_folder(c, &folder("https://x.com", None)).await.unwrap();
        store
            .upsert_crawl_folder(c, &folder("https://x.com/docs", Some("https://x.com")))
            .await
            .unwrap();
        // /docs is both a folder (it has children) and a crawled page.
        store
            .upsert_crawl_page(c, &page("https://x.com/docs", Some("https://x.com"), "Docs"))
            .await
            .unwrap();
        store
            .upsert_crawl_page(
                c,
                &page("https://x.com/docs/intro", Some("https://x.com/docs"), "Intro"),
            )
            .await
            .unwrap();

        let root_folder = store.get_crawl_folder(c, "https://x.com").await.unwrap().unwrap();
        let children = store
            .list_crawl_children(c, Some(&root_folder.internal_id))
            .await
            .unwrap();

        // One merged node, not a folder plus a page.
        assert_eq!(children.len(), 1);
        let node = &children[0];
        assert_eq!(node.internal_id, "folder-https://x.com/docs");
        assert!(node.expandable);
        assert!(!node.is_folder);
        assert_eq!(node.source_url.as_deref(), Some("https://x.com/docs"));
    }

    #[tokio::test]
    async fn test_plain_children_listing() {
        let (store, _dir, c) = test_store().await;
        store.upsert_crawl_folder(c, &folder("https://x.com", None)).await.unwrap();
        store
            .upsert_crawl_folder(c, &folder("https://x.com/guides", Some("https://x.com")))
            .await
            .unwrap();
        store
            .upsert_crawl_page(c, &page("https://x.com/about", Some("https://x.com"), "About"))
            .await
            .unwrap();

        let root = store.get_crawl_folder(c, "https://x.com").await.unwrap().unwrap();
        let children = store.list_crawl_children(c, Some(&root.internal_id)).await.unwrap();

        assert_eq!(children.len(), 2);
        let folder_node = children.iter().find(|n| n.is_folder).unwrap();
        assert_eq!(folder_node.title, "guides");
        assert!(folder_node.expandable);
        let page_node = children.iter().find(|n| !n.is_folder).unwrap();
        assert_eq!(page_node.title, "About");
        assert!(!page_node.expandable);
    }
}
