//! Bounded breadth-first web crawler.
//!
//! Starting from one seed URL, the crawler fetches pages up to a depth and
//! page budget, derives each page's ancestor-folder chain, and mirrors the
//! extracted content. Per-page fetch failures are counted and swallowed so
//! the crawl keeps going; document upsert failures are also counted but
//! surface as a hard failure once the whole crawl has completed, so partial
//! success is preserved on disk first.

pub mod extract;
pub mod hierarchy;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use tributary_store::{CrawlFolder, CrawlPage, DocumentRecord, MirrorStore};
use tributary_task::Heartbeat;

use crate::error::SourceError;
use crate::source::DocumentSink;
use extract::{extract_page, ExtractedPage};
use hierarchy::{ancestor_folders, normalize, parent_folder, stable_id, NodeKind};

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_depth: usize,
    pub max_pages: usize,
    pub concurrency: usize,
    /// Extracted text longer than this is skipped, not truncated.
    pub max_document_len: usize,
    pub request_timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_pages: 512,
            concurrency: 4,
            max_document_len: 750_000,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Fetches one page body. The crawl loop is written against this seam so
/// tests can substitute canned responses.
#[async_trait]
pub trait PageTransport: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<String, SourceError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("tributary-crawler/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageTransport for HttpTransport {
    async fn fetch(&self, url: &Url) -> Result<String, SourceError> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                SourceError::transient(format!("HTTP {status} for {url}"))
            } else {
                SourceError::permanent(format!("HTTP {status} for {url}"))
            });
        }
        Ok(response.text().await?)
    }
}

/// Pass-scoped counters merged into the final report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlReport {
    /// Pages fetched and parsed.
    pub pages_visited: usize,
    /// Pages whose extracted content was written to the document store.
    pub pages_indexed: usize,
    /// Pages skipped for empty or oversized content.
    pub pages_skipped: usize,
    pub fetch_errors: usize,
    pub upsert_errors: usize,
}

pub struct CrawlScheduler {
    store: MirrorStore,
    sink: Arc<dyn DocumentSink>,
    transport: Arc<dyn PageTransport>,
    config: CrawlConfig,
    heartbeat: Heartbeat,
}

impl CrawlScheduler {
    pub fn new(
        store: MirrorStore,
        sink: Arc<dyn DocumentSink>,
        transport: Arc<dyn PageTransport>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            store,
            sink,
            transport,
            config,
            heartbeat: Heartbeat::new(),
        }
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Crawl a connector's configured site. The success marker is recorded
    /// whenever at least one page was indexed, before any upsert-error
    /// failure is raised.
    #[instrument(skip(self))]
    pub async fn crawl_connector(&self, connector_id: i64) -> Result<CrawlReport> {
        let seed = self
            .store
            .crawl_seed_url(connector_id)
            .await?
            .ok_or_else(|| anyhow!("connector {connector_id} has no crawl configuration"))?;
        self.store.sync_started(connector_id).await?;

        let report = self.crawl(connector_id, &seed).await?;

        if report.pages_indexed > 0 {
            self.store.sync_succeeded(connector_id).await?;
        }
        if report.upsert_errors > 0 {
            bail!(
                "{} document upsert(s) failed during crawl of {seed}",
                report.upsert_errors
            );
        }
        Ok(report)
    }

    pub async fn crawl(&self, connector_id: i64, seed: &str) -> Result<CrawlReport> {
        let seed_url = normalize(seed)
            .and_then(|u| Url::parse(&u).ok())
            .ok_or_else(|| anyhow!("invalid seed URL: {seed}"))?;
        let seed_host = seed_url.host_str().unwrap_or_default().to_string();

        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut created_folders: HashSet<String> = HashSet::new();
        let mut report = CrawlReport::default();
        // Admitted fetches, including in-flight ones. Once the budget is hit
        // no new fetches are issued; in-flight ones finish.
        let mut admitted = 0usize;

        frontier.push_back((seed_url.as_str().trim_end_matches('/').to_string(), 0));

        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set: JoinSet<(String, usize, Result<String, SourceError>)> = JoinSet::new();

        loop {
            while join_set.len() < concurrency
                && !frontier.is_empty()
                && admitted < self.config.max_pages
            {
                let (url, depth) = frontier.pop_front().expect("frontier is non-empty");
                if !visited.insert(url.clone()) {
                    continue;
                }
                admitted += 1;

                let transport = Arc::clone(&self.transport);
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = semaphore.acquire().await.expect("crawl semaphore closed");
                    let parsed = match Url::parse(&url) {
                        Ok(parsed) => parsed,
                        Err(e) => return (url, depth, Err(SourceError::permanent(e.to_string()))),
                    };
                    let result = transport.fetch(&parsed).await;
                    (url, depth, result)
                });
            }

            if join_set.is_empty()
                && (frontier.is_empty() || admitted >= self.config.max_pages)
            {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                continue;
            };
            match joined {
                Ok((url, depth, Ok(body))) => {
                    report.pages_visited += 1;
                    self.heartbeat.beat(&url);

                    let parsed = Url::parse(&url).expect("visited URLs are well-formed");
                    let page = extract_page(&parsed, &body);

                    if depth < self.config.max_depth {
                        for link in &page.links {
                            if visited.contains(link) {
                                continue;
                            }
                            let same_host = Url::parse(link)
                                .ok()
                                .and_then(|u| u.host_str().map(|h| h == seed_host))
                                .unwrap_or(false);
                            if same_host {
                                frontier.push_back((link.clone(), depth + 1));
                            }
                        }
                    }

                    self.record_page(connector_id, &url, &page, &mut created_folders, &mut report)
                        .await?;
                }
                Ok((url, _, Err(e))) => {
                    warn!(url, error = %e, "page fetch failed");
                    report.fetch_errors += 1;
                }
                Err(e) => {
                    warn!(error = %e, "crawl task failed");
                    report.fetch_errors += 1;
                }
            }
        }

        info!(
            visited = report.pages_visited,
            indexed = report.pages_indexed,
            skipped = report.pages_skipped,
            fetch_errors = report.fetch_errors,
            upsert_errors = report.upsert_errors,
            "crawl finished"
        );
        Ok(report)
    }

    /// Persist one visited page: its not-yet-created ancestor folders, the
    /// page record, and (content permitting) the extracted document.
    async fn record_page(
        &self,
        connector_id: i64,
        url: &str,
        page: &ExtractedPage,
        created_folders: &mut HashSet<String>,
        report: &mut CrawlReport,
    ) -> Result<()> {
        for ancestor in ancestor_folders(url) {
            if !created_folders.insert(ancestor.clone()) {
                continue;
            }
            self.store
                .upsert_crawl_folder(
                    connector_id,
                    &CrawlFolder {
                        parent_url: parent_folder(&ancestor),
                        internal_id: stable_id(&ancestor, NodeKind::Folder),
                        url: ancestor,
                    },
                )
                .await?;
        }

        let document_id = stable_id(url, NodeKind::File);
        self.store
            .upsert_crawl_page(
                connector_id,
                &CrawlPage {
                    url: url.to_string(),
                    parent_url: parent_folder(url),
                    document_id: document_id.clone(),
                    title: page.title.clone(),
                },
            )
            .await?;

        if page.text.is_empty() {
            debug!(url, "skipping page with empty extracted content");
            report.pages_skipped += 1;
            return Ok(());
        }
        if page.text.len() > self.config.max_document_len {
            debug!(url, len = page.text.len(), "skipping oversized page");
            report.pages_skipped += 1;
            return Ok(());
        }

        let doc = DocumentRecord {
            document_id,
            source: "webcrawler".to_string(),
            url: Some(url.to_string()),
            title: page.title.clone(),
            body: page.text.clone(),
            updated_at: Utc::now(),
        };
        match self.sink.upsert_document(&doc).await {
            Ok(()) => report.pages_indexed += 1,
            Err(e) => {
                warn!(url, error = %e, "document upsert failed");
                report.upsert_errors += 1;
            }
        }
        Ok(())
    }
}
