//! GitHub source client.
//!
//! REST-based, page-number pagination: a cursor is the next page number as a
//! string, 100 items per page. Pull requests come back on the issues listing
//! and are filtered out. Deleted or inaccessible resources (404/410) read as
//! absent rather than as errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;
use tributary_store::DocumentRecord;

use super::call_with_backoff;
use crate::config::GithubConfig;
use crate::error::SourceError;
use crate::pagination::{Cursor, Page};
use crate::source::{ItemRef, RepoRef, SourceClient, SyncUnitKind};

const PAGE_SIZE: usize = 100;

pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> anyhow::Result<Self> {
        let token = std::env::var(&config.token_env)
            .map_err(|_| anyhow::anyhow!("environment variable {} is not set", config.token_env))?;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}").parse()?,
        );
        headers.insert(
            reqwest::header::ACCEPT,
            "application/vnd.github+json".parse()?,
        );

        let client = reqwest::Client::builder()
            .user_agent("tributary/0.1")
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, SourceError> {
        let response = call_with_backoff("github", || self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    /// Existence probe: 200 reads as present, 404/410 as absent.
    async fn exists(&self, url: &str) -> Result<bool, SourceError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status.as_u16() == 404 || status.as_u16() == 410 {
            return Ok(false);
        }
        Err(if status.is_server_error() {
            SourceError::transient(format!("github: HTTP {status}"))
        } else {
            SourceError::permanent(format!("github: HTTP {status}"))
        })
    }

    fn item_path(&self, item: &ItemRef) -> String {
        format!(
            "{}/repos/{}/{}/{}/{}",
            self.base_url,
            item.repo.owner,
            item.repo.name,
            kind_segment(item.kind),
            item.number
        )
    }
}

fn kind_segment(kind: SyncUnitKind) -> &'static str {
    match kind {
        SyncUnitKind::Issue => "issues",
        SyncUnitKind::Discussion => "discussions",
    }
}

fn page_number(cursor: Option<Cursor>) -> Result<usize, SourceError> {
    match cursor {
        Some(c) => c
            .parse()
            .map_err(|_| SourceError::permanent(format!("github: malformed cursor {c:?}"))),
        None => Ok(1),
    }
}

fn parse_timestamp(value: &Value) -> DateTime<Utc> {
    value
        .as_str()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Repositories out of a `GET /users/{login}/repos` page.
fn parse_repo_page(payload: &Value) -> Vec<RepoRef> {
    payload
        .as_array()
        .map(|repos| {
            repos
                .iter()
                .filter_map(|repo| {
                    RepoRef::parse(repo.get("full_name")?.as_str()?)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Items out of an issues/discussions listing page. The issues endpoint also
/// returns pull requests; those are dropped.
fn parse_item_page(payload: &Value, repo: &RepoRef, kind: SyncUnitKind) -> Vec<ItemRef> {
    payload
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|item| {
                    !(kind == SyncUnitKind::Issue && item.get("pull_request").is_some())
                })
                .filter_map(|item| item.get("number")?.as_i64())
                .map(|number| ItemRef::new(repo.clone(), kind, number))
                .collect()
        })
        .unwrap_or_default()
}

/// Render an issue or discussion payload as a mirrorable document.
fn item_document(item: &ItemRef, payload: &Value) -> DocumentRecord {
    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let body = payload
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default();
    DocumentRecord {
        document_id: format!(
            "github-{}-{}-{}-{}",
            item.kind.as_str(),
            item.repo.owner,
            item.repo.name,
            item.number
        ),
        source: "github".to_string(),
        url: payload
            .get("html_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        title: Some(title.clone()),
        body: format!("{title}\n\n{body}"),
        updated_at: parse_timestamp(payload.get("updated_at").unwrap_or(&Value::Null)),
    }
}

#[async_trait]
impl SourceClient for GithubClient {
    async fn list_repositories(
        &self,
        installation_id: &str,
        cursor: Option<Cursor>,
    ) -> Result<Page<RepoRef>, SourceError> {
        let page = page_number(cursor)?;
        let url = format!(
            "{}/users/{installation_id}/repos?type=owner&per_page={PAGE_SIZE}&page={page}",
            self.base_url
        );
        let payload = self.get_json(&url).await?;
        let repos = parse_repo_page(&payload);
        debug!(installation_id, page, count = repos.len(), "listed repositories");
        let next = (!repos.is_empty()).then(|| (page + 1).to_string());
        Ok(Page::new(repos, next))
    }

    async fn list_items(
        &self,
        repo: &RepoRef,
        kind: SyncUnitKind,
        cursor: Option<Cursor>,
    ) -> Result<Page<ItemRef>, SourceError> {
        let mut page = page_number(cursor)?;
        // Pull-request filtering can empty a non-terminal page; keep paging
        // internally until a page yields items or the raw listing runs dry.
        loop {
            let url = format!(
                "{}/repos/{}/{}/{}?state=all&per_page={PAGE_SIZE}&page={page}",
                self.base_url,
                repo.owner,
                repo.name,
                kind_segment(kind)
            );
            let payload = self.get_json(&url).await?;
            let raw_count = payload.as_array().map(Vec::len).unwrap_or(0);
            if raw_count == 0 {
                return Ok(Page::end());
            }
            let items = parse_item_page(&payload, repo, kind);
            if !items.is_empty() {
                return Ok(Page::new(items, Some((page + 1).to_string())));
            }
            page += 1;
        }
    }

    async fn fetch_item(&self, item: &ItemRef) -> Result<DocumentRecord, SourceError> {
        let payload = self.get_json(&self.item_path(item)).await?;
        Ok(item_document(item, &payload))
    }

    async fn fetch_code_overview(
        &self,
        repo: &RepoRef,
    ) -> Result<Option<DocumentRecord>, SourceError> {
        let url = format!("{}/repos/{}/{}/readme", self.base_url, repo.owner, repo.name);
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw+json")
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(if status.is_server_error() {
                SourceError::transient(format!("github: HTTP {status}"))
            } else {
                SourceError::permanent(format!("github: HTTP {status}"))
            });
        }
        let body = response.text().await?;
        Ok(Some(DocumentRecord {
            document_id: format!("github-code-{}-{}", repo.owner, repo.name),
            source: "github".to_string(),
            url: Some(format!("https://github.com/{}", repo.full_name())),
            title: Some(format!("{} README", repo.full_name())),
            body,
            updated_at: Utc::now(),
        }))
    }

    async fn repository_exists(&self, full_name: &str) -> Result<bool, SourceError> {
        self.exists(&format!("{}/repos/{full_name}", self.base_url)).await
    }

    async fn item_exists(&self, item: &ItemRef) -> Result<bool, SourceError> {
        self.exists(&self.item_path(item)).await
    }
}
