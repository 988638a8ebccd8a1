//! Service configuration schema and loading.
//!
//! Tributary is configured via a TOML file (default `~/.tributary/config.toml`).
//! All knobs have defaults, so a missing file yields a working configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tributary_task::StepTimeouts;

use crate::crawler::CrawlConfig;
use crate::fanout::SyncConcurrency;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TributaryConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrently syncing repositories per connector.
    #[serde(default = "default_repo_concurrency")]
    pub repo_concurrency: usize,

    /// Concurrently syncing items per repository.
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,

    /// Quiet window for debounced incremental syncs, in seconds.
    #[serde(default = "default_quiet_window_secs")]
    pub quiet_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    #[serde(default = "default_crawl_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_max_document_len")]
    pub max_document_len: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_api_base")]
    pub api_base_url: String,

    /// Environment variable holding the API token.
    #[serde(default = "default_github_token_env")]
    pub token_env: String,
}

fn default_repo_concurrency() -> usize {
    3
}
fn default_item_concurrency() -> usize {
    3
}
fn default_quiet_window_secs() -> u64 {
    10
}
fn default_max_depth() -> usize {
    5
}
fn default_max_pages() -> usize {
    512
}
fn default_crawl_concurrency() -> usize {
    4
}
fn default_max_document_len() -> usize {
    750_000
}
fn default_request_timeout_secs() -> u64 {
    15
}
fn default_github_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_github_token_env() -> String {
    "TRIBUTARY_GITHUB_TOKEN".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            repo_concurrency: default_repo_concurrency(),
            item_concurrency: default_item_concurrency(),
            quiet_window_secs: default_quiet_window_secs(),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            concurrency: default_crawl_concurrency(),
            max_document_len: default_max_document_len(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_github_api_base(),
            token_env: default_github_token_env(),
        }
    }
}

impl TributaryConfig {
    /// Load configuration from a TOML file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn sync_concurrency(&self) -> SyncConcurrency {
        SyncConcurrency {
            repos: self.scheduler.repo_concurrency,
            items: self.scheduler.item_concurrency,
        }
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.scheduler.quiet_window_secs)
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            max_depth: self.crawler.max_depth,
            max_pages: self.crawler.max_pages,
            concurrency: self.crawler.concurrency,
            max_document_len: self.crawler.max_document_len,
            request_timeout: Duration::from_secs(self.crawler.request_timeout_secs),
        }
    }

    pub fn step_timeouts(&self) -> StepTimeouts {
        StepTimeouts::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TributaryConfig::default();
        assert_eq!(config.scheduler.repo_concurrency, 3);
        assert_eq!(config.scheduler.item_concurrency, 3);
        assert_eq!(config.quiet_window(), Duration::from_secs(10));
        let crawl = config.crawl_config();
        assert_eq!(crawl.max_depth, 5);
        assert_eq!(crawl.max_pages, 512);
        assert_eq!(crawl.concurrency, 4);
    }

    #[test]
    fn test_parse_toml_overrides() {
        let toml = r#"
[scheduler]
repo_concurrency = 5
quiet_window_secs = 30

[crawler]
max_pages = 64

[github]
api_base_url = "https://github.internal/api/v3"
"#;
        let config: TributaryConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scheduler.repo_concurrency, 5);
        // Unset keys keep their defaults.
        assert_eq!(config.scheduler.item_concurrency, 3);
        assert_eq!(config.quiet_window(), Duration::from_secs(30));
        assert_eq!(config.crawler.max_pages, 64);
        assert_eq!(config.crawler.max_depth, 5);
        assert_eq!(config.github.api_base_url, "https://github.internal/api/v3");
    }
}
