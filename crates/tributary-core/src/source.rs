//! Source abstraction: what a sync pass talks to upstream.

use async_trait::async_trait;
use tributary_store::{DocumentRecord, MirrorStore};

use crate::error::SourceError;
use crate::pagination::{Cursor, Page};

/// The connector a sync pass operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub connector_id: i64,
    /// External installation/account identifier upstream.
    pub installation_id: String,
    pub data_source: String,
    /// Resync code overviews only, skipping the per-item fan-out.
    pub code_only: bool,
}

impl SyncTarget {
    /// Root key for this connector. Sync tasks, incremental tasks and signal
    /// subscriptions all nest below it, so stopping the prefix stops the
    /// whole family.
    pub fn task_key(&self) -> String {
        format!("connector-{}", self.connector_id)
    }

    /// Key under which a full or code-only sync runs. The mode is part of the
    /// identity: a code-only resync is not a duplicate of a running full sync.
    pub fn sync_task_key(&self) -> String {
        let mode = if self.code_only { "code" } else { "full" };
        format!("{}/sync/{mode}", self.task_key())
    }

    pub fn item_task_key(&self, kind: SyncUnitKind, external_id: &str) -> String {
        format!("connector-{}/{}/{}", self.connector_id, kind.as_str(), external_id)
    }

    pub fn cursor_scope(&self, repo: &RepoRef, kind: SyncUnitKind) -> String {
        format!("{}/{}/{}", self.connector_id, repo.full_name(), kind.as_str())
    }
}

/// An upstream repository, addressed by owner and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn parse(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.split_once('/')?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(owner, name))
    }
}

/// The kinds of per-repository items a sync pass enumerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncUnitKind {
    Issue,
    Discussion,
}

impl SyncUnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "issue",
            Self::Discussion => "discussion",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "issue" => Some(Self::Issue),
            "discussion" => Some(Self::Discussion),
            _ => None,
        }
    }
}

/// One item inside a repository, addressed by its number.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemRef {
    pub repo: RepoRef,
    pub kind: SyncUnitKind,
    pub number: i64,
}

impl ItemRef {
    pub fn new(repo: RepoRef, kind: SyncUnitKind, number: i64) -> Self {
        Self { repo, kind, number }
    }

    /// Ledger form: `owner/name#42`.
    pub fn external_id(&self) -> String {
        format!("{}#{}", self.repo.full_name(), self.number)
    }

    pub fn parse(kind: SyncUnitKind, external_id: &str) -> Option<Self> {
        let (full_name, number) = external_id.rsplit_once('#')?;
        let repo = RepoRef::parse(full_name)?;
        let number: i64 = number.parse().ok()?;
        Some(Self { repo, kind, number })
    }
}

/// Upstream API surface a full or incremental sync needs.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Repositories visible to the installation, one page at a time.
    async fn list_repositories(
        &self,
        installation_id: &str,
        cursor: Option<Cursor>,
    ) -> Result<Page<RepoRef>, SourceError>;

    /// Items of `kind` in `repo`, one page at a time.
    async fn list_items(
        &self,
        repo: &RepoRef,
        kind: SyncUnitKind,
        cursor: Option<Cursor>,
    ) -> Result<Page<ItemRef>, SourceError>;

    /// Fetch one item rendered as a mirrorable document.
    async fn fetch_item(&self, item: &ItemRef) -> Result<DocumentRecord, SourceError>;

    /// A repository-level code overview document, if the repository has one.
    async fn fetch_code_overview(
        &self,
        repo: &RepoRef,
    ) -> Result<Option<DocumentRecord>, SourceError>;

    /// Whether the repository still exists (and is visible) upstream.
    async fn repository_exists(&self, full_name: &str) -> Result<bool, SourceError>;

    /// Whether the item still exists upstream.
    async fn item_exists(&self, item: &ItemRef) -> Result<bool, SourceError>;
}

/// Where mirrored documents land. [`tributary_store::MirrorStore`] is the
/// real sink; tests substitute their own to observe or fail writes.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn upsert_document(&self, doc: &DocumentRecord) -> anyhow::Result<()>;
}

#[async_trait]
impl DocumentSink for tributary_store::MirrorStore {
    async fn upsert_document(&self, doc: &DocumentRecord) -> anyhow::Result<()> {
        MirrorStore::upsert_document(self, doc).await
    }
}
