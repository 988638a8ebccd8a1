//! Full-sync fan-out.
//!
//! A full sync enumerates every repository visible to the installation and
//! mirrors each one's issues, discussions and code overview. Fan-out is
//! admission-controlled at two levels: a repository gate bounds how many
//! repositories sync at once, and each repository owns an item gate bounding
//! its in-flight item fetches. A failing item or repository never cancels its
//! siblings; failures are tallied and reported at the end.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument, warn};
use tributary_store::{MirrorStore, SyncedItem};

use tributary_task::{await_all, with_timeout, ConcurrencyGate, StepTimeouts};

use crate::pagination::collect_all;
use crate::source::{ItemRef, RepoRef, SourceClient, SyncTarget, SyncUnitKind};

/// Gate sizes for the two fan-out levels.
#[derive(Debug, Clone, Copy)]
pub struct SyncConcurrency {
    pub repos: usize,
    pub items: usize,
}

impl Default for SyncConcurrency {
    fn default() -> Self {
        Self { repos: 3, items: 3 }
    }
}

/// Outcome of one full-sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub repos_synced: usize,
    pub repos_failed: usize,
    pub items_synced: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    pub fn succeeded(&self) -> bool {
        self.repos_failed == 0
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    source: Arc<dyn SourceClient>,
    store: MirrorStore,
    timeouts: StepTimeouts,
    concurrency: SyncConcurrency,
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn SourceClient>,
        store: MirrorStore,
        timeouts: StepTimeouts,
        concurrency: SyncConcurrency,
    ) -> Self {
        Self {
            source,
            store,
            timeouts,
            concurrency,
        }
    }

    pub fn store(&self) -> &MirrorStore {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn SourceClient> {
        &self.source
    }

    pub fn timeouts(&self) -> &StepTimeouts {
        &self.timeouts
    }

    /// Run one sync pass for `target`, full or code-only. The success marker
    /// is recorded only when every repository synced cleanly.
    #[instrument(skip(self), fields(connector_id = target.connector_id, code_only = target.code_only))]
    pub async fn run_full_sync(&self, target: &SyncTarget) -> Result<SyncReport> {
        with_timeout(
            self.timeouts.metadata,
            self.store.sync_started(target.connector_id),
        )
        .await??;

        let repos = with_timeout(
            self.timeouts.listing,
            collect_all(|cursor| self.source.list_repositories(&target.installation_id, cursor)),
        )
        .await?
        .map_err(|e| anyhow::anyhow!("listing repositories: {e}"))?;
        info!(count = repos.len(), "enumerated repositories");

        let gate = ConcurrencyGate::new(self.concurrency.repos);
        let mut handles = Vec::new();
        for repo in repos {
            let this = self.clone();
            let target = target.clone();
            handles.push(gate.admit(async move {
                let full_name = repo.full_name();
                this.sync_repository(&target, repo)
                    .await
                    .map_err(|e| format!("{full_name}: {e}"))
            }));
        }

        let mut report = SyncReport::default();
        for result in await_all(handles).await {
            match result {
                Ok(Ok(items)) => {
                    report.repos_synced += 1;
                    report.items_synced += items;
                }
                Ok(Err(msg)) => {
                    report.repos_failed += 1;
                    report.errors.push(msg);
                }
                Err(e) => {
                    report.repos_failed += 1;
                    report.errors.push(e.to_string());
                }
            }
        }

        if report.succeeded() {
            with_timeout(
                self.timeouts.metadata,
                self.store.sync_succeeded(target.connector_id),
            )
            .await??;
        } else {
            warn!(
                failed = report.repos_failed,
                "full sync finished with failures, success marker not updated"
            );
        }
        Ok(report)
    }

    /// Mirror one repository: issues, then discussions, then the code
    /// overview. In code-only mode the per-item fan-out is skipped entirely.
    /// A failing enumeration never stops its sibling kind or the code step;
    /// everything runs, then failures are reported together. Returns the
    /// number of items synced.
    pub async fn sync_repository(&self, target: &SyncTarget, repo: RepoRef) -> Result<usize> {
        let mut items_synced = 0usize;
        let mut failures: Vec<String> = Vec::new();

        if !target.code_only {
            for kind in [SyncUnitKind::Issue, SyncUnitKind::Discussion] {
                match self.sync_items(target, &repo, kind).await {
                    Ok(n) => items_synced += n,
                    Err(e) => failures.push(e.to_string()),
                }
            }
        }

        // Code overview runs even when a repository has no items or its
        // item enumerations failed.
        match self.sync_code_overview(target, &repo).await {
            Ok(n) => items_synced += n,
            Err(e) => failures.push(e.to_string()),
        }

        if failures.is_empty() {
            Ok(items_synced)
        } else {
            Err(anyhow::anyhow!("{}", failures.join("; ")))
        }
    }

    async fn sync_code_overview(&self, target: &SyncTarget, repo: &RepoRef) -> Result<usize> {
        let code = with_timeout(
            self.timeouts.bulk_content,
            self.source.fetch_code_overview(repo),
        )
        .await?
        .map_err(|e| anyhow::anyhow!("code overview for {}: {e}", repo.full_name()))?;
        let Some(doc) = code else {
            return Ok(0);
        };
        self.store.upsert_document(&doc).await?;
        self.store
            .record_synced_item(
                target.connector_id,
                &SyncedItem {
                    kind: "code".to_string(),
                    external_id: repo.full_name(),
                    parent_external_id: Some(repo.full_name()),
                    document_id: doc.document_id.clone(),
                },
            )
            .await?;
        Ok(1)
    }

    async fn sync_items(
        &self,
        target: &SyncTarget,
        repo: &RepoRef,
        kind: SyncUnitKind,
    ) -> Result<usize> {
        let scope = target.cursor_scope(repo, kind);
        let items = with_timeout(
            self.timeouts.listing,
            collect_all(|cursor| {
                let store = self.store.clone();
                let source = Arc::clone(&self.source);
                let scope = scope.clone();
                let repo = repo.clone();
                async move {
                    if let Some(c) = &cursor {
                        // Cursor persistence is observability only; an
                        // enumeration always restarts from the beginning.
                        if let Err(e) = store.set_cursor(&scope, c).await {
                            warn!(scope, error = %e, "failed to persist cursor");
                        }
                    }
                    source.list_items(&repo, kind, cursor).await
                }
            }),
        )
        .await?
        .map_err(|e| anyhow::anyhow!("listing {} in {}: {e}", kind.as_str(), repo.full_name()))?;

        let gate = ConcurrencyGate::new(self.concurrency.items);
        let mut handles = Vec::new();
        for item in items {
            let this = self.clone();
            let target = target.clone();
            handles.push(gate.admit(async move {
                let id = item.external_id();
                with_timeout(this.timeouts.listing, this.mirror_item(&target, &item))
                    .await
                    .map_err(|e| format!("{id}: {e}"))?
                    .map_err(|e| format!("{id}: {e}"))
            }));
        }

        let mut synced = 0usize;
        let mut failed = 0usize;
        let mut first_error: Option<String> = None;
        for result in await_all(handles).await {
            match result {
                Ok(Ok(())) => synced += 1,
                Ok(Err(msg)) => {
                    warn!(error = %msg, "item sync failed");
                    failed += 1;
                    first_error.get_or_insert(msg);
                }
                Err(e) => {
                    failed += 1;
                    first_error.get_or_insert(e.to_string());
                }
            }
        }

        match first_error {
            Some(msg) => Err(anyhow::anyhow!(
                "{failed} {}(s) failed, first: {msg}",
                kind.as_str()
            )),
            None => Ok(synced),
        }
    }

    /// Fetch one item and mirror it: document upsert plus a ledger entry so
    /// garbage collection can reconcile it later.
    pub async fn mirror_item(&self, target: &SyncTarget, item: &ItemRef) -> Result<()> {
        let doc = self
            .source
            .fetch_item(item)
            .await
            .map_err(|e| anyhow::anyhow!("fetch: {e}"))?;
        self.store.upsert_document(&doc).await?;
        self.store
            .record_synced_item(
                target.connector_id,
                &SyncedItem {
                    kind: item.kind.as_str().to_string(),
                    external_id: item.external_id(),
                    parent_external_id: Some(item.repo.full_name()),
                    document_id: doc.document_id.clone(),
                },
            )
            .await?;
        Ok(())
    }

    /// One incremental pass for a single item, triggered by a change
    /// notification. An item deleted upstream is removed from the mirror.
    #[instrument(skip(self, target), fields(item = %item.external_id(), coalesced))]
    pub async fn run_incremental_pass(
        &self,
        target: &SyncTarget,
        item: &ItemRef,
        coalesced: u64,
    ) -> Result<()> {
        let exists = self
            .source
            .item_exists(item)
            .await
            .map_err(|e| anyhow::anyhow!("existence check: {e}"))?;
        if !exists {
            let external_id = item.external_id();
            if let Some(entry) = self
                .store
                .get_synced_item(target.connector_id, item.kind.as_str(), &external_id)
                .await?
            {
                self.store.delete_document(&entry.document_id).await?;
                self.store
                    .delete_synced_item(target.connector_id, item.kind.as_str(), &external_id)
                    .await?;
                info!("removed item deleted upstream");
            }
            return Ok(());
        }

        with_timeout(self.timeouts.listing, self.mirror_item(target, item)).await??;
        Ok(())
    }
}
