//! Mirror garbage collection.
//!
//! A deletion upstream produces no signal, so the ledger is reconciled
//! against upstream on demand: one existence check per repository, then one
//! per surviving item. A repository that disappeared takes its whole subtree
//! with it without per-item checks. Check failures leave the item in place;
//! the next pass retries it.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, instrument, warn};
use tributary_store::SyncedItem;
use tributary_task::with_timeout;

use crate::fanout::SyncOrchestrator;
use crate::source::{ItemRef, SyncTarget, SyncUnitKind};

/// Outcome of one garbage-collection pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcReport {
    /// Mirrored items removed because their upstream resource is gone.
    pub removed: usize,
    /// Items whose existence check failed; left in place for the next pass.
    pub failed: usize,
}

impl SyncOrchestrator {
    /// Remove every mirrored item whose upstream resource no longer exists.
    #[instrument(skip(self), fields(connector_id = target.connector_id))]
    pub async fn collect_garbage(&self, target: &SyncTarget) -> Result<GcReport> {
        with_timeout(self.timeouts().garbage_collect, self.gc_pass(target)).await?
    }

    /// Reconcile a single mirrored resource against upstream. `kind` is a
    /// ledger kind, or `"repository"` to reconcile a repository and cascade
    /// to everything mirrored under it.
    pub async fn collect_resource(
        &self,
        target: &SyncTarget,
        kind: &str,
        external_id: &str,
    ) -> Result<GcReport> {
        with_timeout(
            self.timeouts().garbage_collect,
            self.resource_pass(target, kind, external_id),
        )
        .await?
    }

    async fn resource_pass(
        &self,
        target: &SyncTarget,
        kind: &str,
        external_id: &str,
    ) -> Result<GcReport> {
        let mut report = GcReport::default();
        if kind == "repository" {
            let items = self
                .store()
                .items_under(target.connector_id, external_id)
                .await?;
            match self.source().repository_exists(external_id).await {
                Ok(true) => {
                    for item in items {
                        self.reconcile_item(target, &item, &mut report).await?;
                    }
                }
                Ok(false) => {
                    info!(repo = external_id, count = items.len(), "repository gone upstream, removing subtree");
                    for item in items {
                        self.remove_counted(target, &item, &mut report).await;
                    }
                }
                Err(e) => {
                    warn!(repo = external_id, error = %e, "repository existence check failed");
                    report.failed += items.len();
                }
            }
            return Ok(report);
        }

        if let Some(item) = self
            .store()
            .get_synced_item(target.connector_id, kind, external_id)
            .await?
        {
            self.reconcile_item(target, &item, &mut report).await?;
        }
        Ok(report)
    }

    async fn gc_pass(&self, target: &SyncTarget) -> Result<GcReport> {
        let ledger = self.store().list_synced_items(target.connector_id).await?;

        let mut by_repo: HashMap<Option<String>, Vec<SyncedItem>> = HashMap::new();
        for item in ledger {
            by_repo
                .entry(item.parent_external_id.clone())
                .or_default()
                .push(item);
        }

        let mut report = GcReport::default();
        for (repo_name, items) in by_repo {
            match &repo_name {
                Some(full_name) => match self.source().repository_exists(full_name).await {
                    Ok(true) => {
                        for item in items {
                            self.reconcile_item(target, &item, &mut report).await?;
                        }
                    }
                    Ok(false) => {
                        info!(repo = %full_name, count = items.len(), "repository gone upstream, removing subtree");
                        for item in items {
                            self.remove_counted(target, &item, &mut report).await;
                        }
                    }
                    Err(e) => {
                        warn!(repo = %full_name, error = %e, "repository existence check failed");
                        report.failed += items.len();
                    }
                },
                // Orphan entries with no recorded parent get per-item checks.
                None => {
                    for item in items {
                        self.reconcile_item(target, &item, &mut report).await?;
                    }
                }
            }
        }

        info!(removed = report.removed, failed = report.failed, "garbage collection finished");
        Ok(report)
    }

    async fn reconcile_item(
        &self,
        target: &SyncTarget,
        item: &SyncedItem,
        report: &mut GcReport,
    ) -> Result<()> {
        // Code overview entries live and die with their repository, which was
        // already confirmed alive.
        if item.kind == "code" {
            return Ok(());
        }
        let Some(kind) = SyncUnitKind::parse(&item.kind) else {
            warn!(kind = %item.kind, external_id = %item.external_id, "unknown ledger kind");
            report.failed += 1;
            return Ok(());
        };
        let Some(item_ref) = ItemRef::parse(kind, &item.external_id) else {
            warn!(external_id = %item.external_id, "malformed ledger external id");
            report.failed += 1;
            return Ok(());
        };

        match self.source().item_exists(&item_ref).await {
            Ok(true) => {}
            Ok(false) => {
                self.remove_counted(target, item, report).await;
            }
            Err(e) => {
                warn!(external_id = %item.external_id, error = %e, "item existence check failed");
                report.failed += 1;
            }
        }
        Ok(())
    }

    /// Remove one mirrored item, tallying the outcome. A store failure is
    /// logged and counted; the pass moves on to the remaining artifacts.
    async fn remove_counted(&self, target: &SyncTarget, item: &SyncedItem, report: &mut GcReport) {
        match self.remove_item(target, item).await {
            Ok(()) => report.removed += 1,
            Err(e) => {
                warn!(external_id = %item.external_id, error = %e, "failed to remove mirrored item");
                report.failed += 1;
            }
        }
    }

    async fn remove_item(&self, target: &SyncTarget, item: &SyncedItem) -> Result<()> {
        self.store().delete_document(&item.document_id).await?;
        self.store()
            .delete_synced_item(target.connector_id, &item.kind, &item.external_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tributary_store::{DocumentRecord, MirrorStore};
    use tributary_task::StepTimeouts;

    use crate::error::SourceError;
    use crate::fanout::SyncConcurrency;
    use crate::pagination::{Cursor, Page};
    use crate::source::{RepoRef, SourceClient};

    struct GcSource {
        live_repos: HashSet<String>,
        dead_items: HashSet<String>,
        flaky_items: HashSet<String>,
    }

    #[async_trait]
    impl SourceClient for GcSource {
        async fn list_repositories(
            &self,
            _installation_id: &str,
            _cursor: Option<Cursor>,
        ) -> Result<Page<RepoRef>, SourceError> {
            Ok(Page::end())
        }

        async fn list_items(
            &self,
            _repo: &RepoRef,
            _kind: SyncUnitKind,
            _cursor: Option<Cursor>,
        ) -> Result<Page<ItemRef>, SourceError> {
            Ok(Page::end())
        }

        async fn fetch_item(&self, _item: &ItemRef) -> Result<DocumentRecord, SourceError> {
            Err(SourceError::permanent("not used"))
        }

        async fn fetch_code_overview(
            &self,
            _repo: &RepoRef,
        ) -> Result<Option<DocumentRecord>, SourceError> {
            Ok(None)
        }

        async fn repository_exists(&self, full_name: &str) -> Result<bool, SourceError> {
            Ok(self.live_repos.contains(full_name))
        }

        async fn item_exists(&self, item: &ItemRef) -> Result<bool, SourceError> {
            let id = item.external_id();
            if self.flaky_items.contains(&id) {
                return Err(SourceError::transient("timeout"));
            }
            Ok(!self.dead_items.contains(&id))
        }
    }

    async fn seeded(
        source: GcSource,
        entries: &[(&str, &str, Option<&str>)],
    ) -> (SyncOrchestrator, tempfile::TempDir, SyncTarget) {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(&dir.path().join("mirror.db")).await.unwrap();
        let connector_id = store
            .create_connector("github", "inst-1", "ds-main")
            .await
            .unwrap();
        for (kind, external_id, parent) in entries {
            let document_id = format!("{kind}-{external_id}");
            store
                .upsert_document(&DocumentRecord {
                    document_id: document_id.clone(),
                    source: "github".to_string(),
                    url: None,
                    title: None,
                    body: "body".to_string(),
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
            store
                .record_synced_item(
                    connector_id,
                    &SyncedItem {
                        kind: kind.to_string(),
                        external_id: external_id.to_string(),
                        parent_external_id: parent.map(str::to_string),
                        document_id,
                    },
                )
                .await
                .unwrap();
        }
        let orch = SyncOrchestrator::new(
            Arc::new(source),
            store,
            StepTimeouts::default(),
            SyncConcurrency::default(),
        );
        let target = SyncTarget {
            connector_id,
            installation_id: "inst-1".to_string(),
            data_source: "ds-main".to_string(),
            code_only: false,
        };
        (orch, dir, target)
    }

    #[tokio::test]
    async fn test_dead_repository_removes_subtree_without_item_checks() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            // Item checks would report these alive, but the repository check
            // must short-circuit them.
            dead_items: HashSet::new(),
            flaky_items: HashSet::new(),
        };
        let entries = [
            ("issue", "acme/gone#1", Some("acme/gone")),
            ("issue", "acme/gone#2", Some("acme/gone")),
            ("code", "acme/gone", Some("acme/gone")),
            ("issue", "acme/live#1", Some("acme/live")),
        ];
        let (orch, _dir, target) = seeded(source, &entries).await;

        let report = orch.collect_garbage(&target).await.unwrap();
        assert_eq!(report, GcReport { removed: 3, failed: 0 });

        let remaining = orch.store().list_synced_items(target.connector_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].external_id, "acme/live#1");
        assert_eq!(orch.store().document_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_single_deleted_item_is_removed_from_live_repo() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            dead_items: HashSet::from(["acme/live#2".to_string()]),
            flaky_items: HashSet::new(),
        };
        let entries = [
            ("issue", "acme/live#1", Some("acme/live")),
            ("issue", "acme/live#2", Some("acme/live")),
            ("code", "acme/live", Some("acme/live")),
        ];
        let (orch, _dir, target) = seeded(source, &entries).await;

        let report = orch.collect_garbage(&target).await.unwrap();
        assert_eq!(report, GcReport { removed: 1, failed: 0 });

        assert!(orch
            .store()
            .get_synced_item(target.connector_id, "issue", "acme/live#2")
            .await
            .unwrap()
            .is_none());
        assert!(orch
            .store()
            .get_synced_item(target.connector_id, "issue", "acme/live#1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_collect_resource_cascades_over_dead_repository() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            dead_items: HashSet::new(),
            flaky_items: HashSet::new(),
        };
        let entries = [
            ("issue", "acme/gone#1", Some("acme/gone")),
            ("code", "acme/gone", Some("acme/gone")),
            ("issue", "acme/live#1", Some("acme/live")),
        ];
        let (orch, _dir, target) = seeded(source, &entries).await;

        let report = orch
            .collect_resource(&target, "repository", "acme/gone")
            .await
            .unwrap();
        assert_eq!(report, GcReport { removed: 2, failed: 0 });

        // The sibling repository's items are untouched.
        assert!(orch
            .store()
            .get_synced_item(target.connector_id, "issue", "acme/live#1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_collect_resource_for_single_item() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            dead_items: HashSet::from(["acme/live#2".to_string()]),
            flaky_items: HashSet::new(),
        };
        let entries = [
            ("issue", "acme/live#1", Some("acme/live")),
            ("issue", "acme/live#2", Some("acme/live")),
        ];
        let (orch, _dir, target) = seeded(source, &entries).await;

        let report = orch
            .collect_resource(&target, "issue", "acme/live#2")
            .await
            .unwrap();
        assert_eq!(report, GcReport { removed: 1, failed: 0 });

        // An unknown external id is a no-op, not an error.
        let report = orch
            .collect_resource(&target, "issue", "acme/live#99")
            .await
            .unwrap();
        assert_eq!(report, GcReport::default());
    }

    #[tokio::test]
    async fn test_deletion_failure_does_not_abort_the_pass() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            dead_items: HashSet::new(),
            flaky_items: HashSet::new(),
        };
        let entries = [
            ("issue", "acme/gone#1", Some("acme/gone")),
            ("issue", "acme/gone#2", Some("acme/gone")),
            ("issue", "acme/live#1", Some("acme/live")),
        ];
        let (orch, _dir, target) = seeded(source, &entries).await;

        // Break document deletion out from under the pass.
        sqlx::query("DROP TABLE documents")
            .execute(orch.store().pool())
            .await
            .unwrap();

        // The pass still settles: both failed removals are counted, the live
        // repository's item is still reconciled.
        let report = orch.collect_garbage(&target).await.unwrap();
        assert_eq!(report, GcReport { removed: 0, failed: 2 });
        assert_eq!(
            orch.store().list_synced_items(target.connector_id).await.unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn test_failed_check_leaves_item_for_next_pass() {
        let source = GcSource {
            live_repos: HashSet::from(["acme/live".to_string()]),
            dead_items: HashSet::new(),
            flaky_items: HashSet::from(["acme/live#1".to_string()]),
        };
        let entries = [("issue", "acme/live#1", Some("acme/live"))];
        let (orch, _dir, target) = seeded(source, &entries).await;

        let report = orch.collect_garbage(&target).await.unwrap();
        assert_eq!(report, GcReport { removed: 0, failed: 1 });
        assert_eq!(
            orch.store().list_synced_items(target.connector_id).await.unwrap().len(),
            1
        );
    }
}
