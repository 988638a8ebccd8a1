//! Connector lifecycle management.
//!
//! One manager owns the task supervisor and signal hub for every connector.
//! Syncs run under a key carrying the connector id and the mode, so a
//! duplicate request against a live sync of the same mode is a no-op. Change
//! notifications run signal-with-start: the per-item debounce loop is spawned
//! on first notification and fed through the hub afterwards. Stopping a
//! connector closes its subscriptions first, letting an armed debounce pass
//! finish, then drains the task subtree with a grace period before aborting
//! stragglers.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use tributary_task::{SignalHub, SignalPayload, TaskSupervisor};

use crate::debounce::debounce_loop;
use crate::fanout::SyncOrchestrator;
use crate::gc::GcReport;
use crate::source::{ItemRef, SyncTarget};

#[derive(Clone)]
pub struct ConnectorManager {
    orchestrator: SyncOrchestrator,
    supervisor: TaskSupervisor,
    signals: SignalHub,
    quiet_window: Duration,
    stop_grace: Duration,
}

impl ConnectorManager {
    pub fn new(orchestrator: SyncOrchestrator, quiet_window: Duration) -> Self {
        Self {
            orchestrator,
            supervisor: TaskSupervisor::new(),
            signals: SignalHub::new(),
            quiet_window,
            stop_grace: Duration::from_secs(5),
        }
    }

    /// How long `stop` waits for tasks to wind down before aborting them.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.supervisor
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Start a sync for `target` in its configured mode (full or code-only).
    /// Returns `false` when one is already running under the same key.
    pub fn start_full_sync(&self, target: &SyncTarget) -> bool {
        let key = target.sync_task_key();
        let orchestrator = self.orchestrator.clone();
        let target = target.clone();
        self.supervisor.spawn_keyed(&key, async move {
            match orchestrator.run_full_sync(&target).await {
                Ok(report) => info!(
                    connector_id = target.connector_id,
                    repos = report.repos_synced,
                    failed = report.repos_failed,
                    items = report.items_synced,
                    "full sync finished"
                ),
                Err(e) => warn!(
                    connector_id = target.connector_id,
                    error = %e,
                    "full sync failed"
                ),
            }
        })
    }

    /// Deliver a change notification for one item, starting its debounce
    /// loop if none is running. Returns whether the signal was delivered.
    pub fn notify_item_changed(
        &self,
        target: &SyncTarget,
        item: &ItemRef,
        payload: SignalPayload,
    ) -> bool {
        let key = target.item_task_key(item.kind, &item.external_id());
        if !self.supervisor.is_running(&key) {
            let rx = self.signals.subscribe(&key);
            let orchestrator = self.orchestrator.clone();
            let target = target.clone();
            let item = item.clone();
            let window = self.quiet_window;
            self.supervisor.spawn_keyed(&key, async move {
                let stats = debounce_loop(rx, window, |coalesced| {
                    let orchestrator = orchestrator.clone();
                    let target = target.clone();
                    let item = item.clone();
                    async move {
                        orchestrator
                            .run_incremental_pass(&target, &item, coalesced)
                            .await
                    }
                })
                .await;
                debug!(?stats, "debounce loop wound down");
            });
        }
        self.signals.signal(&key, payload)
    }

    /// Tear down every task and subscription for `target`. Subscriptions are
    /// closed first, so a debounce loop with an armed pass runs that pass
    /// before winding down; tasks still running after the grace period are
    /// aborted.
    pub async fn stop(&self, target: &SyncTarget) -> usize {
        let key = target.task_key();
        // "connector-7" must not match "connector-70"; children all live
        // under "connector-7/".
        self.signals.remove_prefix(&format!("{key}/"));
        self.supervisor
            .drain_prefix(&format!("{key}/"), self.stop_grace)
            .await
    }

    /// Garbage-collect the connector's mirror. Refused while a sync for the
    /// same connector is in flight; the caller retries later.
    pub async fn garbage_collect(&self, target: &SyncTarget) -> Result<GcReport> {
        let sync_prefix = format!("{}/sync/", target.task_key());
        if self.supervisor.is_running_prefix(&sync_prefix) {
            bail!(
                "connector {} has a sync in flight, try again later",
                target.connector_id
            );
        }
        self.orchestrator.collect_garbage(target).await
    }

    /// Remove a connector entirely: stop its tasks, then delete its mirrored
    /// data in one transaction.
    pub async fn remove_connector(&self, target: &SyncTarget) -> Result<()> {
        self.stop(target).await;
        self.orchestrator
            .store()
            .delete_connector_data(target.connector_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tributary_store::{DocumentRecord, MirrorStore};
    use tributary_task::StepTimeouts;

    use crate::error::SourceError;
    use crate::fanout::SyncConcurrency;
    use crate::pagination::{Cursor, Page};
    use crate::source::{RepoRef, SourceClient, SyncUnitKind};

    struct CountingSource {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl SourceClient for CountingSource {
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

        async fn fetch_item(&self, item: &ItemRef) -> Result<DocumentRecord, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(DocumentRecord {
                document_id: format!("doc-{}", item.external_id()),
                source: "github".to_string(),
                url: None,
                title: None,
                body: "body".to_string(),
                updated_at: chrono::Utc::now(),
            })
        }

        async fn fetch_code_overview(
            &self,
            _repo: &RepoRef,
        ) -> Result<Option<DocumentRecord>, SourceError> {
            Ok(None)
        }

        async fn repository_exists(&self, _full_name: &str) -> Result<bool, SourceError> {
            Ok(true)
        }

        async fn item_exists(&self, _item: &ItemRef) -> Result<bool, SourceError> {
            Ok(true)
        }
    }

    async fn manager(quiet_window: Duration) -> (ConnectorManager, Arc<CountingSource>, tempfile::TempDir, SyncTarget) {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(&dir.path().join("mirror.db")).await.unwrap();
        let connector_id = store
            .create_connector("github", "inst-1", "ds-main")
            .await
            .unwrap();
        let source = Arc::new(CountingSource {
            fetches: AtomicUsize::new(0),
        });
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&source) as Arc<dyn SourceClient>,
            store,
            StepTimeouts::default(),
            SyncConcurrency::default(),
        );
        let manager = ConnectorManager::new(orchestrator, quiet_window)
            .with_stop_grace(Duration::from_millis(500));
        let target = SyncTarget {
            connector_id,
            installation_id: "inst-1".to_string(),
            data_source: "ds-main".to_string(),
            code_only: false,
        };
        (manager, source, dir, target)
    }

    #[tokio::test]
    async fn test_notification_starts_loop_and_runs_one_pass() {
        let (manager, source, _dir, target) = manager(Duration::from_millis(20)).await;
        let item = ItemRef::new(RepoRef::new("acme", "widgets"), SyncUnitKind::Issue, 7);

        // A burst of three notifications coalesces into one pass.
        assert!(manager.notify_item_changed(&target, &item, json!({"n": 1})));
        assert!(manager.notify_item_changed(&target, &item, json!({"n": 2})));
        assert!(manager.notify_item_changed(&target, &item, json!({"n": 3})));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        // The loop stays alive for the next burst.
        let key = target.item_task_key(item.kind, &item.external_id());
        assert!(manager.supervisor().is_running(&key));
    }

    #[tokio::test]
    async fn test_stop_tears_down_loops_and_rejects_signals() {
        let (manager, _source, _dir, target) = manager(Duration::from_secs(60)).await;
        let item = ItemRef::new(RepoRef::new("acme", "widgets"), SyncUnitKind::Issue, 7);

        manager.notify_item_changed(&target, &item, json!({}));
        let key = target.item_task_key(item.kind, &item.external_id());
        assert!(manager.supervisor().is_running(&key));

        assert!(manager.stop(&target).await >= 1);
        assert!(!manager.supervisor().is_running(&key));
        assert!(!manager.signals.signal(&key, json!({})));
    }

    #[tokio::test]
    async fn test_stop_lets_an_armed_pass_finish() {
        let (manager, source, _dir, target) = manager(Duration::from_secs(60)).await;
        let item = ItemRef::new(RepoRef::new("acme", "widgets"), SyncUnitKind::Issue, 3);

        // Arm a pass; the quiet window will not elapse on its own.
        assert!(manager.notify_item_changed(&target, &item, json!({})));

        // Teardown closes the channel; the armed pass runs to completion
        // before the loop winds down, instead of being killed mid-flight.
        manager.stop(&target).await;
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        let key = target.item_task_key(item.kind, &item.external_id());
        assert!(!manager.supervisor().is_running(&key));
        let doc_id = format!("doc-{}", item.external_id());
        assert!(manager
            .orchestrator()
            .store()
            .get_document(&doc_id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stop_does_not_touch_other_connectors_with_prefix_overlap() {
        let (manager, _source, _dir, target7) = manager(Duration::from_secs(60)).await;
        let target70 = SyncTarget {
            connector_id: 70,
            installation_id: "inst-2".to_string(),
            data_source: "ds-main".to_string(),
            code_only: false,
        };
        let item = ItemRef::new(RepoRef::new("acme", "widgets"), SyncUnitKind::Issue, 1);

        manager.notify_item_changed(&target7, &item, json!({}));
        manager.notify_item_changed(&target70, &item, json!({}));

        manager.stop(&target7).await;

        let key70 = target70.item_task_key(item.kind, &item.external_id());
        assert!(manager.supervisor().is_running(&key70));
        manager.stop(&target70).await;
    }

    #[tokio::test]
    async fn test_gc_is_refused_while_sync_runs() {
        let (manager, _source, _dir, target) = manager(Duration::from_secs(60)).await;

        // Occupy the connector's sync key with a long-running task.
        manager
            .supervisor()
            .spawn_keyed(&target.sync_task_key(), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });

        let err = manager.garbage_collect(&target).await.unwrap_err();
        assert!(err.to_string().contains("sync in flight"));

        manager.stop(&target).await;
        assert!(manager.garbage_collect(&target).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_full_sync_is_noop() {
        let (manager, _source, _dir, target) = manager(Duration::from_secs(60)).await;

        // Hold the key so the second submission observes a live task.
        manager
            .supervisor()
            .spawn_keyed(&target.sync_task_key(), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
        assert!(!manager.start_full_sync(&target));
        manager.stop(&target).await;
    }

    #[tokio::test]
    async fn test_remove_connector_deletes_mirrored_data() {
        let (manager, _source, _dir, target) = manager(Duration::from_secs(60)).await;
        let store = manager.orchestrator().store().clone();

        store
            .upsert_document(&DocumentRecord {
                document_id: "d1".to_string(),
                source: "github".to_string(),
                url: None,
                title: None,
                body: "body".to_string(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
        store
            .record_synced_item(
                target.connector_id,
                &tributary_store::SyncedItem {
                    kind: "issue".to_string(),
                    external_id: "acme/widgets#1".to_string(),
                    parent_external_id: Some("acme/widgets".to_string()),
                    document_id: "d1".to_string(),
                },
            )
            .await
            .unwrap();

        manager.remove_connector(&target).await.unwrap();
        assert!(store.get_connector(target.connector_id).await.unwrap().is_none());
        assert!(store.get_document("d1").await.unwrap().is_none());
    }
}
