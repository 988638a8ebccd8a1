//! Keyed task supervision.
//!
//! Sync-unit exclusivity is enforced by routing same-identity work through
//! the same task key rather than through explicit locks: submitting a key
//! that is already running is a no-op. Keys are hierarchical strings
//! (`target/kind/external-id`), so terminating a top-level target tears down
//! every in-flight and pending child by prefix.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Registry of long-running tasks keyed by deterministic identity.
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task under `key` unless one with the same key is already
    /// running. Returns `true` if the task was spawned, `false` if the
    /// submission was a no-op against a live task.
    pub fn spawn_keyed<F>(&self, key: &str, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        if let Some(existing) = tasks.get(key) {
            if !existing.is_finished() {
                debug!(key, "task already running, submission is a no-op");
                return false;
            }
        }
        tasks.insert(key.to_string(), tokio::spawn(fut));
        true
    }

    /// Whether any live task is registered under a key starting with
    /// `prefix` (prunes settled entries).
    pub fn is_running_prefix(&self, prefix: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.keys().any(|k| k.starts_with(prefix))
    }

    /// Whether a live task is registered under `key`.
    pub fn is_running(&self, key: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        match tasks.get(key) {
            Some(handle) if !handle.is_finished() => true,
            Some(_) => {
                tasks.remove(key);
                false
            }
            None => false,
        }
    }

    /// Terminate the task registered under `key`, if any.
    pub fn stop(&self, key: &str) -> bool {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        if let Some(handle) = tasks.remove(key) {
            handle.abort();
            info!(key, "terminated task");
            true
        } else {
            false
        }
    }

    /// Hierarchical cancellation: terminate every task whose key starts with
    /// `prefix`. Returns the number of tasks torn down.
    pub fn stop_prefix(&self, prefix: &str) -> usize {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        let keys: Vec<String> = tasks
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(handle) = tasks.remove(key) {
                handle.abort();
            }
        }
        if !keys.is_empty() {
            info!(prefix, count = keys.len(), "terminated task subtree");
        }
        keys.len()
    }

    /// Graceful hierarchical teardown: deregister every task under `prefix`
    /// and wait up to `grace` for each to exit on its own. A task usually
    /// exits because its input channel was closed first; one that does not
    /// wind down in time is aborted.
    pub async fn drain_prefix(&self, prefix: &str, grace: Duration) -> usize {
        let drained: Vec<(String, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
            let keys: Vec<String> = tasks
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| tasks.remove(&k).map(|h| (k, h)))
                .collect()
        };
        let count = drained.len();
        for (key, mut handle) in drained {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                info!(key, "task did not wind down in time, aborting");
                handle.abort();
            }
        }
        if count > 0 {
            info!(prefix, count, "drained task subtree");
        }
        count
    }

    /// Number of live tasks (prunes settled entries).
    pub fn live_count(&self) -> usize {
        let mut tasks = self.tasks.lock().expect("supervisor lock poisoned");
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }
}
