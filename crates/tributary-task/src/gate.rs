//! Bounded admission-controlled work queue.
//!
//! A `ConcurrencyGate` caps how many submitted tasks execute simultaneously,
//! independent of how many are logically pending. Excess submissions queue in
//! submission order and are admitted as capacity frees up. Every fan-out level
//! owns its own gate so limits compose multiplicatively across tree depth.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::TaskError;

/// Bounded-concurrency admission gate.
///
/// Observed call sites size this at 3-4 concurrent tasks; the bound exists to
/// keep fan-out blast radius inside upstream rate limits.
#[derive(Clone)]
pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    limit: usize,
}

/// Handle to a task admitted through a gate.
pub struct GateHandle<T> {
    handle: JoinHandle<T>,
}

impl ConcurrencyGate {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Submit a task. It starts executing as soon as a permit is available;
    /// until then it waits in FIFO order behind earlier submissions.
    pub fn admit<F, T>(&self, task: F) -> GateHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            // The gate owns the semaphore and never closes it.
            let _permit = permits
                .acquire_owned()
                .await
                .expect("gate semaphore closed");
            task.await
        });
        GateHandle { handle }
    }
}

impl<T> GateHandle<T> {
    /// Wait for this task to settle.
    pub async fn join(self) -> Result<T, TaskError> {
        self.handle
            .await
            .map_err(|e| TaskError::Unsettled(e.to_string()))
    }
}

/// Wait for every submitted task to settle, success or failure.
///
/// A partial failure among siblings does not cancel the rest; the caller gets
/// one result per handle, in submission order.
pub async fn await_all<T>(handles: Vec<GateHandle<T>>) -> Vec<Result<T, TaskError>> {
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.join().await);
    }
    results
}
