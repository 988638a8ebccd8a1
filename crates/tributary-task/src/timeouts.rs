//! Per-step execution limits.
//!
//! The concrete numbers are tuning parameters; the ordering
//! metadata < listing < garbage collection < bulk content is an invariant
//! reflecting the expected cost per step kind.

use std::future::Future;
use std::time::Duration;

use crate::TaskError;

/// Execution limits per step kind.
#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    /// Small state writes (sync started/succeeded markers).
    pub metadata: Duration,
    /// Paginated listing calls and per-item upserts.
    pub listing: Duration,
    /// A full garbage-collection pass for one resource.
    pub garbage_collect: Duration,
    /// Bulk content sync (code, whole-site crawl).
    pub bulk_content: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            metadata: Duration::from_secs(60),
            listing: Duration::from_secs(5 * 60),
            garbage_collect: Duration::from_secs(20 * 60),
            bulk_content: Duration::from_secs(120 * 60),
        }
    }
}

impl StepTimeouts {
    /// Whether the cost ordering invariant holds.
    pub fn is_ordered(&self) -> bool {
        self.metadata < self.listing
            && self.listing < self.garbage_collect
            && self.garbage_collect < self.bulk_content
    }
}

/// Run a step under an execution limit.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T, TaskError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TaskError::TimedOut(limit))
}
