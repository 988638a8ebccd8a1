//! Liveness reporting for long-running steps.
//!
//! A crawl or bulk sync beats periodically so a supervising liveness check
//! can tell slow-but-alive progress from a stall.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Clone)]
pub struct Heartbeat {
    last: Arc<Mutex<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record a beat with a short progress note.
    pub fn beat(&self, info: &str) {
        *self.last.lock().expect("heartbeat lock poisoned") = Instant::now();
        debug!(info, "heartbeat");
    }

    /// Time since the last beat.
    pub fn elapsed(&self) -> Duration {
        self.last.lock().expect("heartbeat lock poisoned").elapsed()
    }

    /// Whether the step has gone quiet for longer than `max_gap`.
    pub fn is_stalled(&self, max_gap: Duration) -> bool {
        self.elapsed() > max_gap
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
