//! Change-notification delivery to running loops.
//!
//! Webhook-style events reach long-running tasks (debounce loops) as signals
//! addressed by task key. Delivery is at-most-once per call: if no loop is
//! subscribed under the key, the signal is dropped and the caller is told so.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

/// Opaque notification payload, JSON by convention.
pub type SignalPayload = serde_json::Value;

/// Routes signals to per-key subscriber channels.
#[derive(Clone, Default)]
pub struct SignalHub {
    senders: Arc<Mutex<HashMap<String, mpsc::UnboundedSender<SignalPayload>>>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to signals for `key`, replacing any previous subscriber.
    pub fn subscribe(&self, key: &str) -> mpsc::UnboundedReceiver<SignalPayload> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("signal hub lock poisoned")
            .insert(key.to_string(), tx);
        rx
    }

    /// Deliver a signal to the subscriber under `key`. Returns `false` when
    /// no live subscriber exists (the entry is pruned).
    pub fn signal(&self, key: &str, payload: SignalPayload) -> bool {
        let mut senders = self.senders.lock().expect("signal hub lock poisoned");
        match senders.get(key) {
            Some(tx) => {
                if tx.send(payload).is_ok() {
                    true
                } else {
                    senders.remove(key);
                    debug!(key, "subscriber gone, signal dropped");
                    false
                }
            }
            None => false,
        }
    }

    /// Drop the subscription for `key`, closing the receiver's channel.
    /// The owning loop observes the close and winds down between cycles.
    pub fn remove(&self, key: &str) {
        self.senders
            .lock()
            .expect("signal hub lock poisoned")
            .remove(key);
    }

    /// Remove every subscription whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut senders = self.senders.lock().expect("signal hub lock poisoned");
        let before = senders.len();
        senders.retain(|k, _| !k.starts_with(prefix));
        before - senders.len()
    }
}
