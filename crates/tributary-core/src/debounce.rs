//! Debounced incremental sync loop.
//!
//! Change notifications for one item arrive in bursts (a webhook per edit).
//! The loop waits for a quiet window after the first signal before running a
//! pass; signals landing inside the window restart it and are coalesced into
//! the pass that eventually runs. The subscription channel closing winds the
//! loop down, running one last pass if a signal was already armed.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tracing::{debug, warn};
use tributary_task::SignalPayload;

/// What a debounce loop did before winding down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DebounceStats {
    pub passes: u64,
    pub failed_passes: u64,
    pub coalesced_total: u64,
}

/// Run `run_pass` once per burst of signals on `rx`, after `quiet_window` of
/// silence. The pass receives the number of signals coalesced beyond the one
/// that armed it. Returns when the channel closes.
pub async fn debounce_loop<F, Fut>(
    mut rx: UnboundedReceiver<SignalPayload>,
    quiet_window: Duration,
    mut run_pass: F,
) -> DebounceStats
where
    F: FnMut(u64) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let mut stats = DebounceStats::default();

    loop {
        // Idle: wait for the signal that arms a pass.
        if rx.recv().await.is_none() {
            return stats;
        }

        let mut coalesced = 0u64;
        let closed = loop {
            match timeout(quiet_window, rx.recv()).await {
                // Another signal inside the window restarts it.
                Ok(Some(_)) => {
                    coalesced += 1;
                    debug!(coalesced, "signal coalesced, window restarted");
                }
                // Channel closed with a pass armed: run it, then wind down.
                Ok(None) => break true,
                // Quiet window elapsed.
                Err(_) => break false,
            }
        };

        stats.passes += 1;
        stats.coalesced_total += coalesced;
        if let Err(e) = run_pass(coalesced).await {
            stats.failed_passes += 1;
            warn!(error = %e, coalesced, "debounced pass failed");
        }

        if closed {
            return stats;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::time::{advance, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_pass() {
        let (tx, rx) = mpsc::unbounded_channel();
        let passes: Arc<tokio::sync::Mutex<Vec<(u64, Duration)>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let start = Instant::now();

        let loop_passes = Arc::clone(&passes);
        let handle = tokio::spawn(debounce_loop(
            rx,
            Duration::from_secs(10),
            move |coalesced| {
                let passes = Arc::clone(&loop_passes);
                async move {
                    passes.lock().await.push((coalesced, start.elapsed()));
                    Ok(())
                }
            },
        ));

        // Signals at t=0, t=2s, t=4s.
        tx.send(json!({"n": 1})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(2)).await;
        tx.send(json!({"n": 2})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(2)).await;
        tx.send(json!({"n": 3})).unwrap();
        tokio::task::yield_now().await;

        // Quiet window runs out 10s after the last signal.
        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.coalesced_total, 2);

        let recorded = passes.lock().await;
        assert_eq!(recorded.len(), 1);
        let (coalesced, at) = recorded[0];
        assert_eq!(coalesced, 2);
        assert!(at >= Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_run_separate_passes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicU64::new(0));

        let loop_count = Arc::clone(&count);
        let handle = tokio::spawn(debounce_loop(
            rx,
            Duration::from_secs(10),
            move |_coalesced| {
                let count = Arc::clone(&loop_count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        tx.send(json!({})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        tx.send(json!({})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.passes, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_armed_signal_runs_final_pass() {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicU64::new(0));

        let loop_count = Arc::clone(&count);
        let handle = tokio::spawn(debounce_loop(
            rx,
            Duration::from_secs(10),
            move |_coalesced| {
                let count = Arc::clone(&loop_count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        ));

        tx.send(json!({})).unwrap();
        tokio::task::yield_now().await;
        // Channel closes before the window runs out.
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.passes, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_while_idle_runs_nothing() {
        let (tx, rx) = mpsc::unbounded_channel::<SignalPayload>();
        drop(tx);
        let stats = debounce_loop(rx, Duration::from_secs(10), |_| async { Ok(()) }).await;
        assert_eq!(stats, DebounceStats::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_keeps_loop_alive() {
        let (tx, rx) = mpsc::unbounded_channel();
        let count = Arc::new(AtomicU64::new(0));

        let loop_count = Arc::clone(&count);
        let handle = tokio::spawn(debounce_loop(
            rx,
            Duration::from_secs(10),
            move |_coalesced| {
                let count = Arc::clone(&loop_count);
                async move {
                    let n = count.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        anyhow::bail!("upstream hiccup");
                    }
                    Ok(())
                }
            },
        ));

        tx.send(json!({})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        tx.send(json!({})).unwrap();
        tokio::task::yield_now().await;
        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        drop(tx);
        let stats = handle.await.unwrap();
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.failed_passes, 1);
    }
}
