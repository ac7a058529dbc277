//! Event coalescing for rebuilds.
//!
//! Bursty informer events are collapsed into batched builds: a notification
//! arms a holdoff timer, later notifications re-arm it, and the total wait
//! since the first unprocessed notification is capped. The callback runs on
//! a single worker, so a build never overlaps the previous one; events that
//! arrive mid-build queue up and trigger the next cycle.

use std::future::Future;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::config::HoldoffConfig;

/// Handle used to signal that the inputs of the guarded work have changed.
#[derive(Debug, Clone)]
pub struct HoldoffNotifier {
    tx: mpsc::UnboundedSender<()>,
}

impl HoldoffNotifier {
    /// Spawn the worker that runs `callback` after each quiescence window.
    pub fn spawn<F, Fut>(config: HoldoffConfig, mut callback: F) -> (Self, JoinHandle<()>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = tokio::spawn(async move {
            // Wait for the first notification of each cycle; channel closure
            // ends the worker.
            while rx.recv().await.is_some() {
                let first_dirty = Instant::now();
                let max_deadline = first_dirty + config.max_delay;

                loop {
                    let deadline = (Instant::now() + config.delay).min(max_deadline);
                    match tokio::time::timeout_at(deadline, rx.recv()).await {
                        // Another notification: re-arm, unless the cap expired.
                        Ok(Some(())) => {
                            if Instant::now() >= max_deadline {
                                trace!("holdoff cap reached, firing");
                                break;
                            }
                        }
                        // Channel closed mid-window: fire once more, then exit.
                        Ok(None) => {
                            callback().await;
                            return;
                        }
                        // Quiet period elapsed.
                        Err(_) => break,
                    }
                }

                callback().await;
            }
        });

        (Self { tx }, handle)
    }

    /// Record that the guarded inputs changed.
    pub fn notify(&self) {
        // A send error means the worker exited; nothing left to coalesce.
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn test_config(delay_ms: u64, max_ms: u64) -> HoldoffConfig {
        HoldoffConfig {
            delay: Duration::from_millis(delay_ms),
            max_delay: Duration::from_millis(max_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_into_one_build() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let (notifier, _worker) = HoldoffNotifier::spawn(test_config(100, 500), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..10 {
            notifier.notify();
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_hold_bounds_latency() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let (notifier, _worker) = HoldoffNotifier::spawn(test_config(100, 500), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Keep the timer re-arming forever; the cap must still fire a build.
        for _ in 0..20 {
            notifier.notify();
            tokio::time::advance(Duration::from_millis(90)).await;
        }
        tokio::task::yield_now().await;

        assert!(builds.load(Ordering::SeqCst) >= 1, "max holdoff must force a build");
    }

    #[tokio::test(start_paused = true)]
    async fn test_notify_after_build_triggers_next_cycle() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let (notifier, _worker) = HoldoffNotifier::spawn(test_config(10, 50), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        notifier.notify();
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        notifier.notify();
        tokio::time::advance(Duration::from_millis(20)).await;
        tokio::task::yield_now().await;
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_notifier_never_fires() {
        let builds = Arc::new(AtomicU32::new(0));
        let counter = builds.clone();
        let (_notifier, _worker) = HoldoffNotifier::spawn(test_config(10, 50), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(builds.load(Ordering::SeqCst), 0);
    }
}
