use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// One-shot cooperative stop flag shared by every worker of a run.
///
/// Workers observe it at the granularity of one logical operation (one
/// insert, one query, one sample tick), so cancellation latency is bounded
/// by the longest in-flight operation. Setting the flag is idempotent.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Request stop. Safe to call more than once; later calls are no-ops.
    pub fn set(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Block until the signal is set.
    pub async fn wait(&self) {
        while !self.is_set() {
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }

    /// Block until the signal is set or `timeout` elapses.
    ///
    /// Returns `true` if the signal was set before the timeout. This is the
    /// orchestrator's timed run window: it parks here for the configured
    /// runtime unless an abnormal path requests an early stop.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_is_idempotent() {
        let signal = CancelSignal::new();
        signal.set();
        signal.set();
        assert!(signal.is_set());
        // Waiters must observe a single set and a repeated set identically.
        signal.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_elapses_when_unset() {
        let signal = CancelSignal::new();
        assert!(!signal.wait_timeout(Duration::from_secs(5)).await);
        assert!(!signal.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_returns_early_on_set() {
        let signal = Arc::new(CancelSignal::new());
        let setter = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            setter.set();
        });
        assert!(signal.wait_timeout(Duration::from_secs(60)).await);
    }

    #[tokio::test]
    async fn wait_returns_for_late_waiters() {
        let signal = CancelSignal::new();
        signal.set();
        signal.wait().await;
    }
}
