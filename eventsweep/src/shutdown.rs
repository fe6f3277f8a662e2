//! Cooperative cancellation for projection runs.

use std::sync::Arc;

use tokio::sync::watch;

/// Signals a running projection to stop.
///
/// Clones share one flag. Once cancelled the signal stays cancelled.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// A signal that has not fired.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal for every clone.
    pub fn cancel(&self) {
        let _ = self.tx.send_replace(true);
    }

    /// Whether the signal has fired.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Completes once the signal has fired, immediately if it already has.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let cancelled = *rx.borrow_and_update();
            // The sender lives as long as `self`, so `changed` only fails after a drop.
            if cancelled || rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
