//! Drain signal: lets producers wait until the delivery queue is idle.

use tokio::sync::watch;

/// Shared "queue empty" condition.
///
/// Cleared whenever an item is enqueued and set by the dispatcher once the
/// queue holds no pending or in-flight items.
#[derive(Debug)]
pub struct DrainSignal {
    tx: watch::Sender<bool>,
}

impl DrainSignal {
    /// A new signal starts drained.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx }
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn signal(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_drained(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until drained. Returns immediately if already drained.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot observe a close.
        let _ = rx.wait_for(|drained| *drained).await;
    }
}

impl Default for DrainSignal {
    fn default() -> Self {
        Self::new()
    }
}
