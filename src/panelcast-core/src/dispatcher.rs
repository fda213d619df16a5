//! The single background task that drains the delivery queue.
//!
//! One iteration pops the earliest item and either defers it (the floor is
//! held by some channel), drops it (no live subscriber on its channel) or
//! fans it out to every connection on its channel. The speaking flag it sets
//! on delivery is never cleared here; subscribers clear it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PanelError;
use crate::payload::OutboundPayload;
use crate::queue::QueueItem;
use crate::relay::Relay;

/// Result of one dispatch iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent to `recipients` connections; `pruned` connections failed.
    Delivered { recipients: usize, pruned: usize },
    /// The channel had no live connections; the item was discarded.
    Dropped,
    /// Some channel held the floor; the item went back to the queue.
    Deferred,
}

/// Handle to a running dispatcher task.
#[derive(Debug)]
pub(crate) struct DispatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub(crate) fn spawn(relay: Arc<Relay>) -> Self {
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher {
            relay,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(dispatcher.run());
        Self { cancel, task }
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Request cancellation without waiting for the task to exit.
    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    pub(crate) async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "dispatcher task panicked");
            }
        }
    }
}

struct Dispatcher {
    relay: Arc<Relay>,
    cancel: CancellationToken,
}

impl Dispatcher {
    async fn run(self) {
        info!("dispatcher started");

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = self.relay.queue().next() => item,
            };
            // Stopped between the wakeup and the pop: the item was never started.
            if self.cancel.is_cancelled() {
                self.relay.queue().requeue(item);
                break;
            }
            let key = item.key;
            let channel = item.channel;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    if self.relay.queue().abandon(key) {
                        warn!(%channel, "dispatcher stopped mid-delivery, item abandoned");
                    }
                    break;
                }
                result = self.dispatch_once(item) => result,
            };

            match result {
                Ok(outcome) => debug!(%channel, ?outcome, "dispatch iteration finished"),
                Err(e) => {
                    error!(%channel, error = %e, "dispatch iteration failed");
                    self.relay.speaking().set_speaking(channel, false);
                    self.relay.queue().complete(key);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.relay.settings().error_backoff()) => {}
                    }
                }
            }
        }

        info!(pending = self.relay.queue().len(), "dispatcher stopped");
    }

    async fn dispatch_once(&self, item: QueueItem) -> Result<DispatchOutcome, PanelError> {
        let speaking = self.relay.speaking();
        // Register for clears before checking so none is missed.
        let cleared = speaking.cleared();
        if speaking.any_speaking() {
            debug!(channel = %item.channel, "floor held, deferring");
            self.relay.queue().requeue(item);
            tokio::select! {
                _ = cleared => {}
                _ = tokio::time::sleep(self.relay.settings().busy_backoff()) => {}
            }
            return Ok(DispatchOutcome::Deferred);
        }

        self.deliver(item).await
    }

    async fn deliver(&self, item: QueueItem) -> Result<DispatchOutcome, PanelError> {
        let QueueItem {
            key,
            message,
            channel,
        } = item;
        let queue = self.relay.queue();

        let connections = self.relay.registry().connections(channel);
        if connections.is_empty() {
            warn!(%channel, "no live subscribers, dropping message");
            queue.complete(key);
            return Ok(DispatchOutcome::Dropped);
        }

        let payload: Arc<str> = serde_json::to_string(&OutboundPayload {
            text: message,
            session: channel,
        })?
        .into();

        self.relay.speaking().set_speaking(channel, true);

        #[cfg(test)]
        if let Some(reason) = self.relay.take_dispatch_fault() {
            return Err(PanelError::Dispatch(reason));
        }

        let timeout = self.relay.settings().send_timeout();
        let mut recipients = 0;
        let mut pruned = 0;
        for connection in connections {
            match connection.send(Arc::clone(&payload), timeout).await {
                Ok(()) => recipients += 1,
                Err(e) => {
                    warn!(
                        %channel,
                        connection_id = %connection.id(),
                        error = %e,
                        "pruning dead connection"
                    );
                    self.relay.registry().unregister(channel, connection.id());
                    connection.close();
                    pruned += 1;
                }
            }
        }

        let drained = queue.complete(key);
        info!(%channel, recipients, pruned, drained, "message dispatched");
        Ok(DispatchOutcome::Delivered { recipients, pruned })
    }
}
