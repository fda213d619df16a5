//! The delivery context shared by the dispatcher, sessions and producers.
//!
//! A `Relay` is constructed once at server startup and passed around as
//! `Arc<Relay>`. It owns the channel registry, the speaking flags, the
//! delivery queue and the lifecycle of the dispatcher task, which runs only
//! while at least one subscriber is connected.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::channel::{Channel, ChannelRegistry, Connection, ConnectionId};
use crate::config::DispatchConfig;
use crate::dispatcher::DispatcherHandle;
use crate::error::PanelError;
use crate::queue::{DeliveryQueue, SequenceKey};
use crate::speaking::SpeakingState;

#[derive(Debug)]
pub struct Relay {
    registry: ChannelRegistry,
    speaking: SpeakingState,
    queue: DeliveryQueue,
    settings: DispatchConfig,
    /// Guards registry membership changes together with dispatcher start/stop.
    dispatcher: Mutex<Option<DispatcherHandle>>,
    #[cfg(test)]
    dispatch_fault: Mutex<Option<String>>,
}

impl Relay {
    pub fn new(settings: DispatchConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: ChannelRegistry::new(),
            speaking: SpeakingState::new(),
            queue: DeliveryQueue::new(),
            settings,
            dispatcher: Mutex::new(None),
            #[cfg(test)]
            dispatch_fault: Mutex::new(None),
        })
    }

    /// Make the next delivery attempt fail after its speaking flag is set.
    #[cfg(test)]
    pub(crate) fn inject_dispatch_fault(&self, reason: &str) {
        *self.dispatch_fault.lock() = Some(reason.to_string());
    }

    #[cfg(test)]
    pub(crate) fn take_dispatch_fault(&self) -> Option<String> {
        self.dispatch_fault.lock().take()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn speaking(&self) -> &SpeakingState {
        &self.speaking
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn settings(&self) -> &DispatchConfig {
        &self.settings
    }

    /// Add a subscriber connection, starting the dispatcher if it is idle.
    pub fn register(self: &Arc<Self>, channel: Channel, connection: Arc<Connection>) {
        let mut dispatcher = self.dispatcher.lock();
        let connection_id = connection.id().clone();
        self.registry.register(channel, connection);
        info!(%channel, %connection_id, "connection registered");

        let running = dispatcher.as_ref().is_some_and(DispatcherHandle::is_running);
        if !running && !self.queue.is_closed() {
            *dispatcher = Some(DispatcherHandle::spawn(Arc::clone(self)));
        }
    }

    /// Register by channel name, rejecting names outside the fixed set.
    pub fn register_named(
        self: &Arc<Self>,
        channel: &str,
        connection: Arc<Connection>,
    ) -> Result<Channel, PanelError> {
        let channel: Channel = channel.parse()?;
        self.register(channel, connection);
        Ok(channel)
    }

    /// Remove a subscriber connection, stopping the dispatcher once every
    /// channel is empty.
    pub fn unregister(&self, channel: Channel, connection_id: &ConnectionId) {
        let mut dispatcher = self.dispatcher.lock();
        let all_empty = self.registry.unregister(channel, connection_id);
        info!(%channel, %connection_id, "connection unregistered");

        if all_empty {
            if let Some(handle) = dispatcher.take() {
                handle.stop();
            }
        }
    }

    pub fn dispatcher_running(&self) -> bool {
        self.dispatcher
            .lock()
            .as_ref()
            .is_some_and(DispatcherHandle::is_running)
    }

    /// Queue a message for delivery on `channel`.
    pub fn enqueue(&self, message: &str, channel: Channel) -> Result<SequenceKey, PanelError> {
        self.queue.enqueue(message, channel)
    }

    /// Overwrite a channel's speaking flag.
    pub fn set_speaking(&self, channel: Channel, speaking: bool) {
        self.speaking.set_speaking(channel, speaking);
    }

    /// Suspend until the queue holds no pending or in-flight items.
    ///
    /// No timeout is applied; wrap in `tokio::time::timeout` for a bound.
    pub async fn wait_until_drained(&self) {
        self.queue.wait_until_drained().await;
    }

    /// Close the queue to producers, stop the dispatcher and end every
    /// subscriber session.
    pub async fn shutdown(&self) {
        self.queue.close();
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle {
            handle.join().await;
        }
        for channel in Channel::ALL {
            for connection in self.registry.connections(channel) {
                connection.close();
            }
        }
        info!("relay shut down");
    }
}
