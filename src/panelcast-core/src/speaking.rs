//! Per-channel "is currently speaking" flags.
//!
//! Flags are set by the dispatcher when it starts delivering on a channel and
//! cleared only by subscribers reporting that playback stopped. While any
//! flag is set the whole system holds the floor: no channel dispatches.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;
use tracing::debug;

use crate::channel::Channel;

#[derive(Debug, Default)]
pub struct SpeakingState {
    flags: Mutex<BTreeMap<Channel, bool>>,
    cleared: Notify,
}

impl SpeakingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the flag for a channel.
    pub fn set_speaking(&self, channel: Channel, speaking: bool) {
        let previous = self.flags.lock().insert(channel, speaking).unwrap_or(false);
        if previous != speaking {
            debug!(%channel, speaking, "speaking state changed");
        }
        if !speaking {
            self.cleared.notify_waiters();
        }
    }

    pub fn is_speaking(&self, channel: Channel) -> bool {
        self.flags.lock().get(&channel).copied().unwrap_or(false)
    }

    /// True if any channel currently holds the floor.
    pub fn any_speaking(&self) -> bool {
        self.flags.lock().values().any(|s| *s)
    }

    /// Resolves the next time any flag is written false.
    ///
    /// The future observes clears from the moment it is created, so create it
    /// before checking `any_speaking` to avoid missing a wakeup.
    pub fn cleared(&self) -> Notified<'_> {
        self.cleared.notified()
    }

    /// Current value of every flag, false where never set.
    pub fn snapshot(&self) -> BTreeMap<Channel, bool> {
        let flags = self.flags.lock();
        Channel::ALL
            .iter()
            .map(|c| (*c, flags.get(c).copied().unwrap_or(false)))
            .collect()
    }
}
