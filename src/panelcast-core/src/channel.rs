//! Channels and the registry of live subscriber connections.
//!
//! A channel is one of a small closed set of named audiences. Each channel
//! owns the list of connections currently subscribed to it; a connection
//! lives in exactly one channel's list until it disconnects or is pruned
//! after a failed send.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::PanelError;

/// A named logical audience/speaker group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Left,
    Right,
    Audience,
}

impl Channel {
    /// Every channel, in a stable order.
    pub const ALL: [Channel; 3] = [Channel::Left, Channel::Right, Channel::Audience];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Left => "left",
            Channel::Right => "right",
            Channel::Audience => "audience",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Channel::Left),
            "right" => Ok(Channel::Right),
            "audience" => Ok(Channel::Audience),
            other => Err(PanelError::InvalidChannel(other.to_string())),
        }
    }
}

/// Unique identifier of a subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound half of a subscriber session.
///
/// The session's writer task owns the receiving end and forwards frames to
/// the socket; once that task is gone every send fails. A pruned connection
/// is closed so its session tears the socket down as well.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Ask the owning session to disconnect.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once `close` has been called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Queue a serialized payload for the socket writer.
    pub async fn send(&self, payload: Arc<str>, timeout: Duration) -> Result<(), PanelError> {
        self.tx
            .send_timeout(payload, timeout)
            .await
            .map_err(|e| PanelError::SendFailure {
                connection: self.id.to_string(),
                reason: match e {
                    SendTimeoutError::Timeout(_) => "timed out".to_string(),
                    SendTimeoutError::Closed(_) => "connection closed".to_string(),
                },
            })
    }
}

/// Tracks which live connections belong to which channel.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Mutex<BTreeMap<Channel, Vec<Arc<Connection>>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a channel's live set.
    ///
    /// Returns true when every channel was empty beforehand.
    pub fn register(&self, channel: Channel, connection: Arc<Connection>) -> bool {
        let mut channels = self.channels.lock();
        let was_idle = channels.values().all(Vec::is_empty);
        let list = channels.entry(channel).or_default();
        if !list.iter().any(|c| c.id() == connection.id()) {
            list.push(connection);
        }
        was_idle
    }

    /// Remove a connection from a channel.
    ///
    /// Returns true when every channel is empty afterwards.
    pub fn unregister(&self, channel: Channel, id: &ConnectionId) -> bool {
        let mut channels = self.channels.lock();
        if let Some(list) = channels.get_mut(&channel) {
            list.retain(|c| c.id() != id);
        }
        channels.values().all(Vec::is_empty)
    }

    /// Snapshot of the live connections on a channel.
    pub fn connections(&self, channel: Channel) -> Vec<Arc<Connection>> {
        self.channels
            .lock()
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of live connections per channel, including empty channels.
    pub fn counts(&self) -> BTreeMap<Channel, usize> {
        let channels = self.channels.lock();
        Channel::ALL
            .iter()
            .map(|c| (*c, channels.get(c).map_or(0, Vec::len)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().values().all(Vec::is_empty)
    }
}
