//! The ordered delivery queue.
//!
//! Items are keyed by `(elapsed millis, insertion counter)`, so keys are
//! unique and their order is exactly enqueue order even within the same
//! millisecond. The dispatcher pops the minimum key; an item it cannot
//! deliver yet goes back under its original key and stays logically next.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::channel::Channel;
use crate::drain::DrainSignal;
use crate::error::PanelError;

static HOST_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*Host:\s*").expect("host label pattern is valid"));

/// Total order key of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceKey {
    /// Milliseconds since the queue was created.
    pub millis: u64,
    /// Strictly increasing insertion counter, breaks same-millisecond ties.
    pub seq: u64,
}

/// A message waiting for delivery on one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub key: SequenceKey,
    pub message: String,
    pub channel: Channel,
}

#[derive(Debug, Default)]
struct QueueInner {
    items: BTreeMap<SequenceKey, QueueItem>,
    in_flight: Option<SequenceKey>,
    next_seq: u64,
    closed: bool,
}

#[derive(Debug)]
pub struct DeliveryQueue {
    inner: Mutex<QueueInner>,
    available: Notify,
    drain: DrainSignal,
    epoch: Instant,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            available: Notify::new(),
            drain: DrainSignal::new(),
            epoch: Instant::now(),
        }
    }

    /// Accept a message for delivery on `channel`.
    ///
    /// A leading "Host:" label is stripped. Clears the drain signal before
    /// the item becomes visible to the dispatcher.
    pub fn enqueue(&self, message: &str, channel: Channel) -> Result<SequenceKey, PanelError> {
        let message = strip_host_label(message);
        let key = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PanelError::QueueClosed);
            }
            let key = SequenceKey {
                millis: self.epoch.elapsed().as_millis() as u64,
                seq: inner.next_seq,
            };
            inner.next_seq += 1;
            self.drain.clear();
            inner.items.insert(
                key,
                QueueItem {
                    key,
                    message,
                    channel,
                },
            );
            key
        };
        self.available.notify_one();
        Ok(key)
    }

    /// Pop the earliest item and mark it in flight.
    pub fn pop(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let (key, item) = inner.items.pop_first()?;
        inner.in_flight = Some(key);
        Some(item)
    }

    /// Wait for and pop the earliest item.
    pub async fn next(&self) -> QueueItem {
        loop {
            let available = self.available.notified();
            if let Some(item) = self.pop() {
                return item;
            }
            available.await;
        }
    }

    /// Put an in-flight item back under its original key.
    pub fn requeue(&self, item: QueueItem) {
        let mut inner = self.inner.lock();
        if inner.in_flight == Some(item.key) {
            inner.in_flight = None;
        }
        inner.items.insert(item.key, item);
    }

    /// Finish the in-flight item, delivered or dropped.
    ///
    /// Signals drain when nothing else is pending; returns whether it did.
    pub fn complete(&self, key: SequenceKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight == Some(key) {
            inner.in_flight = None;
        }
        let drained = inner.items.is_empty() && inner.in_flight.is_none();
        if drained {
            self.drain.signal();
        }
        drained
    }

    /// Forget the in-flight item `key` without signalling drain.
    ///
    /// Used when the dispatcher is cancelled mid-delivery. Waiters stay
    /// blocked until a later delivery empties the queue again.
    pub fn abandon(&self, key: SequenceKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight == Some(key) {
            inner.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Reject all further enqueues.
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Pending items, excluding the one in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn has_in_flight(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn is_drained(&self) -> bool {
        self.drain.is_drained()
    }

    /// Suspend until no item is pending or in flight.
    pub async fn wait_until_drained(&self) {
        self.drain.wait().await;
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove a leading "Host:" speaker label.
pub fn strip_host_label(message: &str) -> String {
    HOST_LABEL.replace(message, "").into_owned()
}
