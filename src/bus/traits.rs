//! Store trait and the in-process broadcast hub shared by the backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::bus::lock;
use crate::domain::{EntryId, LogEntry};
use crate::error::Result;

/// Backing store for the bus.
///
/// Four primitives: FIFO lists with a blocking multi-list pop, key/value
/// state (plain and hashed), capped append-only streams, and topic broadcast.
/// Implementations never retry; failures surface to the caller.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> bool;

    /// Append a value at the tail of a list.
    async fn push(&self, list: &str, value: String) -> Result<()>;

    /// Pop the head of the first non-empty list, checking `lists` in order.
    ///
    /// Waits up to `timeout` for a value; a zero timeout checks once.
    async fn pop_first(&self, lists: &[&str], timeout: Duration) -> Result<Option<(String, String)>>;

    /// Number of values in a list.
    async fn list_len(&self, list: &str) -> Result<usize>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Merge `fields` into the hash at `key`.
    async fn hset(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()>;

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// Append a record to a stream, trimming it to the newest `max_len` entries.
    async fn append(&self, stream: &str, fields: Map<String, Value>, max_len: usize) -> Result<EntryId>;

    /// Up to `count` entries with id strictly greater than `after`, oldest first.
    async fn range(&self, stream: &str, after: Option<EntryId>, count: usize) -> Result<Vec<LogEntry>>;

    /// Broadcast a message; returns how many subscribers received it.
    async fn publish(&self, channel: &str, message: String) -> Result<usize>;

    /// Subscribe to a channel. Only messages published afterwards are seen.
    fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

/// Receiving end of a channel subscription
pub struct Subscription {
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    /// Wait for the next message; `None` once the channel is gone.
    ///
    /// Messages dropped because this subscriber fell behind are skipped.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Subscriber lagged, {} messages dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

/// Topic fan-out within one process
pub(crate) struct Broadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Broadcaster {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub(crate) fn publish(&self, channel: &str, message: String) -> Result<usize> {
        let channels = lock(&self.channels)?;
        match channels.get(channel) {
            // A send error only means nobody is listening.
            Some(tx) => Ok(tx.send(message).unwrap_or(0)),
            None => Ok(0),
        }
    }

    pub(crate) fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut channels = lock(&self.channels)?;
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(Subscription { rx: tx.subscribe() })
    }
}
