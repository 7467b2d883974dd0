//! In-process store backend.
//!
//! Everything lives behind one mutex; blocked pops wait on a `Notify` that
//! every push wakes. Useful for tests and single-process deployments.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::bus::lock;
use crate::bus::traits::{Broadcaster, Store, Subscription};
use crate::domain::{EntryId, LogEntry};
use crate::error::{Result, TollgateError};
use crate::id::now_ms;

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    values: HashMap<String, String>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    streams: HashMap<String, VecDeque<LogEntry>>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
    hub: Broadcaster,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pushed: Notify::new(),
            hub: Broadcaster::new(256),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TollgateError::Store("store unavailable".to_string()))
        }
    }

    fn try_pop(&self, lists: &[&str]) -> Result<Option<(String, String)>> {
        self.check()?;
        let mut inner = lock(&self.inner)?;
        for list in lists {
            if let Some(value) = inner.lists.get_mut(*list).and_then(VecDeque::pop_front) {
                return Ok(Some((list.to_string(), value)));
            }
        }
        Ok(None)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> bool {
        self.check().is_ok()
    }

    async fn push(&self, list: &str, value: String) -> Result<()> {
        self.check()?;
        lock(&self.inner)?.lists.entry(list.to_string()).or_default().push_back(value);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop_first(&self, lists: &[&str], timeout: Duration) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.try_pop(lists)? {
                return Ok(Some(found));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        self.check()?;
        Ok(lock(&self.inner)?.lists.get(list).map_or(0, VecDeque::len))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        lock(&self.inner)?.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(lock(&self.inner)?.values.get(key).cloned())
    }

    async fn hset(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.check()?;
        let mut inner = lock(&self.inner)?;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.check()?;
        Ok(lock(&self.inner)?.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn append(&self, stream: &str, fields: Map<String, Value>, max_len: usize) -> Result<EntryId> {
        self.check()?;
        let mut inner = lock(&self.inner)?;
        let entries = inner.streams.entry(stream.to_string()).or_default();
        let id = EntryId::next_after(entries.back().map(|e| e.id), now_ms());
        entries.push_back(LogEntry { id, fields });
        while entries.len() > max_len {
            entries.pop_front();
        }
        Ok(id)
    }

    async fn range(&self, stream: &str, after: Option<EntryId>, count: usize) -> Result<Vec<LogEntry>> {
        self.check()?;
        let inner = lock(&self.inner)?;
        let Some(entries) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter(|e| after.is_none_or(|after| e.id > after))
            .take(count)
            .cloned()
            .collect())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize> {
        self.check()?;
        self.hub.publish(channel, message)
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.check()?;
        self.hub.subscribe(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn fields(n: u64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("n".to_string(), json!(n));
        map
    }

    #[tokio::test]
    async fn test_lists_are_fifo() {
        let store = MemoryStore::new();
        store.push("q", "a".to_string()).await.unwrap();
        store.push("q", "b".to_string()).await.unwrap();

        let first = store.pop_first(&["q"], Duration::ZERO).await.unwrap();
        let second = store.pop_first(&["q"], Duration::ZERO).await.unwrap();
        assert_eq!(first, Some(("q".to_string(), "a".to_string())));
        assert_eq!(second, Some(("q".to_string(), "b".to_string())));
        assert_eq!(store.pop_first(&["q"], Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pop_checks_lists_in_order() {
        let store = MemoryStore::new();
        store.push("low", "l".to_string()).await.unwrap();
        store.push("high", "h".to_string()).await.unwrap();

        let popped = store.pop_first(&["high", "low"], Duration::ZERO).await.unwrap();
        assert_eq!(popped, Some(("high".to_string(), "h".to_string())));
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let store = MemoryStore::new();
        let started = std::time::Instant::now();
        let popped = store.pop_first(&["q"], Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());
        let popper = {
            let store = store.clone();
            tokio::spawn(async move { store.pop_first(&["q"], Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push("q", "late".to_string()).await.unwrap();

        let popped = popper.await.unwrap().unwrap();
        assert_eq!(popped, Some(("q".to_string(), "late".to_string())));
    }

    #[tokio::test]
    async fn test_stream_is_capped_and_ids_increase() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for n in 0..5 {
            ids.push(store.append("s", fields(n), 3).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let entries = store.range("s", None, 10).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].fields["n"], json!(2));
    }

    #[tokio::test]
    async fn test_range_resumes_after_cursor() {
        let store = MemoryStore::new();
        let first = store.append("s", fields(1), 100).await.unwrap();
        store.append("s", fields(2), 100).await.unwrap();

        let rest = store.range("s", Some(first), 10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].fields["n"], json!(2));
    }

    #[tokio::test]
    async fn test_hash_merge() {
        let store = MemoryStore::new();
        let mut a = BTreeMap::new();
        a.insert("available".to_string(), "10".to_string());
        store.hset("h", &a).await.unwrap();
        let mut b = BTreeMap::new();
        b.insert("reserved".to_string(), "2".to_string());
        store.hset("h", &b).await.unwrap();

        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["available"], "10");
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_fast() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(!store.ping().await);
        assert!(store.push("q", "x".to_string()).await.is_err());
        assert!(store.pop_first(&["q"], Duration::from_secs(1)).await.is_err());

        store.set_available(true);
        assert!(store.ping().await);
    }
}
