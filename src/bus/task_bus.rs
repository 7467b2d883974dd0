//! Typed task bus over a `Store`.
//!
//! Lanes, audit streams, broadcast channels and state keys are fixed; the
//! bus maps them onto store keys and (de)serializes tasks and records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::bus::traits::{Store, Subscription};
use crate::domain::{Channel, EntryId, Lane, LogEntry, LogStream, StateKey, Task};
use crate::error::{Result, TollgateError};
use crate::id::now_secs;

/// Default cap for each audit stream.
pub const DEFAULT_STREAM_MAX_LEN: usize = 10_000;

#[derive(Clone)]
pub struct TaskBus {
    store: Arc<dyn Store>,
    stream_max_len: usize,
}

impl TaskBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }

    pub fn with_stream_max_len(mut self, max_len: usize) -> Self {
        self.stream_max_len = max_len.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Connectivity check; never errors.
    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }

    // ---- queues ----

    /// Enqueue at the tail of `lane`, or of the lane implied by the task's priority.
    pub async fn push(&self, task: &Task, lane: Option<Lane>) -> Result<()> {
        let lane = lane.unwrap_or_else(|| task.priority.lane());
        self.store.push(lane.key(), task.to_json()?).await?;
        log::debug!("Task {} -> {}", task.id, lane.key());
        Ok(())
    }

    /// Pop the next task: critical, then export, then internal; FIFO within a lane.
    ///
    /// Returns `None` once `timeout` expires with every lane empty.
    pub async fn pop(&self, timeout: Duration) -> Result<Option<Task>> {
        Ok(self.pop_with_lane(timeout).await?.map(|(_, task)| task))
    }

    /// Like `pop`, also reporting the lane the task was taken from.
    pub async fn pop_with_lane(&self, timeout: Duration) -> Result<Option<(Lane, Task)>> {
        let keys = Lane::ALL.map(|lane| lane.key());
        let Some((key, data)) = self.store.pop_first(&keys, timeout).await? else {
            return Ok(None);
        };
        let task = Task::from_json(&data).map_err(|e| {
            TollgateError::Decode(format!("dropped malformed entry from {}: {}; entry: {}", key, e, data))
        })?;
        let lane = Lane::from_key(&key).unwrap_or_else(|| task.priority.lane());
        log::debug!("Task {} <- {}", task.id, key);
        Ok(Some((lane, task)))
    }

    pub async fn queue_length(&self, lane: Lane) -> Result<usize> {
        self.store.list_len(lane.key()).await
    }

    /// Lengths of all lanes, in precedence order.
    pub async fn queue_lengths(&self) -> Result<Vec<(Lane, usize)>> {
        let mut lengths = Vec::with_capacity(Lane::ALL.len());
        for lane in Lane::ALL {
            lengths.push((lane, self.queue_length(lane).await?));
        }
        Ok(lengths)
    }

    // ---- broadcast ----

    /// Broadcast a JSON message; returns how many live subscribers got it.
    pub async fn publish(&self, channel: Channel, message: &Value) -> Result<usize> {
        self.store.publish(channel.key(), message.to_string()).await
    }

    pub fn subscribe(&self, channel: Channel) -> Result<ChannelSubscription> {
        Ok(ChannelSubscription {
            inner: self.store.subscribe(channel.key())?,
        })
    }

    // ---- state ----

    pub async fn set_state(&self, key: StateKey, value: &str) -> Result<()> {
        self.store.set(key.key(), value).await
    }

    pub async fn get_state(&self, key: StateKey) -> Result<Option<String>> {
        self.store.get(key.key()).await
    }

    pub async fn set_budget(&self, key: StateKey, values: &BTreeMap<String, f64>) -> Result<()> {
        let fields = values.iter().map(|(k, v)| (k.clone(), v.to_string())).collect();
        self.store.hset(key.key(), &fields).await
    }

    /// Budget hash; fields that do not parse as numbers are skipped.
    pub async fn get_budget(&self, key: StateKey) -> Result<BTreeMap<String, f64>> {
        let raw = self.store.hgetall(key.key()).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| v.parse::<f64>().ok().map(|v| (k, v)))
            .collect())
    }

    // ---- audit log ----

    /// Append a timestamped record to an audit stream; returns its entry id.
    ///
    /// Non-object values are wrapped as `{"message": value}`.
    pub async fn log(&self, stream: LogStream, fields: Value) -> Result<EntryId> {
        let mut record = match fields {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("message".to_string(), other);
                map
            }
        };
        record.insert("timestamp".to_string(), Value::from(now_secs()));
        self.store.append(stream.key(), record, self.stream_max_len).await
    }

    /// Read up to `count` records after the `after` cursor (oldest first).
    pub async fn read_log(&self, stream: LogStream, after: Option<EntryId>, count: usize) -> Result<Vec<LogEntry>> {
        self.store.range(stream.key(), after, count).await
    }

    /// Raw key/value access for collaborators that keep small blobs on the bus.
    pub async fn hset_raw(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        self.store.hset(key, fields).await
    }

    pub async fn hgetall_raw(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.store.hgetall(key).await
    }
}

/// Subscription that decodes JSON messages
pub struct ChannelSubscription {
    inner: Subscription,
}

impl ChannelSubscription {
    /// Next message; undecodable messages are skipped.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let raw = self.inner.recv().await?;
            match serde_json::from_str(&raw) {
                Ok(value) => return Some(value),
                Err(e) => log::warn!("Dropping undecodable broadcast message: {}", e),
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        while let Some(raw) = self.inner.try_recv() {
            if let Ok(value) = serde_json::from_str(&raw) {
                return Some(value);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryStore;
    use crate::domain::Priority;
    use serde_json::json;

    fn bus() -> TaskBus {
        TaskBus::new(Arc::new(MemoryStore::new()))
    }

    fn task(id: &str, priority: Priority) -> Task {
        Task::new("docker_operation", priority).with_id(id)
    }

    #[tokio::test]
    async fn test_critical_pops_before_export() {
        let bus = bus();
        bus.push(&task("T2", Priority::Export), None).await.unwrap();
        bus.push(&task("T1", Priority::Critical), None).await.unwrap();

        let first = bus.pop(Duration::ZERO).await.unwrap().unwrap();
        let second = bus.pop(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id, "T1");
        assert_eq!(second.id, "T2");
    }

    #[tokio::test]
    async fn test_precedence_and_fifo_across_lanes() {
        let bus = bus();
        let pushes = [
            ("i1", Priority::Internal),
            ("e1", Priority::Export),
            ("c1", Priority::Critical),
            ("i2", Priority::Internal),
            ("e2", Priority::Export),
            ("c2", Priority::Critical),
        ];
        for (id, priority) in pushes {
            bus.push(&task(id, priority), None).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(t) = bus.pop(Duration::ZERO).await.unwrap() {
            order.push(t.id);
        }
        assert_eq!(order, vec!["c1", "c2", "e1", "e2", "i1", "i2"]);
    }

    #[tokio::test]
    async fn test_explicit_lane_overrides_priority() {
        let bus = bus();
        bus.push(&task("t", Priority::Internal), Some(Lane::Critical)).await.unwrap();
        assert_eq!(bus.queue_length(Lane::Critical).await.unwrap(), 1);
        assert_eq!(bus.queue_length(Lane::Internal).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pop_with_lane_reports_source_lane() {
        let bus = bus();
        bus.push(&task("t", Priority::Internal), Some(Lane::Export)).await.unwrap();
        let (lane, popped) = bus.pop_with_lane(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(lane, Lane::Export);
        assert_eq!(popped.priority, Priority::Internal);
    }

    #[tokio::test]
    async fn test_no_deduplication() {
        let bus = bus();
        let t = task("same", Priority::Export);
        bus.push(&t, None).await.unwrap();
        bus.push(&t, None).await.unwrap();
        assert_eq!(bus.queue_length(Lane::Export).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pop_returns_none_on_timeout() {
        let bus = bus();
        assert!(bus.pop(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_malformed_entry_surfaces_decode_error() {
        let bus = bus();
        bus.store().push(Lane::Export.key(), "{not json".to_string()).await.unwrap();
        let err = bus.pop(Duration::ZERO).await.unwrap_err();
        match err {
            TollgateError::Decode(msg) => assert!(msg.contains("{not json")),
            other => panic!("expected Decode, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_priority_entry_is_still_delivered() {
        let bus = bus();
        bus.store()
            .push(Lane::Export.key(), r#"{"id":"odd","type":"cleanup","priority":"low"}"#.to_string())
            .await
            .unwrap();
        let (lane, task) = bus.pop_with_lane(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(task.id, "odd");
        assert_eq!(task.priority, Priority::Internal);
        assert_eq!(lane, Lane::Export);
    }

    #[tokio::test]
    async fn test_queue_lengths_in_precedence_order() {
        let bus = bus();
        bus.push(&task("a", Priority::Internal), None).await.unwrap();
        let lengths = bus.queue_lengths().await.unwrap();
        assert_eq!(lengths, vec![(Lane::Critical, 0), (Lane::Export, 0), (Lane::Internal, 1)]);
    }

    #[tokio::test]
    async fn test_log_adds_timestamp_and_returns_cursor() {
        let bus = bus();
        let first = bus
            .log(LogStream::Tasks, json!({"event": "task_completed", "task_id": "a"}))
            .await
            .unwrap();
        bus.log(LogStream::Tasks, json!({"event": "task_failed", "task_id": "b"}))
            .await
            .unwrap();

        let all = bus.read_log(LogStream::Tasks, None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].fields.contains_key("timestamp"));

        let after = bus.read_log(LogStream::Tasks, Some(first), 10).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].event(), Some("task_failed"));
    }

    #[tokio::test]
    async fn test_log_wraps_scalars() {
        let bus = bus();
        bus.log(LogStream::Incidents, json!("disk on fire")).await.unwrap();
        let entries = bus.read_log(LogStream::Incidents, None, 1).await.unwrap();
        assert_eq!(entries[0].fields["message"], json!("disk on fire"));
    }

    #[tokio::test]
    async fn test_streams_are_capped() {
        let bus = bus().with_stream_max_len(3);
        for i in 0..10 {
            bus.log(LogStream::Decisions, json!({"i": i})).await.unwrap();
        }
        let entries = bus.read_log(LogStream::Decisions, None, 100).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].fields["i"], json!(7));
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = bus();
        assert_eq!(bus.publish(Channel::Signals, &json!({"event": "early"})).await.unwrap(), 0);

        let mut sub = bus.subscribe(Channel::Signals).unwrap();
        bus.publish(Channel::Signals, &json!({"event": "role_changed"})).await.unwrap();
        let message = sub.recv().await.unwrap();
        assert_eq!(message["event"], "role_changed");
    }

    #[tokio::test]
    async fn test_state_and_budget() {
        let bus = bus();
        bus.set_state(StateKey::WorkerCurrent, "auditor").await.unwrap();
        assert_eq!(
            bus.get_state(StateKey::WorkerCurrent).await.unwrap().as_deref(),
            Some("auditor")
        );

        let mut budget = BTreeMap::new();
        budget.insert("available".to_string(), 995.5);
        bus.set_budget(StateKey::BudgetAvailable, &budget).await.unwrap();
        assert_eq!(bus.get_budget(StateKey::BudgetAvailable).await.unwrap(), budget);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let store = Arc::new(MemoryStore::new());
        let bus = TaskBus::new(store.clone());
        store.set_available(false);
        assert!(!bus.ping().await);
        assert!(bus.push(&task("x", Priority::Export), None).await.is_err());
    }
}
