//! SQLite store backend.
//!
//! Lists, state and streams live in one database file, so several processes
//! on the same host (the loop, `tollgate submit`, `tollgate log`) share the
//! queues. Blocked pops poll the database. Broadcast stays in-process.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::bus::lock;
use crate::bus::traits::{Broadcaster, Store, Subscription};
use crate::domain::{EntryId, LogEntry};
use crate::error::{Result, TollgateError};
use crate::id::now_ms;

pub struct SqliteStore {
    db: Mutex<Connection>,
    hub: Broadcaster,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Open or create a store at the given database path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        db.busy_timeout(Duration::from_secs(5))?;
        db.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::from_connection(db)
    }

    /// Private in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        Self::init_schema(&db)?;
        Ok(Self {
            db: Mutex::new(db),
            hub: Broadcaster::new(256),
            poll_interval: Duration::from_millis(100),
        })
    }

    /// How often a blocked pop re-checks the lists.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                list TEXT NOT NULL,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lists_list ON lists(list, id);

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS hashes (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );

            CREATE TABLE IF NOT EXISTS streams (
                stream TEXT NOT NULL,
                ms INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (stream, ms, seq)
            );
            "#,
        )?;
        Ok(())
    }

    fn try_pop(&self, lists: &[&str]) -> Result<Option<(String, String)>> {
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut found = None;
        for list in lists {
            let head: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, value FROM lists WHERE list = ?1 ORDER BY id LIMIT 1",
                    params![list],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((id, value)) = head {
                tx.execute("DELETE FROM lists WHERE id = ?1", params![id])?;
                found = Some((list.to_string(), value));
                break;
            }
        }
        tx.commit()?;
        Ok(found)
    }

    fn append_sync(&self, stream: &str, fields: &Map<String, Value>, max_len: usize) -> Result<EntryId> {
        let mut db = lock(&self.db)?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<(i64, i64)> = tx
            .query_row(
                "SELECT ms, seq FROM streams WHERE stream = ?1 ORDER BY ms DESC, seq DESC LIMIT 1",
                params![stream],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let id = EntryId::next_after(last.map(|(ms, seq)| EntryId::new(ms as u64, seq as u64)), now_ms());

        tx.execute(
            "INSERT INTO streams (stream, ms, seq, fields) VALUES (?1, ?2, ?3, ?4)",
            params![stream, id.ms as i64, id.seq as i64, serde_json::to_string(fields)?],
        )?;

        // Newest entry that falls outside the cap; it and everything older goes.
        let cutoff: Option<(i64, i64)> = tx
            .query_row(
                "SELECT ms, seq FROM streams WHERE stream = ?1 ORDER BY ms DESC, seq DESC LIMIT 1 OFFSET ?2",
                params![stream, max_len as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((ms, seq)) = cutoff {
            tx.execute(
                "DELETE FROM streams WHERE stream = ?1 AND (ms < ?2 OR (ms = ?2 AND seq <= ?3))",
                params![stream, ms, seq],
            )?;
        }

        tx.commit()?;
        Ok(id)
    }

    fn range_sync(&self, stream: &str, after: Option<EntryId>, count: usize) -> Result<Vec<LogEntry>> {
        let db = lock(&self.db)?;
        let (after_ms, after_seq) = match after {
            Some(id) => (Some(id.ms as i64), id.seq as i64),
            None => (None, 0),
        };
        let mut stmt = db.prepare(
            r#"
            SELECT ms, seq, fields FROM streams
            WHERE stream = ?1 AND (?2 IS NULL OR ms > ?2 OR (ms = ?2 AND seq > ?3))
            ORDER BY ms, seq
            LIMIT ?4
            "#,
        )?;
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![stream, after_ms, after_seq, limit], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (ms, seq, fields) = row?;
            let fields: Map<String, Value> = serde_json::from_str(&fields)
                .map_err(|e| TollgateError::Decode(format!("stream {} entry {}-{}: {}", stream, ms, seq, e)))?;
            entries.push(LogEntry {
                id: EntryId::new(ms as u64, seq as u64),
                fields,
            });
        }
        Ok(entries)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ping(&self) -> bool {
        match lock(&self.db) {
            Ok(db) => db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok(),
            Err(_) => false,
        }
    }

    async fn push(&self, list: &str, value: String) -> Result<()> {
        lock(&self.db)?.execute("INSERT INTO lists (list, value) VALUES (?1, ?2)", params![list, value])?;
        Ok(())
    }

    async fn pop_first(&self, lists: &[&str], timeout: Duration) -> Result<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.try_pop(lists)? {
                return Ok(Some(found));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn list_len(&self, list: &str) -> Result<usize> {
        let count: i64 = lock(&self.db)?.query_row(
            "SELECT COUNT(*) FROM lists WHERE list = ?1",
            params![list],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.db)?.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = lock(&self.db)?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    async fn hset(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut db = lock(&self.db)?;
        let tx = db.transaction()?;
        for (field, value) in fields {
            tx.execute(
                "INSERT OR REPLACE INTO hashes (key, field, value) VALUES (?1, ?2, ?3)",
                params![key, field, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let db = lock(&self.db)?;
        let mut stmt = db.prepare("SELECT field, value FROM hashes WHERE key = ?1")?;
        let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut hash = BTreeMap::new();
        for row in rows {
            let (field, value): (String, String) = row?;
            hash.insert(field, value);
        }
        Ok(hash)
    }

    async fn append(&self, stream: &str, fields: Map<String, Value>, max_len: usize) -> Result<EntryId> {
        self.append_sync(stream, &fields, max_len)
    }

    async fn range(&self, stream: &str, after: Option<EntryId>, count: usize) -> Result<Vec<LogEntry>> {
        self.range_sync(stream, after, count)
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize> {
        self.hub.publish(channel, message)
    }

    fn subscribe(&self, channel: &str) -> Result<Subscription> {
        self.hub.subscribe(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(n: u64) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("n".to_string(), json!(n));
        map
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("bus.db");
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.ping().await);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_lists_fifo_and_precedence() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.push("low", "l1".to_string()).await.unwrap();
        store.push("high", "h1".to_string()).await.unwrap();
        store.push("high", "h2".to_string()).await.unwrap();

        let order: Vec<String> = {
            let mut out = Vec::new();
            while let Some((_, v)) = store.pop_first(&["high", "low"], Duration::ZERO).await.unwrap() {
                out.push(v);
            }
            out
        };
        assert_eq!(order, vec!["h1", "h2", "l1"]);
        assert_eq!(store.list_len("high").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bus.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.push("q", "kept".to_string()).await.unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_len("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_times_out() {
        let store = SqliteStore::open_in_memory()
            .unwrap()
            .with_poll_interval(Duration::from_millis(10));
        let popped = store.pop_first(&["q"], Duration::from_millis(40)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_stream_cap_and_cursor() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for n in 0..6 {
            ids.push(store.append("s", fields(n), 4).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let all = store.range("s", None, 100).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].fields["n"], json!(2));

        let tail = store.range("s", Some(all[1].id), 100).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].fields["n"], json!(4));
    }

    #[tokio::test]
    async fn test_state_and_hashes() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v1").await.unwrap();
        store.set("k", "v2").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        let mut fields = BTreeMap::new();
        fields.insert("available".to_string(), "990".to_string());
        store.hset("budget", &fields).await.unwrap();
        assert_eq!(store.hgetall("budget").await.unwrap(), fields);
    }
}
