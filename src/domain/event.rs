//! Audit log vocabulary: streams, channels, state keys, entry ids.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TollgateError;

/// Event type constants written in the `event` field of audit records
pub mod event_types {
    pub const SCHEDULER_START: &str = "scheduler_start";
    pub const SCHEDULER_STOP: &str = "scheduler_stop";
    pub const TASK_DEFERRED: &str = "task_deferred";
    pub const REQUEUE_FAILED: &str = "requeue_failed";
    pub const TASK_COMPLETED: &str = "task_completed";
    pub const TASK_FAILED: &str = "task_failed";
    pub const CODE_BLOCKED: &str = "code_blocked";
    pub const CYCLE_ERROR: &str = "cycle_error";
    pub const SHIFT_COMPLETED: &str = "shift_completed";
    pub const SHIFT_FAILED: &str = "shift_failed";
    pub const ROLE_CHANGED: &str = "role_changed";
    pub const JOB_SUBMITTED: &str = "job_submitted";
}

/// Capped append-only audit streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Decisions,
    Tasks,
    Incidents,
}

impl LogStream {
    pub const ALL: [LogStream; 3] = [LogStream::Decisions, LogStream::Tasks, LogStream::Incidents];

    pub fn key(&self) -> &'static str {
        match self {
            LogStream::Decisions => "LOG:DECISIONS",
            LogStream::Tasks => "LOG:TASKS",
            LogStream::Incidents => "LOG:INCIDENTS",
        }
    }
}

impl std::str::FromStr for LogStream {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decisions" => Ok(LogStream::Decisions),
            "tasks" => Ok(LogStream::Tasks),
            "incidents" => Ok(LogStream::Incidents),
            other => Err(TollgateError::Decode(format!("unknown log stream: {}", other))),
        }
    }
}

/// Broadcast topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Signals,
    Heartbeat,
}

impl Channel {
    pub fn key(&self) -> &'static str {
        match self {
            Channel::Signals => "CHANNEL:SIGNALS",
            Channel::Heartbeat => "CHANNEL:HEARTBEAT",
        }
    }
}

/// Small state blobs kept for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    WorkerCurrent,
    WorkerStatus,
    BudgetAvailable,
}

impl StateKey {
    pub fn key(&self) -> &'static str {
        match self {
            StateKey::WorkerCurrent => "STATE:WORKER:CURRENT",
            StateKey::WorkerStatus => "STATE:WORKER:STATUS",
            StateKey::BudgetAvailable => "STATE:BUDGET:AVAILABLE",
        }
    }
}

/// Stream entry id, `"<ms>-<seq>"`, strictly increasing within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Next id after `last` for an append happening at `now_ms`.
    ///
    /// A clock that went backwards reuses the last millisecond.
    pub fn next_after(last: Option<EntryId>, now_ms: u64) -> EntryId {
        match last {
            Some(last) if now_ms <= last.ms => EntryId::new(last.ms, last.seq + 1),
            _ => EntryId::new(now_ms, 0),
        }
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl std::str::FromStr for EntryId {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TollgateError::Decode(format!("invalid entry id: {}", s));
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        Ok(EntryId {
            ms: ms.parse().map_err(|_| bad())?,
            seq: seq.parse().map_err(|_| bad())?,
        })
    }
}

impl Serialize for EntryId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One record read back from an audit stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub fields: Map<String, Value>,
}

impl LogEntry {
    /// The `event` field, if present
    pub fn event(&self) -> Option<&str> {
        self.fields.get("event").and_then(Value::as_str)
    }
}
