//! Where summaries of completed tasks are kept

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::TaskBus;
use crate::error::Result;
use crate::id::now_secs;
use crate::roles::Role;

/// Prefix of the hash holding a task's result
pub const RESULT_KEY_PREFIX: &str = "RESULT:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub task_id: String,
    pub role: Role,
    /// Truncated executor output
    pub output: String,
    pub cost: f64,
    pub duration_sec: f64,
}

impl ResultSummary {
    /// Keep at most `max_chars` characters of `output`.
    pub fn truncated(task_id: &str, role: Role, output: &str, max_chars: usize, cost: f64, duration_sec: f64) -> Self {
        Self {
            task_id: task_id.to_string(),
            role,
            output: output.chars().take(max_chars).collect(),
            cost,
            duration_sec,
        }
    }
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn store_result(&self, summary: &ResultSummary) -> Result<()>;
}

#[async_trait]
impl ResultSink for TaskBus {
    async fn store_result(&self, summary: &ResultSummary) -> Result<()> {
        let mut fields = BTreeMap::new();
        fields.insert("task_id".to_string(), summary.task_id.clone());
        fields.insert("role".to_string(), summary.role.to_string());
        fields.insert("output".to_string(), summary.output.clone());
        fields.insert("cost".to_string(), summary.cost.to_string());
        fields.insert("duration_sec".to_string(), format!("{:.2}", summary.duration_sec));
        fields.insert("stored_at".to_string(), now_secs().to_string());
        self.hset_raw(&format!("{}{}", RESULT_KEY_PREFIX, summary.task_id), &fields)
            .await
    }
}
