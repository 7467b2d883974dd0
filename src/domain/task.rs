//! Task record and queue lanes
//!
//! A task is the unit of work flowing through the bus. Its wire form is a flat
//! JSON object: `{id, type, payload, priority, source, created_at,
//! estimated_units}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, TollgateError};
use crate::id::{generate_task_id, now_secs};

/// Task priority, fixed at enqueue time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    Export,
    Internal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::Export => "export",
            Priority::Internal => "internal",
        }
    }

    /// Lane a task of this priority is queued on
    pub fn lane(&self) -> Lane {
        match self {
            Priority::Critical => Lane::Critical,
            Priority::Export => Lane::Export,
            Priority::Internal => Lane::Internal,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "export" => Ok(Priority::Export),
            "internal" => Ok(Priority::Internal),
            other => Err(TollgateError::Decode(format!("unknown priority: {}", other))),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three fixed priority queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lane {
    Critical,
    Export,
    Internal,
}

impl Lane {
    /// All lanes in pop precedence order.
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::Export, Lane::Internal];

    /// Store key for this lane
    pub fn key(&self) -> &'static str {
        match self {
            Lane::Critical => "QUEUE:CRITICAL",
            Lane::Export => "QUEUE:EXPORT",
            Lane::Internal => "QUEUE:INTERNAL",
        }
    }

    /// Display name, as printed by the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Lane::Critical => "CRITICAL",
            Lane::Export => "EXPORT",
            Lane::Internal => "INTERNAL",
        }
    }

    /// Lowercase name used in audit records; matches the priority wire names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Critical => "critical",
            Lane::Export => "export",
            Lane::Internal => "internal",
        }
    }

    pub fn from_key(key: &str) -> Option<Lane> {
        Lane::ALL.into_iter().find(|lane| lane.key() == key)
    }
}

impl From<Priority> for Lane {
    fn from(priority: Priority) -> Self {
        priority.lane()
    }
}

/// A work item waiting for admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(deserialize_with = "lenient_priority")]
    pub priority: Priority,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "now_secs")]
    pub created_at: f64,
    #[serde(default)]
    pub estimated_units: f64,
}

/// Unrecognized priority names fall back to `internal`.
fn lenient_priority<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Priority, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(raw.parse().unwrap_or_else(|_| {
        log::warn!("Unknown priority {:?}, treating as internal", raw);
        Priority::Internal
    }))
}

fn default_source() -> String {
    "unknown".to_string()
}

impl Task {
    /// Create a task with a fresh id and the current timestamp
    pub fn new(task_type: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: generate_task_id(),
            task_type: task_type.into(),
            payload: Map::new(),
            priority,
            source: default_source(),
            created_at: now_secs(),
            estimated_units: 0.0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Executable code carried in the payload, if any.
    ///
    /// Non-string values under `code` are scanned in their JSON form.
    pub fn code(&self) -> Option<String> {
        match self.payload.get("code")? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Serialize to the flat JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the flat JSON wire form
    pub fn from_json(data: &str) -> Result<Self> {
        serde_json::from_str(data).map_err(|e| TollgateError::Decode(format!("invalid task: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_task() -> Task {
        let mut payload = Map::new();
        payload.insert("action".to_string(), json!("health_check"));
        payload.insert("checks".to_string(), json!(["disk", "memory"]));
        Task {
            id: "t-1".to_string(),
            task_type: "docker_operation".to_string(),
            payload,
            priority: Priority::Export,
            source: "operator".to_string(),
            created_at: 1738300800.123,
            estimated_units: 12.5,
        }
    }

    #[test]
    fn test_wire_form_is_flat_with_type_key() {
        let value: Value = serde_json::from_str(&sample_task().to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "docker_operation");
        assert_eq!(value["priority"], "export");
        assert_eq!(value["payload"]["action"], "health_check");
        assert!(value.get("task_type").is_none());
    }

    #[test]
    fn test_wire_round_trip_preserves_fields() {
        let task = sample_task();
        let parsed = Task::from_json(&task.to_json().unwrap()).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let task = Task::from_json(r#"{"id":"x","type":"cleanup","priority":"internal"}"#).unwrap();
        assert_eq!(task.source, "unknown");
        assert!(task.payload.is_empty());
        assert_eq!(task.estimated_units, 0.0);
        assert!(task.created_at > 0.0);
    }

    #[test]
    fn test_from_json_demotes_unknown_priority_to_internal() {
        let task = Task::from_json(r#"{"id":"x","type":"cleanup","priority":"low"}"#).unwrap();
        assert_eq!(task.priority, Priority::Internal);
        assert_eq!(task.id, "x");
    }

    #[test]
    fn test_from_json_accepts_uppercase_priority() {
        let task = Task::from_json(r#"{"id":"x","type":"cleanup","priority":"EXPORT"}"#).unwrap();
        assert_eq!(task.priority, Priority::Export);
    }

    #[test]
    fn test_from_json_rejects_non_string_priority() {
        let err = Task::from_json(r#"{"id":"x","type":"cleanup","priority":3}"#).unwrap_err();
        assert!(matches!(err, TollgateError::Decode(_)));
    }

    #[test]
    fn test_priority_lane_mapping() {
        assert_eq!(Lane::from(Priority::Critical), Lane::Critical);
        assert_eq!(Lane::from(Priority::Export), Lane::Export);
        assert_eq!(Lane::from(Priority::Internal), Lane::Internal);
    }

    #[test]
    fn test_lane_keys_round_trip() {
        for lane in Lane::ALL {
            assert_eq!(Lane::from_key(lane.key()), Some(lane));
        }
        assert_eq!(Lane::from_key("QUEUE:LOW"), None);
    }

    #[test]
    fn test_lane_names_match_priority_names() {
        for priority in [Priority::Critical, Priority::Export, Priority::Internal] {
            assert_eq!(priority.lane().as_str(), priority.as_str());
        }
        assert_eq!(Lane::Export.name(), "EXPORT");
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_code_extraction() {
        let mut task = Task::new("code_analysis", Priority::Export);
        assert_eq!(task.code(), None);

        task.payload.insert("code".to_string(), json!("print('hi')"));
        assert_eq!(task.code().as_deref(), Some("print('hi')"));

        task.payload.insert("code".to_string(), json!(["rm", "-rf", "/"]));
        assert_eq!(task.code().as_deref(), Some(r#"["rm","-rf","/"]"#));
    }
}
