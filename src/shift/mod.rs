//! Role hot-swap ("shift") protocol
//!
//! A shift moves the worker from one role to another without stopping the
//! admission loop. Stages run in order and a failing stage ends the attempt:
//!
//! ```text
//! PENDING -> VALIDATING -> HANDOFF -> TESTING -> COMPLETED
//!                 |                      |
//!                 +------> FAILED <------+
//! ```
//!
//! - **Validate**: the target role's model is served (exact name or `:latest`)
//! - **Handoff**: the previous role and caller context are recorded
//! - **Test**: a short probe prompt must get a non-trivial reply
//!
//! Attempts are serialized; every report lands in a bounded history.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::bus::TaskBus;
use crate::domain::{Channel, LogStream, StateKey, event_types};
use crate::executor::Executor;
use crate::llm::{GenerateRequest, InferenceClient};
use crate::roles::{Role, RoleRegistry};

/// Role name before the first completed shift
pub const NO_ROLE: &str = "none";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShiftStatus {
    Pending,
    Validating,
    Handoff,
    Testing,
    Completed,
    Failed,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Pending => "pending",
            ShiftStatus::Validating => "validating",
            ShiftStatus::Handoff => "handoff",
            ShiftStatus::Testing => "testing",
            ShiftStatus::Completed => "completed",
            ShiftStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShiftStatus::Completed | ShiftStatus::Failed)
    }
}

impl std::fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one shift attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftReport {
    pub from_role: String,
    pub to_role: Role,
    pub status: ShiftStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub validation_ok: bool,
    pub test_ok: bool,
    pub handoff_snapshot: Option<Value>,
    pub error: Option<String>,
}

impl ShiftReport {
    fn new(from_role: String, to_role: Role) -> Self {
        Self {
            from_role,
            to_role,
            status: ShiftStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            validation_ok: false,
            test_ok: false,
            handoff_snapshot: None,
            error: None,
        }
    }

    /// Seconds from start to completion, or to now while in flight.
    pub fn duration_sec(&self) -> f64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    fn fail(&mut self, error: impl Into<String>) {
        self.status = ShiftStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> Value {
        json!({
            "from_role": self.from_role,
            "to_role": self.to_role,
            "status": self.status,
            "duration_sec": (self.duration_sec() * 100.0).round() / 100.0,
            "validation_ok": self.validation_ok,
            "test_ok": self.test_ok,
            "error": self.error,
        })
    }
}

/// Tunables for the shift protocol
#[derive(Debug, Clone)]
pub struct ShiftConfig {
    /// Reports kept in history.
    pub history_limit: usize,
    /// A probe reply must be longer than this many characters (trimmed).
    pub min_probe_chars: usize,
    /// Token cap for the probe reply.
    pub probe_num_predict: u32,
    pub probe_timeout: Duration,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            history_limit: 20,
            min_probe_chars: 10,
            probe_num_predict: 50,
            probe_timeout: Duration::from_secs(60),
        }
    }
}

/// Short question each role should be able to answer
pub fn probe_prompt(role: Role) -> &'static str {
    match role {
        Role::Sysadmin => "Briefly: which container commands do you use for monitoring? (one sentence)",
        Role::Auditor => "Briefly: what do you check during a security audit? (one sentence)",
        Role::Economist => "Briefly: how do you estimate a task's cost in units? (one sentence)",
        Role::Cleaner => "Briefly: what do you clean up first? (one sentence)",
        Role::Emergency => "Briefly: what is your first action in an incident? (one sentence)",
    }
}

struct ShiftState {
    current_role: String,
    history: VecDeque<ShiftReport>,
}

pub struct ShiftManager {
    client: Arc<dyn InferenceClient>,
    registry: Arc<RoleRegistry>,
    executor: Option<Arc<dyn Executor>>,
    bus: Option<TaskBus>,
    config: ShiftConfig,
    state: Mutex<ShiftState>,
}

impl ShiftManager {
    pub fn new(client: Arc<dyn InferenceClient>, registry: Arc<RoleRegistry>) -> Self {
        Self {
            client,
            registry,
            executor: None,
            bus: None,
            config: ShiftConfig::default(),
            state: Mutex::new(ShiftState {
                current_role: NO_ROLE.to_string(),
                history: VecDeque::new(),
            }),
        }
    }

    /// Executor told to switch role when a shift completes
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Bus used to audit shifts and announce role changes
    pub fn with_bus(mut self, bus: TaskBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_config(mut self, config: ShiftConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn current_role(&self) -> String {
        self.state.lock().await.current_role.clone()
    }

    /// Most recent reports, oldest first
    pub async fn history(&self) -> Vec<ShiftReport> {
        self.state.lock().await.history.iter().cloned().collect()
    }

    /// Run one shift attempt to `to`.
    ///
    /// Concurrent callers wait until the attempt in progress has been
    /// recorded and announced. The returned report is always terminal.
    pub async fn execute_shift(&self, to: Role, context: Option<Value>) -> ShiftReport {
        let mut state = self.state.lock().await;
        let mut report = ShiftReport::new(state.current_role.clone(), to);
        tracing::info!(from = %report.from_role, to = %to, "Shift started");

        self.run_stages(&mut report, context).await;

        if report.status == ShiftStatus::Completed {
            state.current_role = to.as_str().to_string();
        }
        state.history.push_back(report.clone());
        while state.history.len() > self.config.history_limit {
            state.history.pop_front();
        }

        self.announce(&report).await;
        report
    }

    async fn run_stages(&self, report: &mut ShiftReport, context: Option<Value>) {
        let to = report.to_role;

        report.status = ShiftStatus::Validating;
        match self.validate(to).await {
            Ok(()) => {
                report.validation_ok = true;
                log::info!("Shift validate: model for {} is served", to);
            }
            Err(e) => {
                log::error!("Shift to {} failed validation: {}", to, e);
                report.fail(e);
                return;
            }
        }

        report.status = ShiftStatus::Handoff;
        let context = context.unwrap_or_else(|| json!({}));
        log::info!("Shift handoff: {} bytes of context", context.to_string().len());
        report.handoff_snapshot = Some(json!({
            "previous_role": report.from_role,
            "timestamp": Utc::now().to_rfc3339(),
            "context": context,
        }));

        report.status = ShiftStatus::Testing;
        match self.test(to).await {
            Ok(()) => {
                report.test_ok = true;
            }
            Err(e) => {
                log::error!("Shift to {} failed probe: {}", to, e);
                report.fail(e);
                return;
            }
        }

        report.status = ShiftStatus::Completed;
        report.completed_at = Some(Utc::now());
        tracing::info!(from = %report.from_role, to = %to, duration_sec = report.duration_sec(), "Shift completed");
    }

    async fn validate(&self, role: Role) -> Result<(), String> {
        let config = self
            .registry
            .get(role)
            .ok_or_else(|| format!("no configuration for role {}", role))?;
        let models = self
            .client
            .list_models()
            .await
            .map_err(|e| format!("could not list models: {}", e))?;

        let tagged = format!("{}:latest", config.model);
        if models.iter().any(|m| *m == config.model || *m == tagged) {
            Ok(())
        } else {
            Err(format!("model {} for role {} is not ready", config.model, role))
        }
    }

    async fn test(&self, role: Role) -> Result<(), String> {
        let config = self
            .registry
            .get(role)
            .ok_or_else(|| format!("no configuration for role {}", role))?;
        let request = GenerateRequest::new(&config.model, probe_prompt(role)).with_num_predict(self.config.probe_num_predict);

        let response = self
            .client
            .generate(request, Some(self.config.probe_timeout))
            .await
            .map_err(|e| format!("probe error: {}", e))?;

        let reply = response.response.trim();
        if reply.chars().count() > self.config.min_probe_chars {
            Ok(())
        } else {
            Err(format!("probe reply too short ({} chars)", reply.chars().count()))
        }
    }

    /// Side effects after an attempt; none of them can fail the shift.
    async fn announce(&self, report: &ShiftReport) {
        let completed = report.status == ShiftStatus::Completed;

        if completed && let Some(executor) = &self.executor {
            if !executor.switch_role(report.to_role).await {
                log::warn!("Executor refused switch to {}", report.to_role);
            }
        }

        let Some(bus) = &self.bus else {
            return;
        };

        let event = if completed {
            event_types::SHIFT_COMPLETED
        } else {
            event_types::SHIFT_FAILED
        };
        let mut record = report.to_json();
        record["event"] = json!(event);
        let stream = if completed { LogStream::Decisions } else { LogStream::Incidents };
        if let Err(e) = bus.log(stream, record).await {
            log::warn!("Shift audit write failed: {}", e);
        }

        if completed {
            if let Err(e) = bus.set_state(StateKey::WorkerCurrent, report.to_role.as_str()).await {
                log::debug!("Worker state not updated: {}", e);
            }
            let message = json!({
                "event": event_types::ROLE_CHANGED,
                "from": report.from_role,
                "to": report.to_role,
            });
            if let Err(e) = bus.publish(Channel::Signals, &message).await {
                log::warn!("Role change not broadcast: {}", e);
            }
        }
    }
}
