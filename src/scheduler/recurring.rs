//! Recurring maintenance jobs
//!
//! The planner pushes a task for every enabled job whose interval has
//! elapsed. Nothing is submitted while the system is critical. Each task
//! carries a `scheduler_context` with the snapshot it was planned under.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::bus::TaskBus;
use crate::domain::{LogStream, Priority, SystemSnapshot, Task, event_types};
use crate::id::{now_secs, recurring_task_id};
use crate::monitor::ResourceProvider;
use crate::scheduler::admission::StopHandle;

/// Source tag on planner-produced tasks
pub const JOB_SOURCE: &str = "scheduler";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecurringJob {
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub interval_secs: u64,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> Priority {
    Priority::Internal
}

fn default_enabled() -> bool {
    true
}

impl RecurringJob {
    fn new(name: &str, task_type: &str, payload: Value, interval_secs: u64, priority: Priority) -> Self {
        Self {
            name: name.to_string(),
            task_type: task_type.to_string(),
            payload: match payload {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            interval_secs,
            priority,
            enabled: true,
        }
    }
}

/// Built-in maintenance schedule
pub fn default_jobs() -> Vec<RecurringJob> {
    vec![
        RecurringJob::new(
            "system_health_check",
            "sysadmin",
            json!({
                "action": "health_check",
                "checks": ["docker_containers", "disk_space", "memory_usage", "network"],
                "auto": true,
            }),
            300,
            Priority::Internal,
        ),
        RecurringJob::new(
            "security_scan",
            "auditor",
            json!({
                "action": "periodic_security_scan",
                "targets": ["codebase", "docker_configs", "exposed_ports"],
                "auto": true,
            }),
            1800,
            Priority::Export,
        ),
        RecurringJob::new(
            "log_cleanup",
            "cleaner",
            json!({
                "action": "cleanup",
                "targets": ["old_logs", "docker_images", "temp_files", "stale_stream_entries"],
                "auto": true,
                "max_age_hours": 24,
            }),
            3600,
            Priority::Internal,
        ),
        RecurringJob::new(
            "resource_forecast",
            "economist",
            json!({
                "action": "resource_forecast",
                "analyze": ["cpu_trend", "ram_trend", "disk_growth", "budget_usage"],
                "auto": true,
            }),
            3600,
            Priority::Internal,
        ),
        RecurringJob::new(
            "daily_report",
            "auditor",
            json!({
                "action": "daily_report",
                "include": [
                    "tasks_completed", "tasks_failed", "resource_usage",
                    "security_incidents", "budget_status", "model_usage",
                ],
                "auto": true,
            }),
            86400,
            Priority::Export,
        ),
    ]
}

#[derive(Debug, Clone)]
struct JobState {
    job: RecurringJob,
    last_run: f64,
    run_count: u64,
}

/// Tracks when each job last ran
#[derive(Debug, Clone)]
pub struct JobPlanner {
    jobs: Vec<JobState>,
}

impl Default for JobPlanner {
    fn default() -> Self {
        Self::new(default_jobs())
    }
}

impl JobPlanner {
    /// Every enabled job is due on the first check.
    pub fn new(jobs: Vec<RecurringJob>) -> Self {
        Self {
            jobs: jobs
                .into_iter()
                .map(|job| JobState {
                    job,
                    last_run: 0.0,
                    run_count: 0,
                })
                .collect(),
        }
    }

    pub fn jobs(&self) -> impl Iterator<Item = &RecurringJob> {
        self.jobs.iter().map(|s| &s.job)
    }

    pub fn run_count(&self, name: &str) -> Option<u64> {
        self.jobs.iter().find(|s| s.job.name == name).map(|s| s.run_count)
    }

    /// Names of jobs due at `now` (unix seconds)
    pub fn due(&self, now: f64) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|s| s.job.enabled && now - s.last_run >= s.job.interval_secs as f64)
            .map(|s| s.job.name.as_str())
            .collect()
    }

    fn build_task(job: &RecurringJob, run_number: u64, snapshot: &SystemSnapshot, now: f64) -> Task {
        let mut payload = job.payload.clone();
        payload.insert(
            "scheduler_context".to_string(),
            json!({
                "cpu_percent": snapshot.cpu_percent,
                "ram_percent": snapshot.ram_percent,
                "disk_percent": snapshot.disk_percent,
                "run_number": run_number,
            }),
        );
        Task::new(job.task_type.clone(), job.priority)
            .with_id(recurring_task_id(&job.name, now as u64))
            .with_payload(payload)
            .with_source(JOB_SOURCE)
    }

    /// Submit every due job; returns the ids pushed.
    ///
    /// A job is marked as run even when its push fails, so a broken store
    /// does not cause a burst of retries on the next check.
    pub async fn tick(&mut self, bus: &TaskBus, snapshot: &SystemSnapshot, now: f64) -> Vec<String> {
        if snapshot.is_critical() {
            log::warn!("System critical; recurring jobs paused");
            return Vec::new();
        }

        let mut submitted = Vec::new();
        for state in self.jobs.iter_mut() {
            if !state.job.enabled || now - state.last_run < state.job.interval_secs as f64 {
                continue;
            }
            let task = Self::build_task(&state.job, state.run_count + 1, snapshot, now);
            match bus.push(&task, None).await {
                Ok(()) => {
                    log::info!(
                        "[{}] -> {} ({}, run #{})",
                        state.job.name,
                        task.id,
                        task.priority.lane().name(),
                        state.run_count + 1
                    );
                    let record = json!({
                        "event": event_types::JOB_SUBMITTED,
                        "job": state.job.name,
                        "task_id": task.id,
                        "run_number": state.run_count + 1,
                    });
                    if let Err(e) = bus.log(LogStream::Decisions, record).await {
                        log::warn!("Audit write failed: {}", e);
                    }
                    submitted.push(task.id);
                }
                Err(e) => log::error!("Failed to submit {}: {}", state.job.name, e),
            }
            state.last_run = now;
            state.run_count += 1;
        }
        submitted
    }

    /// Check for due jobs every `check_interval` until stopped.
    pub async fn run(mut self, bus: TaskBus, monitor: Arc<dyn ResourceProvider>, stop: StopHandle, check_interval: Duration) {
        log::info!("Job planner started with {} enabled jobs", self.jobs().filter(|j| j.enabled).count());
        for job in self.jobs().filter(|j| j.enabled) {
            log::info!("  {}: every {} min ({})", job.name, job.interval_secs / 60, job.task_type);
        }

        while !stop.is_stopped() {
            match monitor.snapshot().await {
                Ok(snapshot) => {
                    self.tick(&bus, &snapshot, now_secs()).await;
                }
                Err(e) => log::warn!("Job planner skipped a check: {}", e),
            }
            stop.sleep(check_interval).await;
        }
        log::info!("Job planner stopped");
    }
}
