//! Admission control loop
//!
//! One cycle admits at most one task:
//! 1. Take a resource snapshot; a critical system skips the cycle before popping
//! 2. Pop the next task (critical, export, internal)
//! 3. Price it with the unit economy and the estimator
//! 4. Defer it to the tail of its lane when the budget cannot cover the estimate
//! 5. Route it to a role
//! 6. Drop it when its code fails the safety gate
//! 7. Dispatch, then debit on success
//!
//! Every decision goes to the audit streams. Errors and panics inside a cycle
//! are written as incidents and the loop carries on.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::bus::TaskBus;
use crate::domain::{Lane, LogStream, StateKey, Task, event_types};
use crate::economy::{self, TaskCost};
use crate::error::{Result, TollgateError};
use crate::executor::Executor;
use crate::llm::InferenceClient;
use crate::monitor::ResourceProvider;
use crate::roles::{Role, RoleTable};
use crate::safety::{PatternScanner, SafetyGate};
use crate::scheduler::estimate::CostEstimator;
use crate::scheduler::sink::{ResultSink, ResultSummary};

/// Configuration for the admission loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Units available when the loop starts.
    pub initial_budget: f64,
    /// Delay between cycles.
    pub poll_interval: Duration,
    /// How long one cycle waits for a task.
    pub pop_timeout: Duration,
    /// Model asked for cost estimates.
    pub admin_model: String,
    pub estimate_timeout: Duration,
    pub fallback_cost: f64,
    /// Defer tasks whose profile does not fit the snapshot.
    pub enforce_feasibility: bool,
    /// Characters of executor output kept in the result summary.
    pub result_summary_chars: usize,
    /// Log an idle line every this many empty cycles.
    pub idle_log_every: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            initial_budget: 1000.0,
            poll_interval: Duration::from_secs(5),
            pop_timeout: Duration::from_secs(1),
            admin_model: "qwen2.5:1.5b".to_string(),
            estimate_timeout: Duration::from_secs(60),
            fallback_cost: crate::scheduler::estimate::FALLBACK_COST,
            enforce_feasibility: false,
            result_summary_chars: 500,
            idle_log_every: 12,
        }
    }
}

impl SchedulerConfig {
    pub fn with_budget(mut self, budget: f64) -> Self {
        self.initial_budget = budget;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn with_enforce_feasibility(mut self, enforce: bool) -> Self {
        self.enforce_feasibility = enforce;
        self
    }
}

/// Units the scheduler may still spend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    available: f64,
}

impl Budget {
    pub fn new(available: f64) -> Self {
        Self { available }
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    pub fn can_afford(&self, cost: f64) -> bool {
        self.available >= cost
    }

    pub fn debit(&mut self, cost: f64) {
        self.available -= cost;
    }
}

/// Cooperative stop signal, checked between cycles
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` or until stopped, whichever comes first.
    pub async fn sleep(&self, duration: Duration) {
        let woken = self.wake.notified();
        tokio::pin!(woken);
        woken.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = woken => {}
        }
    }
}

/// Why an admitted task was put back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    Budget,
    Infeasible,
}

impl DeferReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeferReason::Budget => "budget",
            DeferReason::Infeasible => "infeasible",
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Snapshot was critical; nothing popped
    SkippedCritical,
    /// Every lane was empty
    Idle,
    Deferred {
        task_id: String,
        lane: Lane,
        cost: f64,
        reason: DeferReason,
    },
    /// Dropped by the safety gate
    Blocked { task_id: String, risk_level: u32 },
    Completed { task_id: String, role: Role, cost: f64 },
    Failed { task_id: String, role: Role, error: String },
    /// An error or panic was caught at the cycle boundary
    Errored(String),
}

pub struct AdmissionScheduler {
    bus: TaskBus,
    inference: Arc<dyn InferenceClient>,
    monitor: Arc<dyn ResourceProvider>,
    executor: Arc<dyn Executor>,
    estimator: CostEstimator,
    roles: RoleTable,
    safety: Arc<dyn SafetyGate>,
    results: Arc<dyn ResultSink>,
    config: SchedulerConfig,
    budget: Budget,
    cycle_count: u64,
    stop: StopHandle,
}

impl AdmissionScheduler {
    pub fn new(
        bus: TaskBus,
        inference: Arc<dyn InferenceClient>,
        monitor: Arc<dyn ResourceProvider>,
        executor: Arc<dyn Executor>,
        config: SchedulerConfig,
    ) -> Self {
        let estimator = CostEstimator::new(inference.clone(), config.admin_model.clone())
            .with_timeout(config.estimate_timeout)
            .with_fallback(config.fallback_cost);

        Self {
            results: Arc::new(bus.clone()),
            bus,
            inference,
            monitor,
            executor,
            estimator,
            roles: RoleTable::default(),
            safety: Arc::new(PatternScanner::new()),
            budget: Budget::new(config.initial_budget),
            config,
            cycle_count: 0,
            stop: StopHandle::new(),
        }
    }

    pub fn with_role_table(mut self, roles: RoleTable) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_safety_gate(mut self, safety: Arc<dyn SafetyGate>) -> Self {
        self.safety = safety;
        self
    }

    pub fn with_result_sink(mut self, results: Arc<dyn ResultSink>) -> Self {
        self.results = results;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn budget(&self) -> f64 {
        self.budget.available()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Run cycles until stopped.
    ///
    /// An unreachable store or inference endpoint at startup is fatal.
    pub async fn start(&mut self) -> Result<()> {
        if !self.bus.ping().await {
            return Err(TollgateError::Startup("task store unreachable".to_string()));
        }
        if !self.inference.health().await {
            return Err(TollgateError::Startup("inference endpoint unreachable".to_string()));
        }

        match self.monitor.snapshot().await {
            Ok(snap) => log::info!(
                "Scheduler starting: cpu {:.0}%, ram {:.0}%, budget {:.1} units",
                snap.cpu_percent,
                snap.ram_percent,
                self.budget.available()
            ),
            Err(e) => log::warn!("Scheduler starting without a snapshot: {}", e),
        }
        if let Ok(lengths) = self.bus.queue_lengths().await {
            log::info!("Queues: {:?}", lengths);
        }

        self.audit(
            LogStream::Decisions,
            json!({"event": event_types::SCHEDULER_START, "budget": self.budget.available()}),
        )
        .await;
        self.publish_budget().await;

        while !self.stop.is_stopped() {
            let outcome = self.run_cycle().await;
            log::debug!("Cycle {} -> {:?}", self.cycle_count, outcome);
            self.stop.sleep(self.config.poll_interval).await;
        }

        self.audit(
            LogStream::Decisions,
            json!({
                "event": event_types::SCHEDULER_STOP,
                "cycles": self.cycle_count,
                "budget": self.budget.available(),
            }),
        )
        .await;
        log::info!("Scheduler stopped after {} cycles", self.cycle_count);
        Ok(())
    }

    /// Run one admission cycle. Never fails; errors become `Errored`.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle_count += 1;
        let cycle = self.cycle_count;

        let caught = AssertUnwindSafe(self.try_cycle()).catch_unwind().await;
        let message = match caught {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "cycle panicked".to_string()),
        };

        tracing::error!(cycle, error = %message, "Cycle failed");
        self.audit(
            LogStream::Incidents,
            json!({"event": event_types::CYCLE_ERROR, "cycle": cycle, "error": message}),
        )
        .await;
        CycleOutcome::Errored(message)
    }

    async fn try_cycle(&mut self) -> Result<CycleOutcome> {
        let snapshot = self.monitor.snapshot().await?;
        if snapshot.is_critical() {
            log::warn!(
                "Resources critical (ram {:.0}%, temp {:?}); skipping cycle",
                snapshot.ram_percent,
                snapshot.cpu_temp_celsius
            );
            return Ok(CycleOutcome::SkippedCritical);
        }

        let Some((lane, task)) = self.bus.pop_with_lane(self.config.pop_timeout).await? else {
            if self.config.idle_log_every > 0 && self.cycle_count % self.config.idle_log_every == 0 {
                log::info!("Queues empty (cycle #{})", self.cycle_count);
            }
            return Ok(CycleOutcome::Idle);
        };

        tracing::info!(task_id = %task.id, task_type = %task.task_type, priority = %task.priority, "Task popped");

        let profile = economy::estimate_task_cost(&task.task_type, &snapshot, None);
        let cost = self.estimator.estimate(&task).await;

        if !self.budget.can_afford(cost) {
            return self.defer(task, lane, cost, &profile, DeferReason::Budget).await;
        }
        if self.config.enforce_feasibility && !profile.feasible {
            return self.defer(task, lane, cost, &profile, DeferReason::Infeasible).await;
        }

        let role = self.roles.select(&task.task_type);
        tracing::info!(task_id = %task.id, role = %role, cost, "Task admitted");

        if let Some(code) = task.code() {
            let report = self.safety.analyze(&code);
            if !report.safe {
                log::warn!("Code in {} blocked: {}", task.id, report.summary);
                self.audit(
                    LogStream::Incidents,
                    json!({
                        "event": event_types::CODE_BLOCKED,
                        "task_id": task.id,
                        "role": role,
                        "risk_level": report.risk_level,
                        "summary": report.summary,
                    }),
                )
                .await;
                return Ok(CycleOutcome::Blocked {
                    task_id: task.id,
                    risk_level: report.risk_level,
                });
            }
        }

        self.dispatch(task, role, cost, &profile).await
    }

    async fn defer(&self, task: Task, lane: Lane, cost: f64, profile: &TaskCost, reason: DeferReason) -> Result<CycleOutcome> {
        log::warn!(
            "Deferring {} ({}): budget {:.1}, cost {:.1}",
            task.id,
            reason.as_str(),
            self.budget.available(),
            cost
        );
        if let Err(e) = self.bus.push(&task, Some(lane)).await {
            // The task is already off its lane; its wire form is all that is left of it
            let wire = task.to_json().unwrap_or_else(|_| format!("{:?}", task));
            log::error!("Requeue of {} to {} failed: {}; task: {}", task.id, lane.key(), e, wire);
            self.audit(
                LogStream::Incidents,
                json!({
                    "event": event_types::REQUEUE_FAILED,
                    "task_id": task.id,
                    "lane": lane.as_str(),
                    "error": e.to_string(),
                    "task": wire,
                }),
            )
            .await;
            return Err(TollgateError::Store(format!("requeue of {} failed: {}", task.id, e)));
        }
        self.audit(
            LogStream::Decisions,
            json!({
                "event": event_types::TASK_DEFERRED,
                "task_id": task.id,
                "lane": lane.as_str(),
                "reason": reason.as_str(),
                "cost": cost,
                "budget": self.budget.available(),
                "profile": profile.to_json(),
            }),
        )
        .await;
        Ok(CycleOutcome::Deferred {
            task_id: task.id,
            lane,
            cost,
            reason,
        })
    }

    async fn dispatch(&mut self, task: Task, role: Role, cost: f64, profile: &TaskCost) -> Result<CycleOutcome> {
        self.set_state(StateKey::WorkerCurrent, role.as_str()).await;
        self.set_state(StateKey::WorkerStatus, "busy").await;

        let prompt = build_prompt(&task, role);
        let result = self.executor.execute(&task.id, &prompt, role).await;

        self.set_state(StateKey::WorkerStatus, "idle").await;

        if !result.success {
            let error = result.error.unwrap_or_else(|| "unknown error".to_string());
            log::error!("Task {} failed under {}: {}", task.id, role, error);
            self.audit(
                LogStream::Tasks,
                json!({
                    "event": event_types::TASK_FAILED,
                    "task_id": task.id,
                    "role": role,
                    "error": error,
                    "profile": profile.to_json(),
                }),
            )
            .await;
            return Ok(CycleOutcome::Failed {
                task_id: task.id,
                role,
                error,
            });
        }

        self.budget.debit(cost);
        log::info!(
            "Task {} done in {:.1}s; {:.1} units left",
            task.id,
            result.duration_sec,
            self.budget.available()
        );

        self.audit(
            LogStream::Tasks,
            json!({
                "event": event_types::TASK_COMPLETED,
                "task_id": task.id,
                "role": role,
                "cost": cost,
                "duration_sec": result.duration_sec,
                "budget": self.budget.available(),
                "profile": profile.to_json(),
            }),
        )
        .await;

        let summary = ResultSummary::truncated(
            &task.id,
            role,
            &result.output,
            self.config.result_summary_chars,
            cost,
            result.duration_sec,
        );
        if let Err(e) = self.results.store_result(&summary).await {
            log::warn!("Result for {} not stored: {}", task.id, e);
        }
        self.publish_budget().await;

        Ok(CycleOutcome::Completed {
            task_id: task.id,
            role,
            cost,
        })
    }

    /// Audit writes never fail the cycle.
    async fn audit(&self, stream: LogStream, fields: Value) {
        if let Err(e) = self.bus.log(stream, fields).await {
            log::warn!("Audit write to {} failed: {}", stream.key(), e);
        }
    }

    async fn set_state(&self, key: StateKey, value: &str) {
        if let Err(e) = self.bus.set_state(key, value).await {
            log::debug!("State {} not updated: {}", key.key(), e);
        }
    }

    async fn publish_budget(&self) {
        let mut budget = BTreeMap::new();
        budget.insert("available".to_string(), self.budget.available());
        if let Err(e) = self.bus.set_budget(StateKey::BudgetAvailable, &budget).await {
            log::debug!("Budget not published: {}", e);
        }
    }
}

/// Prompt handed to the executor
pub fn build_prompt(task: &Task, role: Role) -> String {
    let payload = serde_json::to_string_pretty(&task.payload).unwrap_or_else(|_| "{}".to_string());
    format!(
        "[role: {}]\nTask #{}\nType: {}\nPriority: {}\nData:\n{}\n\nComplete the task and reply with JSON: \
         {{\"status\":\"ok\",\"actions_taken\":[...],\"output\":\"...\"}}",
        role, task.id, task.task_type, task.priority, payload
    )
}
