//! Task execution under a role
//!
//! The scheduler hands each admitted task to an `Executor` together with a
//! prompt and the role it was routed to. Execution never returns an error:
//! failures come back as an unsuccessful `ExecutionResult`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::{GenerateRequest, InferenceClient, InferenceError};
use crate::roles::{Role, RoleRegistry};

/// Outcome of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub role: Role,
    pub success: bool,
    pub output: String,
    pub duration_sec: f64,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(task_id: &str, role: Role, output: String, duration_sec: f64) -> Self {
        Self {
            task_id: task_id.to_string(),
            role,
            success: true,
            output,
            duration_sec,
            error: None,
        }
    }

    pub fn failed(task_id: &str, role: Role, error: impl Into<String>, duration_sec: f64) -> Self {
        Self {
            task_id: task_id.to_string(),
            role,
            success: false,
            output: String::new(),
            duration_sec,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a prompt under `role`. Any timeout is the executor's own.
    async fn execute(&self, task_id: &str, prompt: &str, role: Role) -> ExecutionResult;

    /// Make `role` the active one; returns whether the switch happened.
    async fn switch_role(&self, role: Role) -> bool;
}

/// Executor backed by the inference runtime, one model per role
pub struct InferenceExecutor {
    client: Arc<dyn InferenceClient>,
    registry: Arc<RoleRegistry>,
    current: Mutex<Option<Role>>,
    timeout: Option<Duration>,
}

impl InferenceExecutor {
    pub fn new(client: Arc<dyn InferenceClient>, registry: Arc<RoleRegistry>) -> Self {
        Self {
            client,
            registry,
            current: Mutex::new(None),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn current_role(&self) -> Option<Role> {
        self.current.lock().ok().and_then(|c| *c)
    }

    fn set_current(&self, role: Role) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(role);
        }
    }
}

#[async_trait]
impl Executor for InferenceExecutor {
    async fn execute(&self, task_id: &str, prompt: &str, role: Role) -> ExecutionResult {
        let Some(config) = self.registry.get(role) else {
            return ExecutionResult::failed(task_id, role, format!("no configuration for role {}", role), 0.0);
        };

        if self.current_role() != Some(role) {
            self.switch_role(role).await;
        }

        let request = GenerateRequest::new(&config.model, prompt)
            .with_temperature(config.temperature)
            .with_num_predict(config.max_tokens);

        let started = Instant::now();
        let result = self.client.generate(request, self.timeout).await;
        let duration_sec = started.elapsed().as_secs_f64();

        match result {
            Ok(response) => {
                log::info!("Task {} executed by {} in {:.1}s", task_id, role, duration_sec);
                ExecutionResult::ok(task_id, role, response.response, duration_sec)
            }
            Err(InferenceError::Timeout(after)) => {
                ExecutionResult::failed(task_id, role, format!("inference timed out after {:?}", after), duration_sec)
            }
            Err(e) => ExecutionResult::failed(task_id, role, e.to_string(), duration_sec),
        }
    }

    async fn switch_role(&self, role: Role) -> bool {
        let Some(config) = self.registry.get(role) else {
            log::error!("Unknown role: {}", role);
            return false;
        };

        // A missing model is not fatal; the runtime may load it on first use.
        match self.client.list_models().await {
            Ok(models) if !models.iter().any(|m| m == &config.model) => {
                log::warn!("Model {} not served; available: {:?}", config.model, models);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Could not list models: {}", e),
        }

        self.set_current(role);
        log::info!("Role switched to {} ({})", role, config.model);
        true
    }
}

/// Executor that records calls and replies from a script; for tests and dry runs
pub struct RecordingExecutor {
    succeed: bool,
    output: String,
    calls: Mutex<Vec<(String, String, Role)>>,
    switches: Mutex<Vec<Role>>,
}

impl RecordingExecutor {
    pub fn succeeding(output: impl Into<String>) -> Self {
        Self {
            succeed: true,
            output: output.into(),
            calls: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            succeed: false,
            output: error.into(),
            calls: Mutex::new(Vec::new()),
            switches: Mutex::new(Vec::new()),
        }
    }

    /// `(task_id, prompt, role)` for every execute call
    pub fn calls(&self) -> Vec<(String, String, Role)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn switches(&self) -> Vec<Role> {
        self.switches.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn execute(&self, task_id: &str, prompt: &str, role: Role) -> ExecutionResult {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((task_id.to_string(), prompt.to_string(), role));
        }
        if self.succeed {
            ExecutionResult::ok(task_id, role, self.output.clone(), 0.01)
        } else {
            ExecutionResult::failed(task_id, role, self.output.clone(), 0.01)
        }
    }

    async fn switch_role(&self, role: Role) -> bool {
        if let Ok(mut switches) = self.switches.lock() {
            switches.push(role);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockInference;

    fn executor(mock: MockInference) -> (Arc<MockInference>, InferenceExecutor) {
        let mock = Arc::new(mock);
        let exec = InferenceExecutor::new(mock.clone(), Arc::new(RoleRegistry::default()));
        (mock, exec)
    }

    #[tokio::test]
    async fn test_execute_uses_role_settings() {
        let (mock, exec) = executor(MockInference::new().models(&["worker-auditor"]).reply("{\"status\":\"ok\"}"));

        let result = exec.execute("t1", "review this", Role::Auditor).await;
        assert!(result.success);
        assert_eq!(result.output, "{\"status\":\"ok\"}");
        assert_eq!(result.role, Role::Auditor);

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "worker-auditor");
        assert_eq!(requests[0].options.temperature, Some(0.1));
        assert_eq!(requests[0].options.num_predict, Some(4096));
        assert!(!requests[0].stream);
    }

    #[tokio::test]
    async fn test_execute_switches_role_once() {
        let (_, exec) = executor(MockInference::new().fallback("done"));
        assert_eq!(exec.current_role(), None);

        exec.execute("a", "p", Role::Cleaner).await;
        assert_eq!(exec.current_role(), Some(Role::Cleaner));
        exec.execute("b", "p", Role::Emergency).await;
        assert_eq!(exec.current_role(), Some(Role::Emergency));
    }

    #[tokio::test]
    async fn test_execute_failure_is_reported_not_raised() {
        let (_, exec) = executor(MockInference::new().fail("model crashed"));
        let result = exec.execute("t", "p", Role::Sysadmin).await;
        assert!(!result.success);
        assert!(result.output.is_empty());
        assert!(result.error.unwrap().contains("model crashed"));
    }

    #[tokio::test]
    async fn test_switch_role_tolerates_missing_model() {
        let (_, exec) = executor(MockInference::new().models(&["something-else"]));
        assert!(exec.switch_role(Role::Economist).await);
        assert_eq!(exec.current_role(), Some(Role::Economist));
    }

    #[tokio::test]
    async fn test_recording_executor() {
        let exec = RecordingExecutor::failing("nope");
        let result = exec.execute("t", "prompt", Role::Auditor).await;
        assert!(!result.success);
        assert_eq!(exec.calls(), vec![("t".to_string(), "prompt".to_string(), Role::Auditor)]);
        exec.switch_role(Role::Cleaner).await;
        assert_eq!(exec.switches(), vec![Role::Cleaner]);
    }
}
