//! Global configuration
//!
//! Loaded from an explicit path, .tollgate.yml or ~/.config/tollgate/tollgate.yml

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::{DEFAULT_STREAM_MAX_LEN, MemoryStore, SqliteStore, Store, TaskBus};
use crate::llm::OllamaConfig;
use crate::llm::ollama::DEFAULT_BASE_URL;
use crate::roles::{RoleOverride, RoleRegistry};
use crate::scheduler::{FALLBACK_COST, JobPlanner, RecurringJob, SchedulerConfig, default_jobs};
use crate::shift::ShiftConfig;

/// Global configuration for tollgate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Inference runtime settings.
    pub inference: InferenceConfig,

    /// Admission loop settings.
    pub scheduler: SchedulerSection,

    /// Bus backend.
    pub store: StoreConfig,

    pub shift: ShiftSection,

    /// Per-role overrides keyed by role name.
    pub roles: BTreeMap<String, RoleOverride>,

    /// Recurring job producer.
    pub jobs: JobsConfig,
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .tollgate.yml in current directory
    /// 3. ~/.config/tollgate/tollgate.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".tollgate.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .tollgate.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .tollgate.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tollgate").join("tollgate.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.inference.base_url.trim().is_empty() {
            eyre::bail!("inference.base-url must not be empty");
        }
        if self.inference.admin_model.trim().is_empty() {
            eyre::bail!("inference.admin-model must not be empty");
        }
        if !self.scheduler.initial_budget.is_finite() || self.scheduler.initial_budget < 0.0 {
            eyre::bail!("scheduler.initial-budget must be a non-negative number");
        }
        if self.scheduler.poll_interval_ms == 0 {
            eyre::bail!("scheduler.poll-interval-ms must be > 0");
        }
        if !self.scheduler.fallback_cost.is_finite() || self.scheduler.fallback_cost <= 0.0 {
            eyre::bail!("scheduler.fallback-cost must be > 0");
        }
        if self.store.stream_max_len == 0 {
            eyre::bail!("store.stream-max-len must be > 0");
        }
        if self.shift.history_limit == 0 {
            eyre::bail!("shift.history-limit must be > 0");
        }
        if self.jobs.check_interval_secs == 0 {
            eyre::bail!("jobs.check-interval-secs must be > 0");
        }
        if let Some(definitions) = &self.jobs.definitions
            && let Some(job) = definitions.iter().find(|j| j.interval_secs == 0)
        {
            eyre::bail!("jobs: interval-secs of {} must be > 0", job.name);
        }
        RoleRegistry::with_overrides(&self.roles).context("Invalid roles section")?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let s = &self.scheduler;
        SchedulerConfig {
            initial_budget: s.initial_budget,
            poll_interval: Duration::from_millis(s.poll_interval_ms),
            pop_timeout: Duration::from_millis(s.pop_timeout_ms),
            admin_model: self.inference.admin_model.clone(),
            estimate_timeout: Duration::from_secs(self.inference.estimate_timeout_secs),
            fallback_cost: s.fallback_cost,
            enforce_feasibility: s.enforce_feasibility,
            result_summary_chars: s.result_summary_chars,
            ..SchedulerConfig::default()
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        let i = &self.inference;
        OllamaConfig {
            base_url: i.base_url.clone(),
            generate_timeout: Duration::from_secs(i.generate_timeout_secs),
            tags_timeout: Duration::from_secs(i.tags_timeout_secs),
            health_timeout: Duration::from_secs(i.health_timeout_secs),
        }
    }

    pub fn shift_config(&self) -> ShiftConfig {
        ShiftConfig {
            history_limit: self.shift.history_limit,
            min_probe_chars: self.shift.min_probe_chars,
            probe_num_predict: self.shift.probe_num_predict,
            probe_timeout: Duration::from_secs(self.inference.generate_timeout_secs),
        }
    }

    pub fn role_registry(&self) -> Result<RoleRegistry> {
        RoleRegistry::with_overrides(&self.roles).context("Invalid roles section")
    }

    /// Planner over the configured jobs, or the built-in schedule.
    pub fn job_planner(&self) -> JobPlanner {
        JobPlanner::new(self.jobs.definitions.clone().unwrap_or_else(default_jobs))
    }

    /// Open the configured backend and wrap it in a bus.
    pub fn open_bus(&self) -> Result<TaskBus> {
        let store: Arc<dyn Store> = match self.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Sqlite => {
                let path = self.store.resolved_path();
                let store = SqliteStore::open(&path)
                    .context(format!("Failed to open store at {}", path.display()))?
                    .with_poll_interval(Duration::from_millis(self.store.poll_interval_ms));
                Arc::new(store)
            }
        };
        Ok(TaskBus::new(store).with_stream_max_len(self.store.stream_max_len))
    }
}

/// Inference runtime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct InferenceConfig {
    pub base_url: String,

    /// Model asked for cost estimates.
    pub admin_model: String,

    pub generate_timeout_secs: u64,
    pub tags_timeout_secs: u64,
    pub health_timeout_secs: u64,
    pub estimate_timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            admin_model: "qwen2.5:1.5b".to_string(),
            generate_timeout_secs: 300,
            tags_timeout_secs: 10,
            health_timeout_secs: 5,
            estimate_timeout_secs: 60,
        }
    }
}

/// Admission loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SchedulerSection {
    pub initial_budget: f64,
    pub poll_interval_ms: u64,
    pub pop_timeout_ms: u64,
    pub fallback_cost: f64,
    pub enforce_feasibility: bool,
    pub result_summary_chars: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            initial_budget: 1000.0,
            poll_interval_ms: 5000,
            pop_timeout_ms: 1000,
            fallback_cost: FALLBACK_COST,
            enforce_feasibility: false,
            result_summary_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

/// Bus backend settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// Database file; defaults to the local data directory.
    pub path: Option<PathBuf>,

    /// Entries kept per audit stream.
    pub stream_max_len: usize,

    /// How often a blocked pop re-checks the SQLite lists.
    pub poll_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: None,
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
            poll_interval_ms: 100,
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("tollgate")
                .join("tollgate.db")
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ShiftSection {
    pub history_limit: usize,
    pub min_probe_chars: usize,
    pub probe_num_predict: u32,
}

impl Default for ShiftSection {
    fn default() -> Self {
        let defaults = ShiftConfig::default();
        Self {
            history_limit: defaults.history_limit,
            min_probe_chars: defaults.min_probe_chars,
            probe_num_predict: defaults.probe_num_predict,
        }
    }
}

/// Recurring job producer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct JobsConfig {
    /// Run the producer alongside the loop.
    pub enabled: bool,

    pub check_interval_secs: u64,

    /// Replaces the built-in schedule when set.
    pub definitions: Option<Vec<RecurringJob>>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 60,
            definitions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = GlobalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.scheduler_config().initial_budget, 1000.0);
        assert_eq!(config.ollama_config().base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_load_from_file_with_kebab_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
inference:
  base-url: http://gpu-box:11434
  admin-model: tiny
scheduler:
  initial-budget: 250
  poll-interval-ms: 200
  enforce-feasibility: true
store:
  backend: memory
roles:
  auditor:
    model: custom-auditor
    temperature: 0.1
jobs:
  enabled: true
  definitions:
    - name: gc
      task-type: cleanup
      interval-secs: 120
"#
        )
        .unwrap();

        let config = GlobalConfig::load(Some(&file.path().to_path_buf())).unwrap();
        assert_eq!(config.inference.base_url, "http://gpu-box:11434");
        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.initial_budget, 250.0);
        assert_eq!(scheduler.poll_interval, Duration::from_millis(200));
        assert_eq!(scheduler.admin_model, "tiny");
        assert!(scheduler.enforce_feasibility);
        assert_eq!(config.store.backend, StoreBackend::Memory);

        let registry = config.role_registry().unwrap();
        assert_eq!(registry.get(crate::roles::Role::Auditor).unwrap().model, "custom-auditor");
        assert_eq!(config.job_planner().jobs().count(), 1);
    }

    #[test]
    fn test_unknown_role_override_rejected() {
        let mut config = GlobalConfig::default();
        config.roles.insert("janitor".to_string(), RoleOverride::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = GlobalConfig::default();
        config.scheduler.initial_budget = -1.0;
        assert!(config.validate().is_err());

        let mut config = GlobalConfig::default();
        config.shift.history_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let path = PathBuf::from("/nonexistent/tollgate.yml");
        assert!(GlobalConfig::load(Some(&path)).is_err());
    }

    #[tokio::test]
    async fn test_open_sqlite_bus_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GlobalConfig::default();
        config.store.path = Some(dir.path().join("bus.db"));
        let bus = config.open_bus().unwrap();
        assert!(bus.ping().await);
        assert!(dir.path().join("bus.db").exists());
    }
}
