//! Execution roles
//!
//! Every task runs under one of five roles. A role pins the model the
//! inference runtime serves and the sampling settings used for it.
//!
//! Two lookups exist:
//! - `RoleTable::select` routes a task type by ordered keyword match
//! - `RoleRegistry::role_for_allowed_task` finds the role that lists a type exactly

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TollgateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sysadmin,
    Auditor,
    Economist,
    Cleaner,
    Emergency,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Sysadmin,
        Role::Auditor,
        Role::Economist,
        Role::Cleaner,
        Role::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Sysadmin => "sysadmin",
            Role::Auditor => "auditor",
            Role::Economist => "economist",
            Role::Cleaner => "cleaner",
            Role::Emergency => "emergency",
        }
    }
}

impl FromStr for Role {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TollgateError::UnknownRole(s.to_string()))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: Role,
    pub model: String,
    pub description: String,
    pub allowed_tasks: Vec<String>,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Handled ahead of the queue by operators
    pub priority_boost: bool,
}

impl RoleConfig {
    fn builtin(role: Role, description: &str, allowed: &[&str], temperature: f64) -> Self {
        Self {
            role,
            model: format!("worker-{}", role.as_str()),
            description: description.to_string(),
            allowed_tasks: allowed.iter().map(|s| s.to_string()).collect(),
            temperature,
            max_tokens: 4096,
            priority_boost: role == Role::Emergency,
        }
    }
}

/// Per-role overrides from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RoleOverride {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// All role settings, one entry per role
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: BTreeMap<Role, RoleConfig>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        let roles = [
            RoleConfig::builtin(
                Role::Sysadmin,
                "System administration: containers, network, filesystem, configuration",
                &["infra_setup", "docker_operation", "config_gen", "api_setup", "diagnostics"],
                0.2,
            ),
            RoleConfig::builtin(
                Role::Auditor,
                "Code review: static analysis, security checks, quality audits",
                &["code_analysis", "security_check", "quality_audit", "validation"],
                0.1,
            ),
            RoleConfig::builtin(
                Role::Economist,
                "Resource planning: cost estimates, forecasts, optimisation",
                &["cost_estimate", "resource_forecast", "optimization"],
                0.2,
            ),
            RoleConfig::builtin(
                Role::Cleaner,
                "Housekeeping: caches, logs, container garbage collection",
                &["cleanup", "gc", "log_rotation", "disk_analysis"],
                0.1,
            ),
            RoleConfig::builtin(
                Role::Emergency,
                "Incident response: freeze processes, cool down, report",
                &["emergency", "kill_process", "cooldown", "incident_report"],
                0.0,
            ),
        ];
        Self {
            roles: roles.into_iter().map(|c| (c.role, c)).collect(),
        }
    }
}

impl RoleRegistry {
    /// Built-in roles with overrides applied. Override keys must name a role.
    pub fn with_overrides(overrides: &BTreeMap<String, RoleOverride>) -> Result<Self> {
        let mut registry = Self::default();
        for (name, o) in overrides {
            let role: Role = name.parse()?;
            if let Some(config) = registry.roles.get_mut(&role) {
                if let Some(model) = &o.model {
                    config.model = model.clone();
                }
                if let Some(temperature) = o.temperature {
                    config.temperature = temperature;
                }
                if let Some(max_tokens) = o.max_tokens {
                    config.max_tokens = max_tokens;
                }
            }
        }
        Ok(registry)
    }

    pub fn get(&self, role: Role) -> Option<&RoleConfig> {
        self.roles.get(&role)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoleConfig> {
        self.roles.values()
    }

    /// Role whose allowed list names `task_type` exactly.
    pub fn role_for_allowed_task(&self, task_type: &str) -> Option<Role> {
        self.roles
            .values()
            .find(|c| c.allowed_tasks.iter().any(|t| t == task_type))
            .map(|c| c.role)
    }
}

/// Ordered keyword routing; the first keyword contained in the task type wins.
#[derive(Debug, Clone)]
pub struct RoleTable {
    entries: Vec<(String, Role)>,
    default: Role,
}

impl Default for RoleTable {
    fn default() -> Self {
        let entries = [
            ("sysadmin", Role::Sysadmin),
            ("docker", Role::Sysadmin),
            ("system", Role::Sysadmin),
            ("audit", Role::Auditor),
            ("security", Role::Auditor),
            ("review", Role::Auditor),
            ("economy", Role::Economist),
            ("cost", Role::Economist),
            ("clean", Role::Cleaner),
            ("garbage", Role::Cleaner),
            ("emergency", Role::Emergency),
            ("mchs", Role::Emergency),
        ];
        Self::new(
            entries.into_iter().map(|(k, r)| (k.to_string(), r)).collect(),
            Role::Sysadmin,
        )
    }
}

impl RoleTable {
    pub fn new(entries: Vec<(String, Role)>, default: Role) -> Self {
        let entries = entries.into_iter().map(|(k, r)| (k.to_lowercase(), r)).collect();
        Self { entries, default }
    }

    pub fn select(&self, task_type: &str) -> Role {
        let task_type = task_type.to_lowercase();
        self.entries
            .iter()
            .find(|(keyword, _)| task_type.contains(keyword.as_str()))
            .map_or(self.default, |(_, role)| *role)
    }

    pub fn entries(&self) -> &[(String, Role)] {
        &self.entries
    }

    pub fn default_role(&self) -> Role {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_routes_by_keyword() {
        let table = RoleTable::default();
        assert_eq!(table.select("docker_operation"), Role::Sysadmin);
        assert_eq!(table.select("security_scan"), Role::Auditor);
        assert_eq!(table.select("cost_estimate"), Role::Economist);
        assert_eq!(table.select("log_cleanup"), Role::Cleaner);
        assert_eq!(table.select("MCHS_alert"), Role::Emergency);
    }

    #[test]
    fn test_select_first_match_wins() {
        let table = RoleTable::default();
        // "system" precedes "audit" in the table
        assert_eq!(table.select("system_audit"), Role::Sysadmin);
        // "audit" precedes "cost"
        assert_eq!(table.select("cost_audit"), Role::Auditor);
    }

    #[test]
    fn test_select_falls_back_to_default() {
        let table = RoleTable::default();
        assert_eq!(table.select("resource_forecast"), Role::Sysadmin);
        assert_eq!(table.select(""), Role::Sysadmin);
    }

    #[test]
    fn test_custom_table_is_case_insensitive() {
        let table = RoleTable::new(vec![("GC".to_string(), Role::Cleaner)], Role::Auditor);
        assert_eq!(table.select("run_gc"), Role::Cleaner);
        assert_eq!(table.select("other"), Role::Auditor);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Auditor".parse::<Role>().unwrap(), Role::Auditor);
        assert!(matches!("janitor".parse::<Role>(), Err(TollgateError::UnknownRole(_))));
    }

    #[test]
    fn test_registry_defaults() {
        let registry = RoleRegistry::default();
        assert_eq!(registry.iter().count(), 5);
        let emergency = registry.get(Role::Emergency).unwrap();
        assert_eq!(emergency.model, "worker-emergency");
        assert!(emergency.priority_boost);
        assert_eq!(emergency.temperature, 0.0);
        assert!(!registry.get(Role::Cleaner).unwrap().priority_boost);
        assert!(registry.iter().all(|c| c.max_tokens == 4096));
    }

    #[test]
    fn test_role_for_allowed_task_is_exact() {
        let registry = RoleRegistry::default();
        assert_eq!(registry.role_for_allowed_task("resource_forecast"), Some(Role::Economist));
        assert_eq!(registry.role_for_allowed_task("cleanup"), Some(Role::Cleaner));
        assert_eq!(registry.role_for_allowed_task("cleanup_logs"), None);
    }

    #[test]
    fn test_overrides_apply() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "auditor".to_string(),
            RoleOverride {
                model: Some("qwen2.5-coder:1.5b".to_string()),
                temperature: None,
                max_tokens: Some(1024),
            },
        );
        let registry = RoleRegistry::with_overrides(&overrides).unwrap();
        let auditor = registry.get(Role::Auditor).unwrap();
        assert_eq!(auditor.model, "qwen2.5-coder:1.5b");
        assert_eq!(auditor.max_tokens, 1024);
        assert_eq!(auditor.temperature, 0.1);
    }

    #[test]
    fn test_override_for_unknown_role_is_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("janitor".to_string(), RoleOverride::default());
        assert!(RoleRegistry::with_overrides(&overrides).is_err());
    }
}
