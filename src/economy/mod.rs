//! Unit economy: deterministic task cost and feasibility
//!
//! Cost is expressed in abstract units:
//! `ram_gb * RAM_COEFF * time_sec * TIME_COEFF + cpu_pct * CPU_COEFF`.
//! Feasibility compares a task profile against what the current snapshot
//! leaves free, keeping a safety margin in reserve.

use serde::{Deserialize, Serialize};

use crate::domain::SystemSnapshot;

pub const RAM_COEFF: f64 = 1.0;
pub const CPU_COEFF: f64 = 0.5;
pub const TIME_COEFF: f64 = 0.1;

/// Share of free resources a single task may claim.
pub const SAFETY_MARGIN: f64 = 0.85;

/// Name of the fallback profile
pub const DEFAULT_PROFILE: &str = "default";

/// Approximate resource needs of one task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskProfile {
    pub ram_gb: f64,
    pub cpu_pct: f64,
    pub time_sec: f64,
}

impl TaskProfile {
    pub const fn new(ram_gb: f64, cpu_pct: f64, time_sec: f64) -> Self {
        Self { ram_gb, cpu_pct, time_sec }
    }

    pub fn units(&self) -> f64 {
        calculate_units(self.ram_gb, self.cpu_pct, self.time_sec)
    }
}

const PROFILES: [(&str, TaskProfile); 6] = [
    ("llm_inference_1.5b", TaskProfile::new(1.5, 60.0, 15.0)),
    ("llm_inference_8b", TaskProfile::new(5.0, 90.0, 60.0)),
    ("code_analysis", TaskProfile::new(0.5, 30.0, 10.0)),
    ("docker_operation", TaskProfile::new(0.3, 20.0, 5.0)),
    ("cleanup", TaskProfile::new(0.1, 10.0, 3.0)),
    (DEFAULT_PROFILE, TaskProfile::new(1.0, 40.0, 30.0)),
];

/// Built-in profiles in table order.
pub fn profiles() -> &'static [(&'static str, TaskProfile)] {
    &PROFILES
}

/// Profile for a task type, falling back to `default` for unknown types.
pub fn profile_for(task_type: &str) -> TaskProfile {
    PROFILES
        .iter()
        .find(|(name, _)| *name == task_type)
        .or_else(|| PROFILES.iter().find(|(name, _)| *name == DEFAULT_PROFILE))
        .map(|(_, profile)| *profile)
        .unwrap_or(TaskProfile::new(1.0, 40.0, 30.0))
}

pub fn calculate_units(ram_gb: f64, cpu_pct: f64, time_sec: f64) -> f64 {
    ram_gb * RAM_COEFF * time_sec * TIME_COEFF + cpu_pct * CPU_COEFF
}

/// Why a profile cannot run right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostReason {
    SystemCritical,
    InsufficientRam { needed_gb: f64, available_gb: f64 },
    InsufficientCpu { needed_pct: f64, available_pct: f64 },
}

impl CostReason {
    /// Machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CostReason::SystemCritical => "SYSTEM_CRITICAL",
            CostReason::InsufficientRam { .. } | CostReason::InsufficientCpu { .. } => "INSUFFICIENT_FUNDS",
        }
    }
}

impl std::fmt::Display for CostReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CostReason::SystemCritical => write!(f, "{}: system is in a critical state", self.code()),
            CostReason::InsufficientRam { needed_gb, available_gb } => write!(
                f,
                "{}: needs {:.1} GB RAM, {:.1} GB available",
                self.code(),
                needed_gb,
                available_gb
            ),
            CostReason::InsufficientCpu { needed_pct, available_pct } => write!(
                f,
                "{}: needs {:.0}% CPU, {:.0}% available",
                self.code(),
                needed_pct,
                available_pct
            ),
        }
    }
}

/// Cost and feasibility of one task against one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCost {
    pub ram_gb: f64,
    pub cpu_pct: f64,
    pub time_sec: f64,
    pub total_units: f64,
    pub feasible: bool,
    pub reason: Option<CostReason>,
}

impl TaskCost {
    /// Compact form for audit records
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "ram_gb": self.ram_gb,
            "cpu_pct": self.cpu_pct,
            "time_sec": self.time_sec,
            "total_units": (self.total_units * 100.0).round() / 100.0,
            "feasible": self.feasible,
            "reason": self.reason.as_ref().map(|r| r.to_string()),
        })
    }
}

/// Price a task type and check it fits in what the snapshot leaves free.
///
/// A `custom` profile replaces the table lookup. A critical snapshot makes
/// every profile infeasible.
pub fn estimate_task_cost(task_type: &str, snapshot: &SystemSnapshot, custom: Option<TaskProfile>) -> TaskCost {
    let profile = custom.unwrap_or_else(|| profile_for(task_type));
    let total_units = profile.units();

    let safe_ram = snapshot.ram_available_gb() * SAFETY_MARGIN;
    let safe_cpu = (100.0 - snapshot.cpu_percent) * SAFETY_MARGIN;

    let reason = if snapshot.is_critical() {
        Some(CostReason::SystemCritical)
    } else if profile.ram_gb > safe_ram {
        Some(CostReason::InsufficientRam {
            needed_gb: profile.ram_gb,
            available_gb: safe_ram,
        })
    } else if profile.cpu_pct > safe_cpu {
        Some(CostReason::InsufficientCpu {
            needed_pct: profile.cpu_pct,
            available_pct: safe_cpu,
        })
    } else {
        None
    };

    match &reason {
        Some(r) => log::warn!("Task type {} rejected: {}", task_type, r),
        None => log::debug!("Task type {}: {:.1} units, feasible", task_type, total_units),
    }

    TaskCost {
        ram_gb: profile.ram_gb,
        cpu_pct: profile.cpu_pct,
        time_sec: profile.time_sec,
        total_units,
        feasible: reason.is_none(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, ram: f64, available_mb: f64) -> SystemSnapshot {
        SystemSnapshot {
            cpu_percent: cpu,
            ram_percent: ram,
            ram_available_mb: available_mb,
            ..SystemSnapshot::idle()
        }
    }

    #[test]
    fn test_calculate_units_formula() {
        // 1.0 * 1.0 * 30 * 0.1 + 40 * 0.5
        assert!((calculate_units(1.0, 40.0, 30.0) - 23.0).abs() < 1e-9);
        assert_eq!(calculate_units(0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_units_are_deterministic() {
        for (_, profile) in profiles() {
            assert_eq!(profile.units(), profile.units());
        }
    }

    #[test]
    fn test_units_monotonic_in_each_input() {
        let base = calculate_units(1.0, 40.0, 30.0);
        assert!(calculate_units(2.0, 40.0, 30.0) > base);
        assert!(calculate_units(1.0, 50.0, 30.0) > base);
        assert!(calculate_units(1.0, 40.0, 60.0) > base);
    }

    #[test]
    fn test_unknown_type_uses_default_profile() {
        assert_eq!(profile_for("mystery"), profile_for(DEFAULT_PROFILE));
        assert_eq!(profile_for("cleanup"), TaskProfile::new(0.1, 10.0, 3.0));
    }

    #[test]
    fn test_feasible_on_idle_system() {
        let cost = estimate_task_cost("docker_operation", &SystemSnapshot::idle(), None);
        assert!(cost.feasible);
        assert!(cost.reason.is_none());
        assert!((cost.total_units - (0.3 * 5.0 * 0.1 + 10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_system_critical_for_every_profile() {
        let critical = snapshot(10.0, 95.0, 12_000.0);
        for (name, _) in profiles() {
            let cost = estimate_task_cost(name, &critical, None);
            assert!(!cost.feasible, "{} should be infeasible", name);
            assert_eq!(cost.reason.as_ref().map(CostReason::code), Some("SYSTEM_CRITICAL"));
        }
    }

    #[test]
    fn test_insufficient_ram() {
        // 4 GB free -> 3.4 GB safe; the 8b profile needs 5 GB
        let snap = snapshot(10.0, 50.0, 4096.0);
        let cost = estimate_task_cost("llm_inference_8b", &snap, None);
        assert!(!cost.feasible);
        assert!(matches!(cost.reason, Some(CostReason::InsufficientRam { .. })));
        assert_eq!(cost.reason.unwrap().code(), "INSUFFICIENT_FUNDS");
    }

    #[test]
    fn test_insufficient_cpu() {
        // 60% busy -> 34% safe; default needs 40%
        let snap = snapshot(60.0, 50.0, 12_000.0);
        let cost = estimate_task_cost("default", &snap, None);
        assert!(matches!(cost.reason, Some(CostReason::InsufficientCpu { .. })));
    }

    #[test]
    fn test_custom_profile_overrides_table() {
        let custom = TaskProfile::new(0.0, 0.0, 0.0);
        let cost = estimate_task_cost("llm_inference_8b", &SystemSnapshot::idle(), Some(custom));
        assert_eq!(cost.total_units, 0.0);
        assert_eq!(cost.ram_gb, 0.0);
    }

    #[test]
    fn test_reason_display_carries_code() {
        let reason = CostReason::InsufficientRam {
            needed_gb: 5.0,
            available_gb: 3.4,
        };
        assert!(reason.to_string().starts_with("INSUFFICIENT_FUNDS:"));
    }

    #[test]
    fn test_to_json_rounds_units() {
        let cost = estimate_task_cost("default", &SystemSnapshot::idle(), None);
        let json = cost.to_json();
        assert_eq!(json["total_units"], serde_json::json!(23.0));
        assert_eq!(json["reason"], serde_json::Value::Null);
    }
}
