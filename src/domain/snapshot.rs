//! Point-in-time resource reading used for admission decisions.

use serde::{Deserialize, Serialize};

/// RAM usage above which the system is critical (percent).
pub const RAM_CRITICAL_PCT: f64 = 90.0;
/// RAM usage above which the system is in warning (percent).
pub const RAM_WARNING_PCT: f64 = 80.0;
/// CPU temperature above which the system is critical (Celsius).
pub const TEMP_CRITICAL_C: f64 = 85.0;
/// CPU temperature above which the system is in warning (Celsius).
pub const TEMP_WARNING_C: f64 = 75.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu_percent: f64,
    pub ram_percent: f64,
    pub ram_total_mb: f64,
    pub ram_available_mb: f64,
    pub disk_percent: f64,
    pub cpu_temp_celsius: Option<f64>,
    pub load_avg: [f64; 3],
}

impl SystemSnapshot {
    pub fn is_critical(&self) -> bool {
        self.ram_percent > RAM_CRITICAL_PCT || self.cpu_temp_celsius.is_some_and(|t| t > TEMP_CRITICAL_C)
    }

    pub fn is_warning(&self) -> bool {
        self.ram_percent > RAM_WARNING_PCT || self.cpu_temp_celsius.is_some_and(|t| t > TEMP_WARNING_C)
    }

    pub fn ram_available_gb(&self) -> f64 {
        self.ram_available_mb / 1024.0
    }

    /// A quiet machine, handy as a base for tests and dry runs.
    pub fn idle() -> Self {
        Self {
            cpu_percent: 5.0,
            ram_percent: 25.0,
            ram_total_mb: 16384.0,
            ram_available_mb: 12288.0,
            disk_percent: 40.0,
            cpu_temp_celsius: Some(45.0),
            load_avg: [0.1, 0.1, 0.1],
        }
    }
}
