//! ID and clock utilities for Tollgate
//!
//! Provides the wall-clock helpers used for task timestamps and stream entry
//! ids, and generators for task identifiers.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Get current timestamp in fractional seconds since Unix epoch
///
/// This is the unit of `Task::created_at` on the wire.
pub fn now_secs() -> f64 {
    now_ms() as f64 / 1000.0
}

/// Generate a unique task ID
///
/// Format: `task-{timestamp_ms}-{random_hex}`
/// Example: `task-1738300800123-a1b2c3d4`
pub fn generate_task_id() -> String {
    let random: u32 = rand::rng().random();
    format!("task-{}-{:08x}", now_ms(), random)
}

/// Generate the ID for a task produced by a recurring job
///
/// Format: `auto_{job_name}_{unix_secs}`
pub fn recurring_task_id(job_name: &str, unix_secs: u64) -> String {
    format!("auto_{}_{}", job_name, unix_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_now_secs_matches_ms() {
        let secs = now_secs();
        let ms = now_ms();
        assert!((ms as f64 / 1000.0 - secs).abs() < 5.0);
    }

    #[test]
    fn test_generate_task_id_format() {
        let id = generate_task_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "task");
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_task_id_uniqueness() {
        let id1 = generate_task_id();
        let id2 = generate_task_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_recurring_task_id() {
        assert_eq!(
            recurring_task_id("log_cleanup", 1738300800),
            "auto_log_cleanup_1738300800"
        );
    }
}
