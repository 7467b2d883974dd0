//! Parsers for the Linux `/proc` and `/sys` files the monitor reads

use crate::error::{Result, TollgateError};

/// Values from `/proc/meminfo`, in kB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        (self.total_kb.saturating_sub(self.available_kb)) as f64 / self.total_kb as f64 * 100.0
    }

    pub fn total_mb(&self) -> f64 {
        self.total_kb as f64 / 1024.0
    }

    pub fn available_mb(&self) -> f64 {
        self.available_kb as f64 / 1024.0
    }
}

pub fn parse_meminfo(text: &str) -> Result<MemInfo> {
    let field = |name: &str| -> Option<u64> {
        text.lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse().ok())
    };

    let total_kb = field("MemTotal").ok_or_else(|| TollgateError::Monitor("meminfo: no MemTotal".to_string()))?;
    // Kernels before 3.14 have no MemAvailable
    let available_kb = match field("MemAvailable") {
        Some(available) => available,
        None => field("MemFree").unwrap_or(0) + field("Buffers").unwrap_or(0) + field("Cached").unwrap_or(0),
    };

    Ok(MemInfo { total_kb, available_kb })
}

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

pub fn parse_cpu_times(text: &str) -> Result<CpuTimes> {
    let line = text
        .lines()
        .find(|line| line.starts_with("cpu "))
        .ok_or_else(|| TollgateError::Monitor("stat: no aggregate cpu line".to_string()))?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|v| v.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| TollgateError::Monitor(format!("stat: {}", e)))?;

    if values.len() < 4 {
        return Err(TollgateError::Monitor("stat: too few cpu columns".to_string()));
    }

    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Ok(CpuTimes {
        idle,
        total: values.iter().sum(),
    })
}

/// Busy percentage between two samples
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> f64 {
    let total = after.total.saturating_sub(before.total);
    if total == 0 {
        return 0.0;
    }
    let idle = after.idle.saturating_sub(before.idle);
    (total.saturating_sub(idle)) as f64 / total as f64 * 100.0
}

pub fn parse_loadavg(text: &str) -> Result<[f64; 3]> {
    let mut parts = text.split_whitespace().map(str::parse::<f64>);
    let mut load = [0.0; 3];
    for slot in &mut load {
        *slot = parts
            .next()
            .and_then(|p| p.ok())
            .ok_or_else(|| TollgateError::Monitor(format!("loadavg: malformed {:?}", text.trim())))?;
    }
    Ok(load)
}

/// Thermal zone reading in millidegrees to Celsius
pub fn parse_thermal(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().map(|milli| milli / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:       16384000 kB\nMemFree:         2048000 kB\nMemAvailable:    4096000 kB\nBuffers:          100000 kB\nCached:          1000000 kB\n";

    #[test]
    fn test_parse_meminfo() {
        let info = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(info.total_kb, 16_384_000);
        assert_eq!(info.available_kb, 4_096_000);
        assert!((info.used_percent() - 75.0).abs() < 1e-9);
        assert!((info.available_mb() - 4000.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_meminfo_without_available() {
        let text = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 250 kB\n";
        let info = parse_meminfo(text).unwrap();
        assert_eq!(info.available_kb, 400);
    }

    #[test]
    fn test_parse_meminfo_requires_total() {
        assert!(parse_meminfo("MemFree: 1 kB\n").is_err());
    }

    #[test]
    fn test_parse_cpu_times_and_percent() {
        let before = parse_cpu_times("cpu  100 0 100 700 100 0 0 0 0 0\ncpu0 1 2 3 4\n").unwrap();
        assert_eq!(before, CpuTimes { idle: 800, total: 1000 });

        let after = parse_cpu_times("cpu  200 0 200 750 150 0 0 0 0 0\n").unwrap();
        // 300 jiffies elapsed, 100 idle
        let pct = cpu_percent(before, after);
        assert!((pct - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_cpu_percent_without_progress_is_zero() {
        let t = CpuTimes { idle: 5, total: 10 };
        assert_eq!(cpu_percent(t, t), 0.0);
    }

    #[test]
    fn test_parse_cpu_times_rejects_garbage() {
        assert!(parse_cpu_times("intr 1 2 3\n").is_err());
        assert!(parse_cpu_times("cpu  a b c d\n").is_err());
    }

    #[test]
    fn test_parse_loadavg() {
        let load = parse_loadavg("0.52 0.58 0.59 1/389 12345\n").unwrap();
        assert_eq!(load, [0.52, 0.58, 0.59]);
        assert!(parse_loadavg("0.1\n").is_err());
    }

    #[test]
    fn test_parse_thermal() {
        assert_eq!(parse_thermal("45000\n"), Some(45.0));
        assert_eq!(parse_thermal("n/a"), None);
    }
}
