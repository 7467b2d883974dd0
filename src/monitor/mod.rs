//! Resource snapshots
//!
//! `ResourceProvider` is what the scheduler asks for a fresh snapshot each
//! cycle. `SystemMonitor` reads Linux `/proc` and `/sys` and runs `df`;
//! `FixedSnapshot` returns whatever it was last given.

pub mod disk;
pub mod procfs;

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::SystemSnapshot;
use crate::error::{Result, TollgateError};

#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn snapshot(&self) -> Result<SystemSnapshot>;
}

/// Linux snapshot provider
#[derive(Debug, Clone)]
pub struct SystemMonitor {
    proc_root: PathBuf,
    thermal_root: PathBuf,
    disk_path: PathBuf,
    cpu_sample: Duration,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self {
            proc_root: PathBuf::from("/proc"),
            thermal_root: PathBuf::from("/sys/class/thermal"),
            disk_path: PathBuf::from("/"),
            cpu_sample: Duration::from_millis(500),
        }
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from a different proc/sys tree (containers, tests).
    pub fn with_roots(mut self, proc_root: impl Into<PathBuf>, thermal_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self.thermal_root = thermal_root.into();
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    pub fn with_cpu_sample(mut self, sample: Duration) -> Self {
        self.cpu_sample = sample;
        self
    }

    async fn read_proc(&self, name: &str) -> Result<String> {
        let path = self.proc_root.join(name);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| TollgateError::Monitor(format!("{}: {}", path.display(), e)))
    }

    async fn cpu_percent(&self) -> Result<f64> {
        let before = procfs::parse_cpu_times(&self.read_proc("stat").await?)?;
        tokio::time::sleep(self.cpu_sample).await;
        let after = procfs::parse_cpu_times(&self.read_proc("stat").await?)?;
        Ok(procfs::cpu_percent(before, after))
    }

    /// Hottest thermal zone, if any is readable
    async fn cpu_temperature(&self) -> Option<f64> {
        let mut entries = tokio::fs::read_dir(&self.thermal_root).await.ok()?;
        let mut hottest: Option<f64> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_name().to_string_lossy().starts_with("thermal_zone") {
                continue;
            }
            let Ok(text) = tokio::fs::read_to_string(entry.path().join("temp")).await else {
                continue;
            };
            if let Some(temp) = procfs::parse_thermal(&text) {
                hottest = Some(hottest.map_or(temp, |h| h.max(temp)));
            }
        }
        hottest
    }
}

#[async_trait]
impl ResourceProvider for SystemMonitor {
    async fn snapshot(&self) -> Result<SystemSnapshot> {
        let mem = procfs::parse_meminfo(&self.read_proc("meminfo").await?)?;
        let cpu_percent = self.cpu_percent().await?;

        let load_avg = match self.read_proc("loadavg").await.and_then(|t| procfs::parse_loadavg(&t)) {
            Ok(load) => load,
            Err(e) => {
                log::warn!("Load average unavailable: {}", e);
                [0.0; 3]
            }
        };

        let disk_percent = match disk::check_usage(&self.disk_path).await {
            Ok(usage) => usage.usage_percent(),
            Err(e) => {
                log::warn!("Disk usage unavailable: {}", e);
                0.0
            }
        };

        Ok(SystemSnapshot {
            cpu_percent,
            ram_percent: mem.used_percent(),
            ram_total_mb: mem.total_mb(),
            ram_available_mb: mem.available_mb(),
            disk_percent,
            cpu_temp_celsius: self.cpu_temperature().await,
            load_avg,
        })
    }
}

/// Provider that returns a preset snapshot; swap it between cycles with `set`
pub struct FixedSnapshot {
    snapshot: Mutex<SystemSnapshot>,
    reads: AtomicUsize,
}

impl FixedSnapshot {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            reads: AtomicUsize::new(0),
        }
    }

    pub fn idle() -> Self {
        Self::new(SystemSnapshot::idle())
    }

    /// Idle apart from RAM usage
    pub fn with_ram_percent(ram_percent: f64) -> Self {
        Self::new(SystemSnapshot {
            ram_percent,
            ..SystemSnapshot::idle()
        })
    }

    pub fn set(&self, snapshot: SystemSnapshot) {
        if let Ok(mut current) = self.snapshot.lock() {
            *current = snapshot;
        }
    }

    /// How many snapshots were taken
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvider for FixedSnapshot {
    async fn snapshot(&self) -> Result<SystemSnapshot> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.snapshot
            .lock()
            .map(|s| s.clone())
            .map_err(|_| TollgateError::Monitor("snapshot lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let proc_root = dir.path().join("proc");
        std::fs::create_dir_all(&proc_root).unwrap();
        std::fs::write(
            proc_root.join("meminfo"),
            "MemTotal: 8000000 kB\nMemAvailable: 2000000 kB\n",
        )
        .unwrap();
        std::fs::write(proc_root.join("stat"), "cpu  10 0 10 80 0 0 0 0\n").unwrap();
        std::fs::write(proc_root.join("loadavg"), "1.00 0.50 0.25 1/100 42\n").unwrap();

        let thermal = dir.path().join("thermal");
        for (zone, temp) in [("thermal_zone0", "41000"), ("thermal_zone1", "67500")] {
            std::fs::create_dir_all(thermal.join(zone)).unwrap();
            std::fs::write(thermal.join(zone).join("temp"), temp).unwrap();
        }
        std::fs::create_dir_all(thermal.join("cooling_device0")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_snapshot_from_fake_tree() {
        let dir = fake_tree();
        let monitor = SystemMonitor::new()
            .with_roots(dir.path().join("proc"), dir.path().join("thermal"))
            .with_disk_path(dir.path())
            .with_cpu_sample(Duration::from_millis(1));

        let snap = monitor.snapshot().await.unwrap();
        assert!((snap.ram_percent - 75.0).abs() < 1e-9);
        // identical samples: no progress
        assert_eq!(snap.cpu_percent, 0.0);
        assert_eq!(snap.load_avg, [1.0, 0.5, 0.25]);
        assert_eq!(snap.cpu_temp_celsius, Some(67.5));
        assert!(!snap.is_critical());
    }

    #[tokio::test]
    async fn test_missing_meminfo_is_an_error() {
        let dir = TempDir::new().unwrap();
        let monitor = SystemMonitor::new()
            .with_roots(dir.path(), dir.path())
            .with_cpu_sample(Duration::from_millis(1));
        assert!(matches!(monitor.snapshot().await, Err(TollgateError::Monitor(_))));
    }

    #[tokio::test]
    async fn test_no_thermal_zones_means_no_temperature() {
        let dir = fake_tree();
        let monitor = SystemMonitor::new().with_roots(dir.path().join("proc"), dir.path().join("nothing"));
        assert_eq!(monitor.cpu_temperature().await, None);
    }

    #[tokio::test]
    async fn test_fixed_snapshot_counts_reads() {
        let provider = FixedSnapshot::with_ram_percent(95.0);
        assert!(provider.snapshot().await.unwrap().is_critical());
        provider.set(SystemSnapshot::idle());
        assert!(!provider.snapshot().await.unwrap().is_critical());
        assert_eq!(provider.reads(), 2);
    }
}
