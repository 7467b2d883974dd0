//! Disk usage via `df`

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::{Result, TollgateError};

#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub mount_point: PathBuf,
}

impl DiskUsage {
    pub fn usage_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Usage of the filesystem holding `path`.
pub async fn check_usage(path: &Path) -> Result<DiskUsage> {
    let output = Command::new("df")
        .args(["-B1", "--output=size,used,avail,target"])
        .arg(path)
        .output()
        .await
        .map_err(|e| TollgateError::Monitor(format!("Failed to run df: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TollgateError::Monitor(format!("df failed: {}", stderr.trim())));
    }

    parse_df_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parse the output of `df -B1 --output=size,used,avail,target`.
pub fn parse_df_output(output: &str) -> Result<DiskUsage> {
    let data_line = output
        .lines()
        .nth(1)
        .ok_or_else(|| TollgateError::Monitor("Unexpected df output format".to_string()))?;

    let parts: Vec<&str> = data_line.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(TollgateError::Monitor(
            "Unexpected df output format: not enough columns".to_string(),
        ));
    }

    let number = |s: &str, what: &str| -> Result<u64> {
        s.parse()
            .map_err(|_| TollgateError::Monitor(format!("Failed to parse {} from {:?}", what, s)))
    };

    Ok(DiskUsage {
        total_bytes: number(parts[0], "total bytes")?,
        used_bytes: number(parts[1], "used bytes")?,
        available_bytes: number(parts[2], "available bytes")?,
        mount_point: PathBuf::from(parts[3]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_df_output() {
        let output = "     1B-blocks         Used        Avail Mounted on\n100000000000  25000000000  75000000000 /\n";
        let usage = parse_df_output(output).unwrap();
        assert_eq!(usage.total_bytes, 100_000_000_000);
        assert_eq!(usage.mount_point, PathBuf::from("/"));
        assert!((usage.usage_percent() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_df_output_header_only() {
        assert!(parse_df_output("1B-blocks Used Avail Mounted on\n").is_err());
    }

    #[test]
    fn test_parse_df_output_bad_number() {
        assert!(parse_df_output("h\nabc 1 2 /\n").is_err());
    }

    #[test]
    fn test_usage_percent_empty_disk() {
        let usage = DiskUsage {
            total_bytes: 0,
            used_bytes: 0,
            available_bytes: 0,
            mount_point: PathBuf::from("/"),
        };
        assert_eq!(usage.usage_percent(), 0.0);
    }
}
