//! Static safety gate for generated code
//!
//! Scans code line by line for dangerous patterns before it is dispatched.
//! Comment lines (`#`, `//`) are skipped. Each finding adds its severity
//! weight to a risk level capped at 10; code is safe when the risk is at
//! most 3 and nothing critical was found.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Highest risk level a report can carry
pub const MAX_RISK: u32 = 10;

/// Risk above which code is rejected
pub const SAFE_RISK_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 4,
            Severity::Critical => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Destructive,
    Network,
    PrivilegeEscalation,
    Obfuscation,
    ResourceAbuse,
    DataLeak,
    Injection,
}

impl FindingKind {
    pub fn recommendation(&self) -> &'static str {
        match self {
            FindingKind::Destructive => "Remove destructive commands or replace them with safe equivalents.",
            FindingKind::Network => "Remove network calls or run in a sandbox without network access.",
            FindingKind::PrivilegeEscalation => "Remove privilege escalation commands.",
            FindingKind::Obfuscation => "Replace obfuscated code with a readable equivalent.",
            FindingKind::ResourceAbuse => "Add resource limits (timeouts, caps).",
            FindingKind::DataLeak => "Read secrets from the environment instead of hardcoding them.",
            FindingKind::Injection => "Pass argument vectors to subprocesses instead of shell strings.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub description: String,
    /// 1-based
    pub line: usize,
    pub snippet: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub risk_level: u32,
    pub findings: Vec<Finding>,
    pub summary: String,
}

impl SafetyReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

/// Verdict on a piece of code
pub trait SafetyGate: Send + Sync {
    fn analyze(&self, code: &str) -> SafetyReport;
}

struct Pattern {
    regex: Regex,
    kind: FindingKind,
    severity: Severity,
    description: &'static str,
}

const PATTERNS: &[(&str, FindingKind, Severity, &str)] = &[
    (r"rm\s+(-rf?|--recursive)\s+/", FindingKind::Destructive, Severity::Critical, "Removes the root filesystem"),
    (r"rm\s+(-rf?|--recursive)\s+~", FindingKind::Destructive, Severity::High, "Removes the home directory"),
    (r"mkfs\.", FindingKind::Destructive, Severity::Critical, "Formats a filesystem"),
    (r"dd\s+if=.*of=/dev/", FindingKind::Destructive, Severity::Critical, "Writes to a block device"),
    (r":\(\)\{\s*:\|:\s*&\s*\};:", FindingKind::ResourceAbuse, Severity::Critical, "Fork bomb"),
    (r"curl\s+.*\|\s*(bash|sh|python)", FindingKind::Network, Severity::Critical, "Downloads and runs a remote script"),
    (r"wget\s+.*&&.*\s*(bash|sh|chmod)", FindingKind::Network, Severity::Critical, "Downloads and runs a remote file"),
    (r"(nc|ncat|netcat)\s+(-e|-c|--exec)", FindingKind::Network, Severity::Critical, "Netcat reverse shell"),
    (r"socket\.connect\(", FindingKind::Network, Severity::Medium, "Opens a network connection"),
    (r"requests\.(get|post|put|delete)\(", FindingKind::Network, Severity::Low, "HTTP request via requests"),
    (r"urllib\.request", FindingKind::Network, Severity::Low, "HTTP request via urllib"),
    (r"sudo\s+", FindingKind::PrivilegeEscalation, Severity::High, "Runs with elevated privileges"),
    (r"chmod\s+777", FindingKind::PrivilegeEscalation, Severity::High, "Opens a file to everyone"),
    (r"chown\s+root", FindingKind::PrivilegeEscalation, Severity::High, "Hands ownership to root"),
    (r"/etc/shadow", FindingKind::DataLeak, Severity::Critical, "Reads the password hash file"),
    (r"/etc/passwd", FindingKind::DataLeak, Severity::Medium, "Reads the user database"),
    (r"eval\(.*compile\(", FindingKind::Obfuscation, Severity::High, "Compiles and evaluates code at runtime"),
    (r"exec\(.*base64", FindingKind::Obfuscation, Severity::Critical, "Executes base64-encoded code"),
    (r"__import__\(", FindingKind::Obfuscation, Severity::Medium, "Dynamic module import"),
    (r"\\x[0-9a-f]{2}\\x[0-9a-f]{2}\\x[0-9a-f]{2}", FindingKind::Obfuscation, Severity::Medium, "Hex-escaped strings"),
    (r"while\s+(True|1)\s*:", FindingKind::ResourceAbuse, Severity::Low, "Unbounded loop"),
    (r"os\.fork\(\)", FindingKind::ResourceAbuse, Severity::High, "Forks the process"),
    (r"multiprocessing\.Pool\(\d{3,}", FindingKind::ResourceAbuse, Severity::Medium, "Very large process pool"),
    (r#"(API_KEY|SECRET|PASSWORD|TOKEN)\s*=\s*['"]"#, FindingKind::DataLeak, Severity::High, "Hardcoded secret"),
    (r"\.env", FindingKind::DataLeak, Severity::Low, "Reads an environment file"),
    (r"os\.system\(", FindingKind::Injection, Severity::Medium, "Runs a shell command via os.system"),
    (r"subprocess\.(call|run|Popen)\(.*shell\s*=\s*True", FindingKind::Injection, Severity::High, "Subprocess with shell=True"),
];

/// Regex-based `SafetyGate`
pub struct PatternScanner {
    patterns: Vec<Pattern>,
}

impl Default for PatternScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternScanner {
    /// Compile the built-in patterns, case-insensitively.
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .filter_map(|(source, kind, severity, description)| {
                match Regex::new(&format!("(?i){}", source)) {
                    Ok(regex) => Some(Pattern {
                        regex,
                        kind: *kind,
                        severity: *severity,
                        description,
                    }),
                    Err(e) => {
                        log::warn!("Skipping invalid safety pattern {:?}: {}", source, e);
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('#') || trimmed.starts_with("//")
}

fn snippet(line: &str) -> String {
    line.trim().chars().take(200).collect()
}

impl SafetyGate for PatternScanner {
    fn analyze(&self, code: &str) -> SafetyReport {
        let mut findings = Vec::new();
        for pattern in &self.patterns {
            for (index, line) in code.lines().enumerate() {
                if is_comment(line) || !pattern.regex.is_match(line) {
                    continue;
                }
                findings.push(Finding {
                    kind: pattern.kind,
                    severity: pattern.severity,
                    description: pattern.description.to_string(),
                    line: index + 1,
                    snippet: snippet(line),
                    recommendation: pattern.kind.recommendation().to_string(),
                });
            }
        }

        let risk_level = findings.iter().map(|f| f.severity.weight()).sum::<u32>().min(MAX_RISK);
        let has_critical = findings.iter().any(|f| f.severity == Severity::Critical);
        let safe = risk_level <= SAFE_RISK_LIMIT && !has_critical;

        let summary = if findings.is_empty() {
            "No dangerous patterns found".to_string()
        } else if safe {
            format!("{} low-risk warning(s)", findings.len())
        } else {
            let critical = findings.iter().filter(|f| f.severity == Severity::Critical).count();
            let high = findings.iter().filter(|f| f.severity == Severity::High).count();
            format!("BLOCKED: {} critical, {} high severity finding(s)", critical, high)
        };

        if !safe {
            log::warn!("Code blocked (risk {}): {}", risk_level, summary);
        }

        SafetyReport {
            safe,
            risk_level,
            findings,
            summary,
        }
    }
}
