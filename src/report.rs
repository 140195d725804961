use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use thiserror::Error;

pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

const WARNING_PERCENT: f64 = 80.0;
const CRITICAL_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub timestamp: String,
    #[serde(default)]
    pub system_info: SystemInfo,
    #[serde(default)]
    pub disk_health: BTreeMap<String, DiskEntry>,
    #[serde(default)]
    pub memory_health: Option<MemoryEntry>,
    #[serde(default)]
    pub cpu_health: Option<CpuEntry>,
    #[serde(default)]
    pub network_health: Option<NetworkEntry>,
    #[serde(default)]
    pub process_health: Option<ProcessEntry>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
}

/// One mounted partition. Capacity fields are absent when the partition
/// could not be measured (`access_denied` or `error: ...`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEntry {
    pub mountpoint: String,
    #[serde(default)]
    pub fstype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_gb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent_used: Option<f64>,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub percent_used: f64,
    pub swap_total_gb: f64,
    pub swap_used_gb: f64,
    pub swap_percent: f64,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuEntry {
    pub usage_percent: f64,
    pub cores: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_freq_mhz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_freq_mhz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_freq_mhz: Option<f64>,
    #[serde(default)]
    pub per_core_percent: Vec<f64>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperatures: Option<BTreeMap<String, TemperatureEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureEntry {
    pub current: f64,
    pub high: Option<f64>,
    pub critical: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub total_bytes_sent: u64,
    pub total_bytes_recv: u64,
    pub total_packets_sent: u64,
    pub total_packets_recv: u64,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceEntry>,
    pub localhost_connectivity: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    #[serde(default)]
    pub addresses: Vec<AddressEntry>,
    pub is_up: bool,
    pub speed_mbps: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressEntry {
    pub family: String,
    pub address: String,
    pub netmask: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub total_processes: usize,
    #[serde(default)]
    pub top_cpu_processes: Vec<CpuProcess>,
    #[serde(default)]
    pub top_memory_processes: Vec<MemoryProcess>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuProcess {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryProcess {
    pub pid: u32,
    pub name: String,
    pub memory_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Status {
    Healthy,
    Warning,
    Critical,
    AccessDenied,
    Error(String),
}

impl Status {
    /// Numeric form used by the metrics exporter: 0 healthy, 1 warning,
    /// 2 critical, 3 for anything that could not be measured.
    pub fn code(&self) -> u8 {
        match self {
            Status::Healthy => 0,
            Status::Warning => 1,
            Status::Critical => 2,
            Status::AccessDenied | Status::Error(_) => 3,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Healthy => f.write_str("healthy"),
            Status::Warning => f.write_str("warning"),
            Status::Critical => f.write_str("critical"),
            Status::AccessDenied => f.write_str("access_denied"),
            Status::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Status::Healthy),
            "warning" => Ok(Status::Warning),
            "critical" => Ok(Status::Critical),
            "access_denied" => Ok(Status::AccessDenied),
            other => other
                .strip_prefix("error: ")
                .map(|msg| Status::Error(msg.to_string()))
                .ok_or_else(|| format!("unknown status '{other}'")),
        }
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

/// Threshold policy shared by every domain.
pub fn classify(percent: f64) -> Status {
    if percent > CRITICAL_PERCENT {
        Status::Critical
    } else if percent > WARNING_PERCENT {
        Status::Warning
    } else {
        Status::Healthy
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn bytes_to_gb(bytes: u64) -> f64 {
    round2(bytes as f64 / BYTES_PER_GB)
}

pub fn percent_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Json,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to encode report as JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to encode report as YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to write report to {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Yaml => "yaml",
        }
    }

    pub fn render(self, report: &DiagnosticReport) -> Result<String, ReportError> {
        Ok(match self {
            ReportFormat::Json => serde_json::to_string_pretty(report)?,
            ReportFormat::Yaml => serde_yaml::to_string(report)?,
        })
    }
}

/// `diagnostic_report_<YYYYMMDD_HHMMSS>.<ext>`, UTC.
pub fn default_report_name(at: SystemTime, format: ReportFormat) -> String {
    let digits: String = humantime::format_rfc3339_seconds(at)
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    let (date, time) = digits.split_at(digits.len().min(8));
    format!("diagnostic_report_{date}_{time}.{}", format.extension())
}

impl DiagnosticReport {
    pub fn new(created_at: SystemTime) -> Self {
        Self {
            timestamp: humantime::format_rfc3339_seconds(created_at).to_string(),
            system_info: SystemInfo::default(),
            disk_health: BTreeMap::new(),
            memory_health: None,
            cpu_health: None,
            network_health: None,
            process_health: None,
            issues: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(0.0), Status::Healthy);
        assert_eq!(classify(80.0), Status::Healthy);
        assert_eq!(classify(80.01), Status::Warning);
        assert_eq!(classify(90.0), Status::Warning);
        assert_eq!(classify(90.01), Status::Critical);
        assert_eq!(classify(100.0), Status::Critical);
    }

    #[test]
    fn status_string_forms() {
        assert_eq!(Status::AccessDenied.to_string(), "access_denied");
        assert_eq!(
            Status::Error("device busy".to_string()).to_string(),
            "error: device busy"
        );
        assert_eq!(
            "error: device busy".parse::<Status>(),
            Ok(Status::Error("device busy".to_string()))
        );
        assert!("degraded".parse::<Status>().is_err());
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&Status::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let back: Status = serde_json::from_str("\"error: gone\"").unwrap();
        assert_eq!(back, Status::Error("gone".to_string()));
    }

    #[test]
    fn gb_and_percent_helpers() {
        assert_eq!(bytes_to_gb(0), 0.0);
        assert_eq!(bytes_to_gb(1024 * 1024 * 1024), 1.0);
        assert_eq!(bytes_to_gb(1536 * 1024 * 1024), 1.5);
        assert_eq!(percent_of(5, 0), 0.0);
        assert_eq!(percent_of(92, 100), 92.0);
        assert_eq!(round2(12.3456), 12.35);
    }

    #[test]
    fn new_report_is_empty_with_rfc3339_timestamp() {
        let report = DiagnosticReport::new(UNIX_EPOCH + Duration::from_secs(86_400));
        assert_eq!(report.timestamp, "1970-01-02T00:00:00Z");
        assert!(report.disk_health.is_empty());
        assert!(report.memory_health.is_none());
        assert!(!report.has_issues());
    }

    #[test]
    fn default_name_is_timestamped() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(
            default_report_name(at, ReportFormat::Json),
            "diagnostic_report_20231114_221320.json"
        );
        assert_eq!(
            default_report_name(at, ReportFormat::Yaml),
            "diagnostic_report_20231114_221320.yaml"
        );
    }

    #[test]
    fn yaml_rendering_keeps_field_names() {
        let mut report = DiagnosticReport::new(UNIX_EPOCH);
        report.issues.push("WARNING: Memory usage is 85.0%".to_string());
        let text = ReportFormat::Yaml.render(&report).unwrap();
        assert!(text.contains("timestamp:"));
        assert!(text.contains("memory_health: null"));
        let back: DiagnosticReport = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, report);
    }
}
