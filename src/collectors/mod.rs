pub mod probe;
pub mod system;

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no longer present: {0}")]
    NotFound(String),
    #[error("not supported on this platform: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Unavailable(String),
    #[error(transparent)]
    Io(std::io::Error),
}

impl From<std::io::Error> for CollectError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => CollectError::PermissionDenied(err.to_string()),
            std::io::ErrorKind::NotFound => CollectError::NotFound(err.to_string()),
            _ => CollectError::Io(err),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostIdentity {
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub os_release: Option<String>,
    pub architecture: Option<String>,
    pub processor: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PartitionUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

#[derive(Debug)]
pub struct Partition {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
    pub usage: Result<PartitionUsage, CollectError>,
}

#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct CpuFrequency {
    pub current_mhz: f64,
    pub min_mhz: Option<f64>,
    pub max_mhz: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CpuSample {
    pub usage_percent: f64,
    pub logical_cores: usize,
    pub frequency: Option<CpuFrequency>,
}

#[derive(Debug, Clone)]
pub struct TemperatureReading {
    pub label: String,
    pub current: f64,
    pub high: Option<f64>,
    pub critical: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NetCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceAddress {
    pub family: String,
    pub address: String,
    pub netmask: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InterfaceInfo {
    pub name: String,
    pub addresses: Vec<InterfaceAddress>,
    pub is_up: bool,
    pub speed_mbps: u64,
}

#[derive(Debug, Clone)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DiskIoCounters {
    pub read_count: u64,
    pub write_count: u64,
    pub read_errors: Option<u64>,
    pub write_errors: Option<u64>,
}

/// Source of host metrics consumed by the diagnostic pipeline.
///
/// Domain-level failures come back as `Err`. Enumerations whose items can
/// fail independently (partitions, processes) carry a per-item `Result`.
pub trait MetricsProvider {
    fn host_identity(&mut self) -> Result<HostIdentity, CollectError>;

    fn partitions(&mut self) -> Result<Vec<Partition>, CollectError>;

    fn memory(&mut self) -> Result<MemoryStats, CollectError>;

    /// Aggregate utilisation measured over `window`; blocks for that long.
    fn sample_cpu(&mut self, window: Duration) -> Result<CpuSample, CollectError>;

    /// Per logical core utilisation measured over `window`.
    fn sample_cpu_per_core(&mut self, window: Duration) -> Result<Vec<f64>, CollectError>;

    fn temperatures(&mut self) -> Result<Vec<TemperatureReading>, CollectError>;

    fn net_counters(&mut self) -> Result<NetCounters, CollectError>;

    fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, CollectError>;

    /// Single-packet loopback reachability check, bounded by `timeout`.
    fn probe_loopback(&mut self, timeout: Duration) -> bool;

    fn processes(
        &mut self,
        window: Duration,
    ) -> Result<Vec<Result<ProcessSample, CollectError>>, CollectError>;

    /// `Ok(None)` when the platform exposes no disk I/O statistics.
    fn disk_io(&mut self) -> Result<Option<DiskIoCounters>, CollectError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_errors_map_by_kind() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "/root");
        assert!(matches!(
            CollectError::from(denied),
            CollectError::PermissionDenied(_)
        ));

        let gone = io::Error::new(io::ErrorKind::NotFound, "/proc/4242");
        assert!(matches!(
            CollectError::from(gone),
            CollectError::NotFound(_)
        ));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert_eq!(CollectError::from(other).to_string(), "boom");
    }
}
