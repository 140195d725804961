use crate::collectors::{CollectError, MetricsProvider};
use crate::recommendations;
use crate::report::{
    bytes_to_gb, classify, default_report_name, percent_of, round2, AddressEntry, CpuEntry,
    CpuProcess, DiagnosticReport, DiskEntry, InterfaceEntry, MemoryEntry, MemoryProcess,
    NetworkEntry, ProcessEntry, ReportError, ReportFormat, Status, SystemInfo, TemperatureEntry,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const HIGH_CPU_PROCESS_PERCENT: f64 = 50.0;
const HIGH_MEMORY_PROCESS_PERCENT: f64 = 10.0;
const SWAP_WARNING_PERCENT: f64 = 80.0;
const TOP_PROCESSES: usize = 5;
const PRINTED_PROCESSES: usize = 3;
const RULE: &str = "============================================================";
const CPU_SENSOR_MARKERS: [&str; 7] = [
    "cpu", "core", "package", "tctl", "tdie", "k10temp", "coretemp",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Check {
    SystemInfo,
    Disk,
    Memory,
    Cpu,
    Network,
    Processes,
    DiskErrors,
}

impl Check {
    /// Every check, in the order a full run executes them.
    pub const ALL: [Check; 7] = [
        Check::SystemInfo,
        Check::Disk,
        Check::Memory,
        Check::Cpu,
        Check::Network,
        Check::Processes,
        Check::DiskErrors,
    ];

    fn banner(self) -> &'static str {
        match self {
            Check::SystemInfo => "Collecting system information...",
            Check::Disk => "Checking disk health...",
            Check::Memory => "Checking memory usage...",
            Check::Cpu => "Checking CPU usage...",
            Check::Network => "Checking network connectivity...",
            Check::Processes => "Analyzing running processes...",
            Check::DiskErrors => "Checking disk errors...",
        }
    }
}

/// How a single check ended. Only `Failed` appends an issue of its own;
/// threshold violations are recorded independently of the outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Completed,
    /// Some items could not be read and were left out or marked per item.
    Degraded { skipped: usize },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cpu_window: Duration,
    pub process_window: Duration,
    pub probe_timeout: Duration,
    pub report_format: ReportFormat,
    pub report_dir: PathBuf,
    /// Print progress and per-domain metrics to stdout.
    pub echo: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cpu_window: Duration::from_secs(1),
            process_window: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(5),
            report_format: ReportFormat::Json,
            report_dir: PathBuf::from("."),
            echo: true,
        }
    }
}

pub struct DiagnosticPipeline<P> {
    provider: P,
    settings: PipelineSettings,
    report: DiagnosticReport,
}

impl<P: MetricsProvider> DiagnosticPipeline<P> {
    pub fn new(provider: P, settings: PipelineSettings) -> Self {
        Self {
            provider,
            settings,
            report: DiagnosticReport::new(SystemTime::now()),
        }
    }

    pub fn report(&self) -> &DiagnosticReport {
        &self.report
    }

    pub fn run_all(&mut self) -> &DiagnosticReport {
        self.run_selected(&Check::ALL)
    }

    /// Runs the requested checks in the fixed order of [`Check::ALL`],
    /// then derives recommendations. A failing check never stops the run.
    pub fn run_selected(&mut self, checks: &[Check]) -> &DiagnosticReport {
        self.say(RULE);
        self.say("SYSTEM DIAGNOSTIC UTILITY");
        self.say(RULE);
        self.say("");

        for check in Check::ALL.into_iter().filter(|c| checks.contains(c)) {
            self.say(check.banner());
            let outcome = self.run_check(check);
            debug!(check = ?check, outcome = ?outcome, "check finished");
        }

        self.say("\nGenerating recommendations...");
        self.generate_recommendations();
        &self.report
    }

    pub fn run_check(&mut self, check: Check) -> CheckOutcome {
        match check {
            Check::SystemInfo => self.check_system_info(),
            Check::Disk => self.check_disk_health(),
            Check::Memory => self.check_memory_health(),
            Check::Cpu => self.check_cpu_health(),
            Check::Network => self.check_network_health(),
            Check::Processes => self.check_process_health(),
            Check::DiskErrors => self.check_disk_errors(),
        }
    }

    pub fn check_system_info(&mut self) -> CheckOutcome {
        let identity = match self.provider.host_identity() {
            Ok(identity) => identity,
            Err(err) => return self.fail("Error collecting system info", err),
        };

        let info = SystemInfo {
            os: identity.os,
            os_version: identity.os_version,
            os_release: identity.os_release,
            architecture: identity.architecture,
            processor: identity.processor,
            hostname: identity.hostname,
            agent_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        };
        self.say(format!(
            "  OS: {} {}",
            info.os.as_deref().unwrap_or("unknown"),
            info.os_release.as_deref().unwrap_or("")
        ));
        self.say(format!(
            "  Architecture: {}",
            info.architecture.as_deref().unwrap_or("unknown")
        ));
        self.say(format!(
            "  Processor: {}",
            info.processor.as_deref().unwrap_or("unknown")
        ));
        self.report.system_info = info;
        CheckOutcome::Completed
    }

    pub fn check_disk_health(&mut self) -> CheckOutcome {
        let partitions = match self.provider.partitions() {
            Ok(partitions) => partitions,
            Err(err) => return self.fail("Error checking disk health", err),
        };

        let mut disks = BTreeMap::new();
        let mut skipped = 0_usize;
        for part in partitions {
            let entry = match part.usage {
                Ok(usage) => {
                    let percent = percent_of(usage.used_bytes, usage.total_bytes);
                    let status = classify(percent);
                    match status {
                        Status::Critical => self.report.issues.push(format!(
                            "CRITICAL: {} ({}) is {percent:.1}% full!",
                            part.device, part.mountpoint
                        )),
                        Status::Warning => self.report.issues.push(format!(
                            "WARNING: {} ({}) is {percent:.1}% full",
                            part.device, part.mountpoint
                        )),
                        _ => {}
                    }

                    let entry = DiskEntry {
                        mountpoint: part.mountpoint,
                        fstype: part.fstype,
                        total_gb: Some(bytes_to_gb(usage.total_bytes)),
                        used_gb: Some(bytes_to_gb(usage.used_bytes)),
                        free_gb: Some(bytes_to_gb(usage.free_bytes)),
                        percent_used: Some(round2(percent)),
                        status,
                    };
                    self.say(format!("  {} ({}):", part.device, entry.mountpoint));
                    self.say(format!(
                        "    Total: {:.2} GB | Used: {:.2} GB | Free: {:.2} GB",
                        entry.total_gb.unwrap_or_default(),
                        entry.used_gb.unwrap_or_default(),
                        entry.free_gb.unwrap_or_default()
                    ));
                    self.say(format!(
                        "    Usage: {percent:.1}% - Status: {}",
                        entry.status
                    ));
                    entry
                }
                Err(CollectError::PermissionDenied(reason)) => {
                    skipped += 1;
                    debug!(device = %part.device, reason = %reason, "partition not readable");
                    self.say(format!("  {}: Access denied", part.device));
                    unmeasured(part.mountpoint, part.fstype, Status::AccessDenied)
                }
                Err(err) => {
                    skipped += 1;
                    warn!(device = %part.device, error = %err, "partition usage failed");
                    self.say(format!("  {}: Error - {err}", part.device));
                    unmeasured(part.mountpoint, part.fstype, Status::Error(err.to_string()))
                }
            };
            disks.insert(part.device, entry);
        }

        self.report.disk_health = disks;
        outcome_for(skipped)
    }

    pub fn check_memory_health(&mut self) -> CheckOutcome {
        let mem = match self.provider.memory() {
            Ok(mem) => mem,
            Err(err) => return self.fail("Error checking memory", err),
        };

        let percent = percent_of(
            mem.total_bytes.saturating_sub(mem.available_bytes),
            mem.total_bytes,
        );
        let swap_percent = percent_of(mem.swap_used_bytes, mem.swap_total_bytes);
        let status = classify(percent);

        match status {
            Status::Critical => self
                .report
                .issues
                .push(format!("CRITICAL: Memory usage is {percent:.1}%!")),
            Status::Warning => self
                .report
                .issues
                .push(format!("WARNING: Memory usage is {percent:.1}%")),
            _ => {}
        }
        if mem.swap_total_bytes > 0 && swap_percent > SWAP_WARNING_PERCENT {
            self.report.issues.push(format!(
                "WARNING: High swap usage ({swap_percent:.1}%) - system may be low on RAM"
            ));
        }

        let entry = MemoryEntry {
            total_gb: bytes_to_gb(mem.total_bytes),
            used_gb: bytes_to_gb(mem.used_bytes),
            available_gb: bytes_to_gb(mem.available_bytes),
            percent_used: round2(percent),
            swap_total_gb: bytes_to_gb(mem.swap_total_bytes),
            swap_used_gb: bytes_to_gb(mem.swap_used_bytes),
            swap_percent: round2(swap_percent),
            status,
        };
        self.say(format!(
            "  RAM: {:.2} GB / {:.2} GB ({percent:.1}%)",
            entry.used_gb, entry.total_gb
        ));
        self.say(format!("  Available: {:.2} GB", entry.available_gb));
        self.say(format!(
            "  Swap: {:.2} GB / {:.2} GB ({swap_percent:.1}%)",
            entry.swap_used_gb, entry.swap_total_gb
        ));
        self.say(format!("  Status: {}", entry.status));
        self.report.memory_health = Some(entry);
        CheckOutcome::Completed
    }

    /// Blocks for two sampling windows: one aggregate, one per core.
    pub fn check_cpu_health(&mut self) -> CheckOutcome {
        let sample = match self.provider.sample_cpu(self.settings.cpu_window) {
            Ok(sample) => sample,
            Err(err) => return self.fail("Error checking CPU", err),
        };

        let mut skipped = 0_usize;
        let per_core = match self.provider.sample_cpu_per_core(self.settings.cpu_window) {
            Ok(cores) => cores.into_iter().map(round2).collect(),
            Err(err) => {
                skipped += 1;
                warn!(error = %err, "per-core CPU sampling failed");
                Vec::new()
            }
        };

        let usage = sample.usage_percent;
        let status = classify(usage);
        match status {
            Status::Critical => self
                .report
                .issues
                .push(format!("CRITICAL: CPU usage is {usage:.1}%!")),
            Status::Warning => self
                .report
                .issues
                .push(format!("WARNING: CPU usage is {usage:.1}%")),
            _ => {}
        }

        let temperatures = match self.provider.temperatures() {
            Ok(readings) => {
                let mut map = BTreeMap::new();
                for reading in readings.into_iter().filter(|r| is_cpu_sensor(&r.label)) {
                    if let Some(critical) = reading.critical {
                        if reading.current > critical {
                            self.report.issues.push(format!(
                                "CRITICAL: CPU temperature ({:.1}°C) exceeds critical threshold!",
                                reading.current
                            ));
                        }
                    }
                    map.insert(
                        reading.label,
                        TemperatureEntry {
                            current: round2(reading.current),
                            high: reading.high.map(round2),
                            critical: reading.critical.map(round2),
                        },
                    );
                }
                Some(map)
            }
            Err(err) => {
                debug!(error = %err, "temperature sensors unavailable");
                None
            }
        };

        let frequency = sample.frequency;
        let entry = CpuEntry {
            usage_percent: round2(usage),
            cores: sample.logical_cores,
            current_freq_mhz: frequency.as_ref().map(|f| round2(f.current_mhz)),
            min_freq_mhz: frequency.as_ref().and_then(|f| f.min_mhz).map(round2),
            max_freq_mhz: frequency.as_ref().and_then(|f| f.max_mhz).map(round2),
            per_core_percent: per_core,
            status,
            temperatures,
        };
        self.say(format!("  CPU Usage: {usage:.1}%"));
        self.say(format!("  Cores: {}", entry.cores));
        if let Some(mhz) = entry.current_freq_mhz {
            self.say(format!("  Frequency: {mhz:.2} MHz"));
        }
        self.say(format!("  Status: {}", entry.status));
        self.report.cpu_health = Some(entry);
        outcome_for(skipped)
    }

    pub fn check_network_health(&mut self) -> CheckOutcome {
        let counters = match self.provider.net_counters() {
            Ok(counters) => counters,
            Err(err) => return self.fail("Error checking network", err),
        };
        let interfaces = match self.provider.interfaces() {
            Ok(interfaces) => interfaces,
            Err(err) => return self.fail("Error checking network", err),
        };
        let localhost_connectivity = self.provider.probe_loopback(self.settings.probe_timeout);

        let interfaces: BTreeMap<String, InterfaceEntry> = interfaces
            .into_iter()
            .map(|iface| {
                let entry = InterfaceEntry {
                    addresses: iface
                        .addresses
                        .into_iter()
                        .map(|a| AddressEntry {
                            family: a.family,
                            address: a.address,
                            netmask: a.netmask,
                        })
                        .collect(),
                    is_up: iface.is_up,
                    speed_mbps: iface.speed_mbps,
                };
                (iface.name, entry)
            })
            .collect();

        self.say(format!(
            "  Bytes Sent: {:.2} MB",
            counters.bytes_sent as f64 / BYTES_PER_MB
        ));
        self.say(format!(
            "  Bytes Received: {:.2} MB",
            counters.bytes_recv as f64 / BYTES_PER_MB
        ));
        self.say(format!("  Interfaces: {}", interfaces.len()));
        self.say(format!(
            "  Localhost Connectivity: {}",
            if localhost_connectivity { "OK" } else { "FAILED" }
        ));

        self.report.network_health = Some(NetworkEntry {
            total_bytes_sent: counters.bytes_sent,
            total_bytes_recv: counters.bytes_recv,
            total_packets_sent: counters.packets_sent,
            total_packets_recv: counters.packets_recv,
            interfaces,
            localhost_connectivity,
        });
        CheckOutcome::Completed
    }

    pub fn check_process_health(&mut self) -> CheckOutcome {
        let samples = match self.provider.processes(self.settings.process_window) {
            Ok(samples) => samples,
            Err(err) => return self.fail("Error checking processes", err),
        };

        let mut total = 0_usize;
        let mut skipped = 0_usize;
        let mut top_cpu = Vec::new();
        let mut top_memory = Vec::new();
        for sample in samples {
            let proc_info = match sample {
                Ok(proc_info) => proc_info,
                Err(err) => {
                    skipped += 1;
                    debug!(error = %err, "process skipped");
                    continue;
                }
            };
            total += 1;

            if let Some(cpu) = proc_info
                .cpu_percent
                .filter(|v| *v > HIGH_CPU_PROCESS_PERCENT)
            {
                top_cpu.push(CpuProcess {
                    pid: proc_info.pid,
                    name: proc_info.name.clone(),
                    cpu_percent: round2(cpu),
                });
            }
            if let Some(mem) = proc_info
                .memory_percent
                .filter(|v| *v > HIGH_MEMORY_PROCESS_PERCENT)
            {
                top_memory.push(MemoryProcess {
                    pid: proc_info.pid,
                    name: proc_info.name,
                    memory_percent: round2(mem),
                });
            }
        }

        top_cpu.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        top_cpu.truncate(TOP_PROCESSES);
        top_memory.sort_by(|a, b| b.memory_percent.total_cmp(&a.memory_percent));
        top_memory.truncate(TOP_PROCESSES);

        self.say(format!("  Total Processes: {total}"));
        self.say("  Top CPU Processes:");
        for p in top_cpu.iter().take(PRINTED_PROCESSES) {
            self.say(format!(
                "    {} (PID: {}): {:.1}%",
                p.name, p.pid, p.cpu_percent
            ));
        }
        self.say("  Top Memory Processes:");
        for p in top_memory.iter().take(PRINTED_PROCESSES) {
            self.say(format!(
                "    {} (PID: {}): {:.1}%",
                p.name, p.pid, p.memory_percent
            ));
        }

        self.report.process_health = Some(ProcessEntry {
            total_processes: total,
            top_cpu_processes: top_cpu,
            top_memory_processes: top_memory,
        });
        outcome_for(skipped)
    }

    /// Advisory only: points at the platform's repair tools and prints
    /// cumulative I/O counters when they can be read. Never adds an issue.
    pub fn check_disk_errors(&mut self) -> CheckOutcome {
        if cfg!(target_os = "windows") {
            self.say(
                "  Note: Run 'chkdsk C: /f' as administrator to check for disk errors",
            );
            self.say("  Note: Check Event Viewer for disk-related errors");
        } else {
            self.say("  Note: Run 'fsck' or check system logs for disk errors");
            self.say("  Note: Check /var/log/syslog or dmesg for disk errors");
        }

        match self.provider.disk_io() {
            Ok(Some(io)) => {
                let errors =
                    |v: Option<u64>| v.map_or_else(|| "N/A".to_string(), |n| n.to_string());
                self.say(format!("  Disk Read Count: {}", io.read_count));
                self.say(format!("  Disk Write Count: {}", io.write_count));
                self.say(format!("  Disk Read Errors: {}", errors(io.read_errors)));
                self.say(format!("  Disk Write Errors: {}", errors(io.write_errors)));
                CheckOutcome::Completed
            }
            Ok(None) => CheckOutcome::Completed,
            Err(err) => {
                warn!(error = %err, "disk I/O counters unavailable");
                CheckOutcome::Degraded { skipped: 1 }
            }
        }
    }

    /// Replaces the recommendation list with one derived from the current
    /// report. Never touches `issues`.
    pub fn generate_recommendations(&mut self) -> &[String] {
        self.report.recommendations = recommendations::derive(&self.report);

        self.say("\nRecommendations:");
        for (i, rec) in self.report.recommendations.iter().enumerate() {
            self.say(format!("  {}. {rec}", i + 1));
        }
        &self.report.recommendations
    }

    pub fn print_summary(&self) {
        println!("{}", render_summary(&self.report));
    }

    /// Writes the report to `filename`, or to a timestamped file in the
    /// configured directory. Failures are logged and returned, never raised.
    pub fn save_report(&self, filename: Option<&Path>) -> Result<PathBuf, ReportError> {
        let format = self.settings.report_format;
        let path = match filename {
            Some(path) => path.to_path_buf(),
            None => self
                .settings
                .report_dir
                .join(default_report_name(SystemTime::now(), format)),
        };

        let written = format.render(&self.report).and_then(|text| {
            fs::write(&path, text).map_err(|source| ReportError::Write {
                path: path.display().to_string(),
                source,
            })
        });

        match written {
            Ok(()) => {
                info!(path = %path.display(), "report saved");
                self.say(format!("\nReport saved to: {}", path.display()));
                Ok(path)
            }
            Err(err) => {
                error!(error = %err, "report not saved");
                self.say(format!("Error saving report: {err}"));
                Err(err)
            }
        }
    }

    fn fail(&mut self, context: &str, err: CollectError) -> CheckOutcome {
        let message = err.to_string();
        warn!(context, error = %message, "check failed");
        self.report.issues.push(format!("{context}: {message}"));
        self.say(format!("  Error: {message}"));
        CheckOutcome::Failed(message)
    }

    fn say(&self, line: impl AsRef<str>) {
        if self.settings.echo {
            println!("{}", line.as_ref());
        }
    }
}

pub fn render_summary(report: &DiagnosticReport) -> String {
    let mut out = format!("\n{RULE}\nDIAGNOSTIC SUMMARY\n{RULE}\n");
    if report.issues.is_empty() {
        out.push_str("✓ No issues detected\n");
    } else {
        out.push_str(&format!("⚠ {} issue(s) detected:\n", report.issues.len()));
        for issue in &report.issues {
            out.push_str(&format!("  - {issue}\n"));
        }
    }
    out.push_str(&format!("\n{RULE}"));
    out
}

fn unmeasured(mountpoint: String, fstype: String, status: Status) -> DiskEntry {
    DiskEntry {
        mountpoint,
        fstype,
        total_gb: None,
        used_gb: None,
        free_gb: None,
        percent_used: None,
        status,
    }
}

fn outcome_for(skipped: usize) -> CheckOutcome {
    if skipped == 0 {
        CheckOutcome::Completed
    } else {
        CheckOutcome::Degraded { skipped }
    }
}

fn is_cpu_sensor(label: &str) -> bool {
    let label = label.to_lowercase();
    CPU_SENSOR_MARKERS.iter().any(|m| label.contains(m))
}
