use crate::collectors::probe;
use crate::collectors::{
    CollectError, CpuFrequency, CpuSample, DiskIoCounters, HostIdentity, InterfaceAddress,
    InterfaceInfo, MemoryStats, MetricsProvider, NetCounters, Partition, PartitionUsage,
    ProcessSample, TemperatureReading,
};
use crate::report::percent_of;
use std::collections::{BTreeMap, BTreeSet};
#[cfg(target_os = "linux")]
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
#[cfg(target_os = "linux")]
use std::path::Path;
#[cfg(target_os = "linux")]
use std::process::Command;
use std::thread;
use std::time::Duration;
use sysinfo::{
    ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, ProcessStatus,
    System, SystemExt,
};
#[cfg(target_os = "linux")]
use tracing::debug;

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const IFF_UP: u32 = 0x1;

/// [`MetricsProvider`] backed by `sysinfo`, with Linux sysfs/procfs
/// readers for what `sysinfo` does not expose.
pub struct SysinfoProvider {
    system: System,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn sample_cpus(&mut self, window: Duration) -> Result<(), CollectError> {
        self.system.refresh_cpu();
        thread::sleep(window);
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(CollectError::Unavailable(
                "no CPUs reported by the OS".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsProvider for SysinfoProvider {
    fn host_identity(&mut self) -> Result<HostIdentity, CollectError> {
        self.system.refresh_cpu();
        let processor = self
            .system
            .cpus()
            .first()
            .map(|c| c.brand().trim().to_string())
            .filter(|b| !b.is_empty());

        Ok(HostIdentity {
            os: self
                .system
                .name()
                .or_else(|| Some(std::env::consts::OS.to_string())),
            os_version: self
                .system
                .long_os_version()
                .or_else(|| self.system.os_version()),
            os_release: self.system.kernel_version(),
            architecture: Some(std::env::consts::ARCH.to_string()),
            processor,
            hostname: self.system.host_name(),
        })
    }

    fn partitions(&mut self) -> Result<Vec<Partition>, CollectError> {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let capacity: BTreeMap<String, PartitionUsage> = self
            .system
            .disks()
            .iter()
            .map(|d| {
                let total = d.total_space();
                let free = d.available_space();
                (
                    d.mount_point().to_string_lossy().to_string(),
                    PartitionUsage {
                        total_bytes: total,
                        used_bytes: total.saturating_sub(free),
                        free_bytes: free,
                    },
                )
            })
            .collect();

        match collect_mounts()? {
            Some(mounts) => Ok(join_mounts(mounts, &capacity, stat_usage)),
            None => Ok(self
                .system
                .disks()
                .iter()
                .map(|d| {
                    let mountpoint = d.mount_point().to_string_lossy().to_string();
                    Partition {
                        device: d.name().to_string_lossy().to_string(),
                        fstype: String::from_utf8_lossy(d.file_system()).to_string(),
                        usage: capacity.get(&mountpoint).cloned().ok_or_else(|| {
                            CollectError::Unavailable(format!("no capacity for {mountpoint}"))
                        }),
                        mountpoint,
                    }
                })
                .collect()),
        }
    }

    fn memory(&mut self) -> Result<MemoryStats, CollectError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(CollectError::Unavailable(
                "physical memory size not reported".to_string(),
            ));
        }

        Ok(MemoryStats {
            total_bytes: total,
            used_bytes: self.system.used_memory(),
            available_bytes: self.system.available_memory(),
            swap_total_bytes: self.system.total_swap(),
            swap_used_bytes: self.system.used_swap(),
        })
    }

    fn sample_cpu(&mut self, window: Duration) -> Result<CpuSample, CollectError> {
        self.sample_cpus(window)?;

        let cpus = self.system.cpus();
        let frequency = cpus
            .first()
            .map(|c| c.frequency())
            .filter(|mhz| *mhz > 0)
            .map(|mhz| {
                let (min_mhz, max_mhz) = cpufreq_limits_mhz();
                CpuFrequency {
                    current_mhz: mhz as f64,
                    min_mhz,
                    max_mhz,
                }
            });

        Ok(CpuSample {
            usage_percent: self.system.global_cpu_info().cpu_usage() as f64,
            logical_cores: cpus.len(),
            frequency,
        })
    }

    fn sample_cpu_per_core(&mut self, window: Duration) -> Result<Vec<f64>, CollectError> {
        self.sample_cpus(window)?;
        Ok(self
            .system
            .cpus()
            .iter()
            .map(|c| c.cpu_usage() as f64)
            .collect())
    }

    fn temperatures(&mut self) -> Result<Vec<TemperatureReading>, CollectError> {
        self.system.refresh_components_list();
        let readings: Vec<TemperatureReading> = self
            .system
            .components()
            .iter()
            .map(|c| TemperatureReading {
                label: c.label().to_string(),
                current: c.temperature() as f64,
                high: None,
                critical: c.critical().map(f64::from),
            })
            .filter(|t| t.current.is_finite() && t.current > 0.0)
            .collect();

        if readings.is_empty() {
            return Err(CollectError::Unsupported(
                "no temperature sensors exposed".to_string(),
            ));
        }
        Ok(readings)
    }

    fn net_counters(&mut self) -> Result<NetCounters, CollectError> {
        self.system.refresh_networks_list();

        let mut counters = NetCounters::default();
        for (_, data) in self.system.networks().iter() {
            counters.bytes_recv += data.total_received();
            counters.bytes_sent += data.total_transmitted();
            counters.packets_recv += data.total_packets_received();
            counters.packets_sent += data.total_packets_transmitted();
        }
        Ok(counters)
    }

    fn interfaces(&mut self) -> Result<Vec<InterfaceInfo>, CollectError> {
        self.system.refresh_networks_list();

        let mut by_name: BTreeMap<String, InterfaceInfo> = self
            .system
            .networks()
            .iter()
            .map(|(name, _)| {
                (
                    name.to_string(),
                    InterfaceInfo {
                        name: name.to_string(),
                        ..InterfaceInfo::default()
                    },
                )
            })
            .collect();

        for (name, addr) in collect_addresses() {
            by_name
                .entry(name.clone())
                .or_insert_with(|| InterfaceInfo {
                    name,
                    ..InterfaceInfo::default()
                })
                .addresses
                .push(addr);
        }

        for info in by_name.values_mut() {
            let (is_up, speed_mbps) = link_state(&info.name);
            info.is_up = is_up;
            info.speed_mbps = speed_mbps;
        }

        Ok(by_name.into_values().collect())
    }

    fn probe_loopback(&mut self, timeout: Duration) -> bool {
        probe::ping_loopback(timeout)
    }

    fn processes(
        &mut self,
        window: Duration,
    ) -> Result<Vec<Result<ProcessSample, CollectError>>, CollectError> {
        self.system.refresh_memory();
        self.system.refresh_processes();
        thread::sleep(window);
        self.system.refresh_processes();

        let total_memory = self.system.total_memory();
        let samples = self
            .system
            .processes()
            .values()
            .map(|p| {
                Ok(process_sample(
                    p.pid().as_u32(),
                    p.name(),
                    matches!(p.status(), ProcessStatus::Zombie),
                    p.cpu_usage(),
                    p.memory(),
                    total_memory,
                ))
            })
            .collect();
        Ok(samples)
    }

    fn disk_io(&mut self) -> Result<Option<DiskIoCounters>, CollectError> {
        collect_disk_io()
    }
}

/// Zombies are still counted, but their usage figures are unreadable.
fn process_sample(
    pid: u32,
    name: &str,
    zombie: bool,
    cpu_usage: f32,
    memory_bytes: u64,
    total_memory: u64,
) -> ProcessSample {
    let (cpu_percent, memory_percent) = if zombie {
        (None, None)
    } else {
        (
            Some(cpu_usage as f64),
            (total_memory > 0).then(|| percent_of(memory_bytes, total_memory)),
        )
    };
    ProcessSample {
        pid,
        name: name.to_string(),
        cpu_percent,
        memory_percent,
    }
}

#[cfg(target_os = "linux")]
fn read_sys_value(path: impl AsRef<Path>) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

#[cfg(target_os = "linux")]
fn cpufreq_limits_mhz() -> (Option<f64>, Option<f64>) {
    let base = Path::new("/sys/devices/system/cpu/cpu0/cpufreq");
    let read_khz = |file: &str| {
        read_sys_value(base.join(file))
            .and_then(|v| v.parse::<f64>().ok())
            .map(|khz| khz / 1000.0)
    };
    (read_khz("cpuinfo_min_freq"), read_khz("cpuinfo_max_freq"))
}

#[cfg(not(target_os = "linux"))]
fn cpufreq_limits_mhz() -> (Option<f64>, Option<f64>) {
    (None, None)
}

#[cfg(target_os = "linux")]
fn link_state(iface: &str) -> (bool, u64) {
    let base = Path::new("/sys/class/net").join(iface);
    let is_up = read_sys_value(base.join("flags"))
        .and_then(|v| parse_sysfs_flags(&v))
        .map(|flags| flags & IFF_UP != 0)
        .unwrap_or(false);
    // Virtual links fail the read with EINVAL or report -1.
    let speed = read_sys_value(base.join("speed"))
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(0) as u64;
    (is_up, speed)
}

#[cfg(not(target_os = "linux"))]
fn link_state(_iface: &str) -> (bool, u64) {
    (false, 0)
}

#[cfg(target_os = "linux")]
fn collect_addresses() -> Vec<(String, InterfaceAddress)> {
    let output = match Command::new("ip").args(["-o", "addr", "show"]).output() {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(code = ?output.status.code(), "ip addr exited with failure");
            return Vec::new();
        }
        Err(err) => {
            debug!(error = %err, "ip addr unavailable");
            return Vec::new();
        }
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(parse_ip_addr_line)
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn collect_addresses() -> Vec<(String, InterfaceAddress)> {
    Vec::new()
}

/// Physical filesystem mounts from `/proc/self/mounts`, or `None` when
/// the platform has no such table and `sysinfo` is the only source.
#[cfg(target_os = "linux")]
fn collect_mounts() -> Result<Option<Vec<MountEntry>>, CollectError> {
    let mounts = match fs::read_to_string("/proc/self/mounts") {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let physical = match fs::read_to_string("/proc/filesystems") {
        Ok(text) => physical_fs_types(&text),
        Err(err) => {
            debug!(error = %err, "/proc/filesystems unreadable");
            return Ok(None);
        }
    };
    Ok(Some(
        mounts
            .lines()
            .filter_map(parse_mount_line)
            .filter(|m| physical.contains(&m.fstype))
            .collect(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn collect_mounts() -> Result<Option<Vec<MountEntry>>, CollectError> {
    Ok(None)
}

/// `statvfs` for mounts `sysinfo` left out; the OS error is kept so a
/// denied mount reports `PermissionDenied`.
#[cfg(target_os = "linux")]
fn stat_usage(mountpoint: &str) -> Result<PartitionUsage, CollectError> {
    let stat = nix::sys::statvfs::statvfs(mountpoint).map_err(std::io::Error::from)?;
    let block = stat.fragment_size() as u64;
    let total = (stat.blocks() as u64).saturating_mul(block);
    let free = (stat.blocks_available() as u64).saturating_mul(block);
    Ok(PartitionUsage {
        total_bytes: total,
        used_bytes: total.saturating_sub(free),
        free_bytes: free,
    })
}

#[cfg(not(target_os = "linux"))]
fn stat_usage(mountpoint: &str) -> Result<PartitionUsage, CollectError> {
    Err(CollectError::Unsupported(format!("statvfs {mountpoint}")))
}

#[cfg(target_os = "linux")]
fn collect_disk_io() -> Result<Option<DiskIoCounters>, CollectError> {
    let text = match fs::read_to_string("/proc/diskstats") {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(Some(parse_diskstats(&text, |name| {
        !name.starts_with("loop")
            && !name.starts_with("ram")
            && Path::new("/sys/block").join(name).exists()
    })))
}

#[cfg(not(target_os = "linux"))]
fn collect_disk_io() -> Result<Option<DiskIoCounters>, CollectError> {
    Ok(None)
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
#[derive(Debug, Clone, PartialEq)]
struct MountEntry {
    device: String,
    mountpoint: String,
    fstype: String,
}

/// Parses one `/proc/self/mounts` line: `device mountpoint fstype options ...`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mount_line(line: &str) -> Option<MountEntry> {
    let mut fields = line.split_whitespace();
    let device = unescape_mount_field(fields.next()?);
    let mountpoint = unescape_mount_field(fields.next()?);
    let fstype = fields.next()?.to_string();
    if device == "none" {
        return None;
    }
    Some(MountEntry {
        device,
        mountpoint,
        fstype,
    })
}

/// The kernel escapes space, tab, newline and backslash as `\ooo`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn unescape_mount_field(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let code = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

/// Filesystem types backed by a device: `/proc/filesystems` lines without
/// the `nodev` marker.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn physical_fs_types(text: &str) -> BTreeSet<String> {
    text.lines()
        .filter(|line| !line.starts_with("nodev"))
        .map(str::trim)
        .filter(|fstype| !fstype.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pairs every mount with the capacity `sysinfo` measured for it. Mounts
/// `sysinfo` dropped are stat'ed directly so their failure is kept per item.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn join_mounts(
    mounts: Vec<MountEntry>,
    capacity: &BTreeMap<String, PartitionUsage>,
    stat: impl Fn(&str) -> Result<PartitionUsage, CollectError>,
) -> Vec<Partition> {
    mounts
        .into_iter()
        .map(|m| {
            let usage = match capacity.get(&m.mountpoint) {
                Some(usage) => Ok(usage.clone()),
                None => stat(&m.mountpoint),
            };
            Partition {
                device: m.device,
                mountpoint: m.mountpoint,
                fstype: m.fstype,
                usage,
            }
        })
        .collect()
}

/// Parses one line of `ip -o addr show`, e.g.
/// `2: eth0    inet 10.0.0.5/24 brd 10.0.0.255 scope global eth0`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_ip_addr_line(line: &str) -> Option<(String, InterfaceAddress)> {
    let mut parts = line.split_whitespace();
    let _index = parts.next()?;
    let iface = parts.next()?.trim_end_matches(':');
    let iface = iface.split('@').next().unwrap_or(iface);
    let family = parts.next()?;
    let (address, prefix) = parts.next()?.split_once('/')?;
    let prefix: u8 = prefix.parse().ok()?;

    let (family, netmask) = match family {
        "inet" => ("AF_INET", ipv4_netmask(prefix)),
        "inet6" => ("AF_INET6", ipv6_netmask(prefix)),
        _ => return None,
    };

    Some((
        iface.to_string(),
        InterfaceAddress {
            family: family.to_string(),
            address: address.to_string(),
            netmask,
        },
    ))
}

fn ipv4_netmask(prefix: u8) -> Option<String> {
    if prefix > 32 {
        return None;
    }
    let bits = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
    Some(Ipv4Addr::from(bits).to_string())
}

fn ipv6_netmask(prefix: u8) -> Option<String> {
    if prefix > 128 {
        return None;
    }
    let bits = u128::MAX.checked_shl(128 - prefix as u32).unwrap_or(0);
    Some(Ipv6Addr::from(bits).to_string())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_sysfs_flags(raw: &str) -> Option<u32> {
    u32::from_str_radix(raw.trim().trim_start_matches("0x"), 16).ok()
}

/// Sums completed reads (field 4) and writes (field 8) over the devices
/// accepted by `include`. Linux does not report I/O error counts here.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_diskstats(text: &str, include: impl Fn(&str) -> bool) -> DiskIoCounters {
    let mut counters = DiskIoCounters {
        read_count: 0,
        write_count: 0,
        read_errors: None,
        write_errors: None,
    };
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 || !include(fields[2]) {
            continue;
        }
        let reads = fields[3].parse::<u64>().unwrap_or(0);
        let writes = fields[7].parse::<u64>().unwrap_or(0);
        counters.read_count = counters.read_count.saturating_add(reads);
        counters.write_count = counters.write_count.saturating_add(writes);
    }
    counters
}
