use crate::report::DiagnosticReport;

const ATTENTION_PERCENT: f64 = 80.0;

pub const ALL_CLEAR: &str = "System appears to be running normally. No immediate action required.";

/// Derives recommendations from the final report state. Pure: the same
/// report always yields the same list, in rule order.
pub fn derive(report: &DiagnosticReport) -> Vec<String> {
    let mut out = Vec::new();

    for (device, disk) in &report.disk_health {
        let Some(percent) = disk.percent_used else {
            continue;
        };
        if percent > ATTENTION_PERCENT {
            out.push(format!(
                "Free up space on {device} ({}). Currently {percent:.1}% full.",
                disk.mountpoint
            ));
        }
    }

    if report
        .memory_health
        .as_ref()
        .is_some_and(|m| m.percent_used > ATTENTION_PERCENT)
    {
        out.push(
            "High memory usage detected. Consider closing unnecessary applications or adding more RAM."
                .to_string(),
        );
    }

    if report
        .cpu_health
        .as_ref()
        .is_some_and(|c| c.usage_percent > ATTENTION_PERCENT)
    {
        out.push(
            "High CPU usage detected. Check for resource-intensive processes or consider upgrading hardware."
                .to_string(),
        );
    }

    let top_cpu = report
        .process_health
        .as_ref()
        .and_then(|p| p.top_cpu_processes.first());
    if let Some(top) = top_cpu {
        if top.cpu_percent > ATTENTION_PERCENT {
            out.push(format!(
                "Process '{}' is using high CPU. Consider investigating or restarting it.",
                top.name
            ));
        }
    }

    if out.is_empty() {
        out.push(ALL_CLEAR.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        CpuEntry, CpuProcess, DiskEntry, MemoryEntry, ProcessEntry, Status,
    };
    use std::time::UNIX_EPOCH;

    fn disk(mount: &str, percent: Option<f64>, status: Status) -> DiskEntry {
        DiskEntry {
            mountpoint: mount.to_string(),
            fstype: "ext4".to_string(),
            total_gb: percent.map(|_| 100.0),
            used_gb: percent,
            free_gb: percent.map(|p| 100.0 - p),
            percent_used: percent,
            status,
        }
    }

    fn memory(percent: f64) -> MemoryEntry {
        MemoryEntry {
            total_gb: 16.0,
            used_gb: 16.0 * percent / 100.0,
            available_gb: 16.0 * (100.0 - percent) / 100.0,
            percent_used: percent,
            swap_total_gb: 0.0,
            swap_used_gb: 0.0,
            swap_percent: 0.0,
            status: crate::report::classify(percent),
        }
    }

    fn cpu(percent: f64) -> CpuEntry {
        CpuEntry {
            usage_percent: percent,
            cores: 4,
            current_freq_mhz: None,
            min_freq_mhz: None,
            max_freq_mhz: None,
            per_core_percent: vec![percent; 4],
            status: crate::report::classify(percent),
            temperatures: None,
        }
    }

    #[test]
    fn empty_report_is_all_clear() {
        let report = DiagnosticReport::new(UNIX_EPOCH);
        assert_eq!(derive(&report), vec![ALL_CLEAR.to_string()]);
    }

    #[test]
    fn rules_fire_in_order() {
        let mut report = DiagnosticReport::new(UNIX_EPOCH);
        report.disk_health.insert(
            "/dev/sda1".to_string(),
            disk("/", Some(85.0), Status::Warning),
        );
        report.disk_health.insert(
            "/dev/sdb1".to_string(),
            disk("/data", Some(40.0), Status::Healthy),
        );
        report.memory_health = Some(memory(91.0));
        report.cpu_health = Some(cpu(88.0));
        report.process_health = Some(ProcessEntry {
            total_processes: 120,
            top_cpu_processes: vec![CpuProcess {
                pid: 42,
                name: "encoder".to_string(),
                cpu_percent: 97.5,
            }],
            top_memory_processes: vec![],
        });

        let recs = derive(&report);
        assert_eq!(recs.len(), 4);
        assert_eq!(
            recs[0],
            "Free up space on /dev/sda1 (/). Currently 85.0% full."
        );
        assert!(recs[1].starts_with("High memory usage"));
        assert!(recs[2].starts_with("High CPU usage"));
        assert!(recs[3].contains("'encoder'"));
    }

    #[test]
    fn unmeasured_disks_and_exact_threshold_do_not_fire() {
        let mut report = DiagnosticReport::new(UNIX_EPOCH);
        report.disk_health.insert(
            "/dev/sr0".to_string(),
            disk("/media/cd", None, Status::AccessDenied),
        );
        report.disk_health.insert(
            "/dev/sda1".to_string(),
            disk("/", Some(80.0), Status::Healthy),
        );
        report.memory_health = Some(memory(80.0));
        assert_eq!(derive(&report), vec![ALL_CLEAR.to_string()]);
    }

    #[test]
    fn derivation_is_deterministic() {
        let mut report = DiagnosticReport::new(UNIX_EPOCH);
        report.cpu_health = Some(cpu(95.0));
        assert_eq!(derive(&report), derive(&report));
    }
}
