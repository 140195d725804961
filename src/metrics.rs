use crate::report::DiagnosticReport;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("cannot write metrics file {path}: {source}")]
    Write { path: String, source: io::Error },
}

/// Gauges describing one finished report, rendered in the text exposition
/// format read by node_exporter's textfile collector.
pub struct Metrics {
    registry: Registry,
    pub hostdiag_disk_usage_percent: GaugeVec,
    pub hostdiag_disk_total_gb: GaugeVec,
    pub hostdiag_disk_status: GaugeVec,
    pub hostdiag_memory_usage_percent: Gauge,
    pub hostdiag_memory_total_gb: Gauge,
    pub hostdiag_swap_usage_percent: Gauge,
    pub hostdiag_cpu_usage_percent: Gauge,
    pub hostdiag_cpu_core_usage_percent: GaugeVec,
    pub hostdiag_cpu_temperature_celsius: GaugeVec,
    pub hostdiag_net_iface_up: GaugeVec,
    pub hostdiag_localhost_connectivity: Gauge,
    pub hostdiag_process_count: Gauge,
    pub hostdiag_issues: Gauge,
    pub hostdiag_domain_status: GaugeVec,
    pub hostdiag_report_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let hostdiag_disk_usage_percent = GaugeVec::new(
            opts!(
                "hostdiag_disk_usage_percent",
                "Disk usage in percent by device"
            ),
            &["device", "mount"],
        )?;
        let hostdiag_disk_total_gb = GaugeVec::new(
            opts!("hostdiag_disk_total_gb", "Disk capacity in GiB by device"),
            &["device", "mount"],
        )?;
        let hostdiag_disk_status = GaugeVec::new(
            opts!(
                "hostdiag_disk_status",
                "Disk status code (0 healthy, 1 warning, 2 critical, 3 unreadable)"
            ),
            &["device", "mount"],
        )?;
        let hostdiag_memory_usage_percent = Gauge::with_opts(opts!(
            "hostdiag_memory_usage_percent",
            "RAM usage in percent, counting reclaimable memory as free"
        ))?;
        let hostdiag_memory_total_gb =
            Gauge::with_opts(opts!("hostdiag_memory_total_gb", "Total RAM in GiB"))?;
        let hostdiag_swap_usage_percent = Gauge::with_opts(opts!(
            "hostdiag_swap_usage_percent",
            "Swap usage in percent"
        ))?;
        let hostdiag_cpu_usage_percent = Gauge::with_opts(opts!(
            "hostdiag_cpu_usage_percent",
            "Aggregate CPU usage over the sampling window"
        ))?;
        let hostdiag_cpu_core_usage_percent = GaugeVec::new(
            opts!(
                "hostdiag_cpu_core_usage_percent",
                "CPU usage by logical core"
            ),
            &["core"],
        )?;
        let hostdiag_cpu_temperature_celsius = GaugeVec::new(
            opts!(
                "hostdiag_cpu_temperature_celsius",
                "CPU temperature by sensor in Celsius"
            ),
            &["sensor"],
        )?;
        let hostdiag_net_iface_up = GaugeVec::new(
            opts!(
                "hostdiag_net_iface_up",
                "1 if the interface is administratively up"
            ),
            &["iface"],
        )?;
        let hostdiag_localhost_connectivity = Gauge::with_opts(opts!(
            "hostdiag_localhost_connectivity",
            "1 if the loopback ping succeeded"
        ))?;
        let hostdiag_process_count = Gauge::with_opts(opts!(
            "hostdiag_process_count",
            "Number of running processes"
        ))?;
        let hostdiag_issues =
            Gauge::with_opts(opts!("hostdiag_issues", "Number of issues in the report"))?;
        let hostdiag_domain_status = GaugeVec::new(
            opts!(
                "hostdiag_domain_status",
                "Status code by domain (0 healthy, 1 warning, 2 critical, 3 unreadable)"
            ),
            &["domain"],
        )?;
        let hostdiag_report_timestamp_seconds = Gauge::with_opts(opts!(
            "hostdiag_report_timestamp_seconds",
            "Unix time the report was started"
        ))?;

        register(&registry, &hostdiag_disk_usage_percent)?;
        register(&registry, &hostdiag_disk_total_gb)?;
        register(&registry, &hostdiag_disk_status)?;
        register(&registry, &hostdiag_memory_usage_percent)?;
        register(&registry, &hostdiag_memory_total_gb)?;
        register(&registry, &hostdiag_swap_usage_percent)?;
        register(&registry, &hostdiag_cpu_usage_percent)?;
        register(&registry, &hostdiag_cpu_core_usage_percent)?;
        register(&registry, &hostdiag_cpu_temperature_celsius)?;
        register(&registry, &hostdiag_net_iface_up)?;
        register(&registry, &hostdiag_localhost_connectivity)?;
        register(&registry, &hostdiag_process_count)?;
        register(&registry, &hostdiag_issues)?;
        register(&registry, &hostdiag_domain_status)?;
        register(&registry, &hostdiag_report_timestamp_seconds)?;

        Ok(Self {
            registry,
            hostdiag_disk_usage_percent,
            hostdiag_disk_total_gb,
            hostdiag_disk_status,
            hostdiag_memory_usage_percent,
            hostdiag_memory_total_gb,
            hostdiag_swap_usage_percent,
            hostdiag_cpu_usage_percent,
            hostdiag_cpu_core_usage_percent,
            hostdiag_cpu_temperature_celsius,
            hostdiag_net_iface_up,
            hostdiag_localhost_connectivity,
            hostdiag_process_count,
            hostdiag_issues,
            hostdiag_domain_status,
            hostdiag_report_timestamp_seconds,
        })
    }

    /// Labelled series of domains that were not checked stay empty.
    pub fn update_from_report(&self, report: &DiagnosticReport) {
        self.hostdiag_disk_usage_percent.reset();
        self.hostdiag_disk_total_gb.reset();
        self.hostdiag_disk_status.reset();
        self.hostdiag_cpu_core_usage_percent.reset();
        self.hostdiag_cpu_temperature_celsius.reset();
        self.hostdiag_net_iface_up.reset();
        self.hostdiag_domain_status.reset();

        for (device, d) in &report.disk_health {
            let labels = [device.as_str(), d.mountpoint.as_str()];
            if let Some(pct) = d.percent_used {
                self.hostdiag_disk_usage_percent
                    .with_label_values(&labels)
                    .set(pct);
            }
            if let Some(total) = d.total_gb {
                self.hostdiag_disk_total_gb
                    .with_label_values(&labels)
                    .set(total);
            }
            self.hostdiag_disk_status
                .with_label_values(&labels)
                .set(f64::from(d.status.code()));
        }
        if let Some(worst) = report.disk_health.values().map(|d| d.status.code()).max() {
            self.set_domain("disk", worst);
        }

        if let Some(mem) = &report.memory_health {
            self.hostdiag_memory_usage_percent.set(mem.percent_used);
            self.hostdiag_memory_total_gb.set(mem.total_gb);
            self.hostdiag_swap_usage_percent.set(mem.swap_percent);
            self.set_domain("memory", mem.status.code());
        }

        if let Some(cpu) = &report.cpu_health {
            self.hostdiag_cpu_usage_percent.set(cpu.usage_percent);
            for (i, pct) in cpu.per_core_percent.iter().enumerate() {
                self.hostdiag_cpu_core_usage_percent
                    .with_label_values(&[&i.to_string()])
                    .set(*pct);
            }
            for (sensor, t) in cpu.temperatures.iter().flatten() {
                self.hostdiag_cpu_temperature_celsius
                    .with_label_values(&[sensor.as_str()])
                    .set(t.current);
            }
            self.set_domain("cpu", cpu.status.code());
        }

        if let Some(net) = &report.network_health {
            for (iface, entry) in &net.interfaces {
                self.hostdiag_net_iface_up
                    .with_label_values(&[iface.as_str()])
                    .set(if entry.is_up { 1.0 } else { 0.0 });
            }
            self.hostdiag_localhost_connectivity
                .set(if net.localhost_connectivity { 1.0 } else { 0.0 });
        }

        if let Some(procs) = &report.process_health {
            self.hostdiag_process_count
                .set(procs.total_processes as f64);
        }

        self.hostdiag_issues.set(report.issues.len() as f64);
        if let Some(ts) = report_unix_seconds(&report.timestamp) {
            self.hostdiag_report_timestamp_seconds.set(ts);
        }
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes through a sibling temp file and a rename, so the textfile
    /// collector never reads a half-written file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let body = self.encode_metrics()?;
        let tmp = path.with_extension("prom.tmp");
        let write_err = |source: io::Error| MetricsError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, body).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }

    fn set_domain(&self, domain: &str, code: u8) {
        self.hostdiag_domain_status
            .with_label_values(&[domain])
            .set(f64::from(code));
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn report_unix_seconds(timestamp: &str) -> Option<f64> {
    let at = humantime::parse_rfc3339_weak(timestamp).ok()?;
    let secs = at.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(secs.as_secs_f64())
}
