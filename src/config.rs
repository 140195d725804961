use crate::pipeline::{Check, PipelineSettings};
use crate::report::ReportFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MAX_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub checks: ChecksConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChecksConfig {
    #[serde(default = "default_enabled")]
    pub system_info: bool,
    #[serde(default = "default_enabled")]
    pub disk: bool,
    #[serde(default = "default_enabled")]
    pub memory: bool,
    #[serde(default = "default_enabled")]
    pub cpu: bool,
    #[serde(default = "default_enabled")]
    pub network: bool,
    #[serde(default = "default_enabled")]
    pub processes: bool,
    #[serde(default = "default_enabled")]
    pub disk_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SamplingConfig {
    #[serde(default = "default_cpu_window_ms")]
    pub cpu_window_ms: u64,
    #[serde(default = "default_process_window_ms")]
    pub process_window_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub save: bool,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default = "default_report_directory")]
    pub directory: PathBuf,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            system_info: true,
            disk: true,
            memory: true,
            cpu: true,
            network: true,
            processes: true,
            disk_errors: true,
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            cpu_window_ms: default_cpu_window_ms(),
            process_window_ms: default_process_window_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            save: false,
            format: ReportFormat::default(),
            directory: default_report_directory(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("cannot parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`Config::load_from_file`], but a missing file yields the
    /// defaults when `required` is false.
    pub fn load_or_default(path: impl AsRef<Path>, required: bool) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Err(ConfigError::Read { source, .. })
                if !required && source.kind() == io::ErrorKind::NotFound =>
            {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_window("sampling.cpu_window_ms", self.sampling.cpu_window_ms)?;
        validate_window(
            "sampling.process_window_ms",
            self.sampling.process_window_ms,
        )?;
        if self.sampling.probe_timeout_ms < 1 {
            return Err(ConfigError::Validation(
                "sampling.probe_timeout_ms must be >= 1".to_string(),
            ));
        }
        if self.report.directory.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "report.directory must not be empty".to_string(),
            ));
        }
        if self
            .metrics_file
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(ConfigError::Validation(
                "metrics_file must not be empty when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Enabled checks, in execution order.
    pub fn selected_checks(&self) -> Vec<Check> {
        let c = &self.checks;
        Check::ALL
            .into_iter()
            .filter(|check| match check {
                Check::SystemInfo => c.system_info,
                Check::Disk => c.disk,
                Check::Memory => c.memory,
                Check::Cpu => c.cpu,
                Check::Network => c.network,
                Check::Processes => c.processes,
                Check::DiskErrors => c.disk_errors,
            })
            .collect()
    }

    pub fn pipeline_settings(&self, echo: bool) -> PipelineSettings {
        PipelineSettings {
            cpu_window: Duration::from_millis(self.sampling.cpu_window_ms),
            process_window: Duration::from_millis(self.sampling.process_window_ms),
            probe_timeout: Duration::from_millis(self.sampling.probe_timeout_ms),
            report_format: self.report.format,
            report_dir: self.report.directory.clone(),
            echo,
        }
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_window(field: &str, value_ms: u64) -> Result<(), ConfigError> {
    if !(1..=MAX_WINDOW_MS).contains(&value_ms) {
        return Err(ConfigError::Validation(format!(
            "{field} must be in range 1..={MAX_WINDOW_MS}"
        )));
    }
    Ok(())
}

const fn default_enabled() -> bool {
    true
}

const fn default_cpu_window_ms() -> u64 {
    1000
}

const fn default_process_window_ms() -> u64 {
    500
}

const fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_report_directory() -> PathBuf {
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn example_config_parses_to_defaults() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.checks, ChecksConfig::default());
        assert_eq!(cfg.sampling, SamplingConfig::default());
        assert_eq!(cfg.report.format, ReportFormat::Json);
        assert!(!cfg.report.save);
        assert!(cfg.metrics_file.is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.selected_checks(), Check::ALL.to_vec());
    }

    #[test]
    fn disabled_checks_are_filtered_in_order() {
        let yaml = "checks:\n  cpu: false\n  processes: false\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            cfg.selected_checks(),
            vec![
                Check::SystemInfo,
                Check::Disk,
                Check::Memory,
                Check::Network,
                Check::DiskErrors,
            ]
        );
    }

    #[test]
    fn windows_out_of_range_are_rejected() {
        let mut cfg = Config::default();
        cfg.sampling.cpu_window_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.sampling.process_window_ms = MAX_WINDOW_MS + 1;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));

        let mut cfg = Config::default();
        cfg.sampling.probe_timeout_ms = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn settings_follow_config() {
        let yaml = "sampling:\n  cpu_window_ms: 250\n  probe_timeout_ms: 1500\nreport:\n  format: yaml\n  directory: /tmp/reports\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let settings = cfg.pipeline_settings(false);
        assert_eq!(settings.cpu_window, Duration::from_millis(250));
        assert_eq!(settings.process_window, Duration::from_millis(500));
        assert_eq!(settings.probe_timeout, Duration::from_millis(1500));
        assert_eq!(settings.report_format, ReportFormat::Yaml);
        assert_eq!(settings.report_dir, PathBuf::from("/tmp/reports"));
        assert!(!settings.echo);
    }

    #[test]
    fn missing_optional_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        assert_eq!(
            Config::load_or_default(&path, false).unwrap(),
            Config::default()
        );
        assert!(matches!(
            Config::load_or_default(&path, true),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn broken_yaml_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "checks: [not, a, table").unwrap();
        assert!(matches!(
            Config::load_from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn invalid_values_fail_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sampling:\n  cpu_window_ms: 120000").unwrap();
        let err = Config::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("sampling.cpu_window_ms"));
    }
}
