mod collectors;
mod config;
mod metrics;
mod pipeline;
mod recommendations;
mod report;

use clap::Parser;
use collectors::system::SysinfoProvider;
use config::Config;
use metrics::Metrics;
use pipeline::{Check, DiagnosticPipeline};
use report::{DiagnosticReport, ReportFormat};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "./hostdiag.yaml";

#[derive(Parser, Debug)]
#[command(name = "hostdiag")]
#[command(version, about = "Point-in-time host health diagnostics")]
struct Cli {
    /// YAML configuration; optional unless given explicitly.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Run only these checks, e.g. `--only disk,memory`.
    #[arg(long, value_enum, value_delimiter = ',')]
    only: Vec<Check>,
    /// Save the report under a timestamped name in the report directory.
    #[arg(long)]
    save: bool,
    /// Save the report to this path.
    #[arg(long, short)]
    output: Option<PathBuf>,
    #[arg(long, value_enum)]
    format: Option<ReportFormat>,
    /// Write Prometheus textfile-collector metrics to this path.
    #[arg(long)]
    metrics_file: Option<PathBuf>,
    /// Suppress progress output; the summary is still printed.
    #[arg(long, short)]
    quiet: bool,
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return ExitCode::SUCCESS;
    }

    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
    };
    let mut cfg = match Config::load_or_default(&config_path, required) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(format) = cli.format {
        cfg.report.format = format;
    }
    if cli.metrics_file.is_some() {
        cfg.metrics_file = cli.metrics_file.clone();
    }
    cfg.report.save |= cli.save;

    let checks = if cli.only.is_empty() {
        cfg.selected_checks()
    } else {
        cli.only.clone()
    };
    info!(
        config = %config_path.display(),
        checks = ?checks,
        "starting hostdiag"
    );

    let mut pipeline =
        DiagnosticPipeline::new(SysinfoProvider::new(), cfg.pipeline_settings(!cli.quiet));
    if checks == Check::ALL {
        pipeline.run_all();
    } else {
        pipeline.run_selected(&checks);
    }
    pipeline.print_summary();

    // Failures are logged by save_report and never change the exit status.
    if let Some(path) = &cli.output {
        let _ = pipeline.save_report(Some(path));
    } else if cfg.report.save {
        let _ = pipeline.save_report(None);
    }

    if let Some(path) = &cfg.metrics_file {
        export_metrics(pipeline.report(), path);
    }

    if pipeline.report().has_issues() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn export_metrics(report: &DiagnosticReport, path: &Path) {
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            return;
        }
    };
    metrics.update_from_report(report);
    match metrics.write_textfile(path) {
        Ok(()) => info!(path = %path.display(), "metrics written"),
        Err(err) => error!(error = %err, "metrics not written"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_accepts_comma_separated_checks() {
        let cli = Cli::try_parse_from(["hostdiag", "--only", "disk,memory,disk-errors"])
            .unwrap();
        assert_eq!(
            cli.only,
            vec![Check::Disk, Check::Memory, Check::DiskErrors]
        );
        assert!(!cli.save);
    }

    #[test]
    fn format_and_output_flags() {
        let cli = Cli::try_parse_from([
            "hostdiag",
            "--format",
            "yaml",
            "-o",
            "out.yaml",
            "--quiet",
        ])
        .unwrap();
        assert_eq!(cli.format, Some(ReportFormat::Yaml));
        assert_eq!(cli.output, Some(PathBuf::from("out.yaml")));
        assert!(cli.quiet);
    }

    #[test]
    fn unknown_check_is_rejected() {
        assert!(Cli::try_parse_from(["hostdiag", "--only", "gpu"]).is_err());
    }
}
