//! Transfer trace analysis CLI.
//!
//! Reads a device/relay/hub transfer trace and writes delivery and latency
//! reports.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result};
use env_logger::Env;
use log::info;

use hoptrace::analysis;
use hoptrace::config::{AnalysisConfig, ColumnSchema};
use hoptrace::config_loader::{self, ConfigOverrides};

#[derive(Parser, Debug)]
#[command(name = "hoptrace")]
#[command(about = "Delivery and latency analysis for device/relay/hub transfer traces")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an analysis configuration YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the transfer trace CSV (overrides the config file)
    #[arg(short, long)]
    trace: Option<PathBuf>,

    /// Trace column layout (overrides the config file)
    #[arg(long, value_enum)]
    schema: Option<SchemaArg>,

    /// Simulator network usage CSV to include in reports
    #[arg(long)]
    network_usage: Option<PathBuf>,

    /// Simulator state-estimation task log to include in reports
    #[arg(long)]
    state_estimation: Option<PathBuf>,

    /// Output directory for reports
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of ingest shards and worker threads (0 = single pass)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze the trace and write reports
    Report {
        /// Skip the JSON report
        #[arg(long)]
        no_json: bool,

        /// Skip the text report
        #[arg(long)]
        no_text: bool,
    },

    /// Show summary statistics
    Summary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SchemaArg {
    PathOnly,
    WithRelayTarget,
}

impl From<SchemaArg> for ColumnSchema {
    fn from(arg: SchemaArg) -> Self {
        match arg {
            SchemaArg::PathOnly => ColumnSchema::PathOnly,
            SchemaArg::WithRelayTarget => ColumnSchema::WithRelayTarget,
        }
    }
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            trace: self.trace.clone(),
            schema: self.schema.map(ColumnSchema::from),
            output_dir: self.output.clone(),
            network_usage: self.network_usage.clone(),
            state_estimation: self.state_estimation.clone(),
            threads: self.threads,
        }
    }

    fn resolve_config(&self) -> Result<AnalysisConfig> {
        let overrides = self.overrides();
        match self.config {
            Some(ref path) => {
                let mut config = config_loader::load_config(path)?;
                config_loader::apply_overrides(&mut config, &overrides)?;
                Ok(config)
            }
            None => config_loader::config_from_overrides(&overrides),
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    let config = cli.resolve_config()?;

    // Set thread pool size
    if config.threads > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    info!("Trace file: {}", config.trace.path.display());
    let report = analysis::analyze(&config)?;

    match cli.command {
        Commands::Report { no_json, no_text } => {
            fs::create_dir_all(&config.output_dir).with_context(|| {
                format!(
                    "Failed to create output directory: {}",
                    config.output_dir.display()
                )
            })?;

            if !no_json {
                analysis::generate_json_report(&report, &config.output_dir.join("trace_analysis.json"))?;
            }
            if !no_text {
                analysis::generate_text_report(&report, &config.output_dir.join("trace_analysis.txt"))?;
            }
            analysis::print_summary(&report);
        }
        Commands::Summary => {
            analysis::print_summary(&report);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "hoptrace",
            "--trace", "trace.csv",
            "--schema", "path-only",
            "-j", "4",
            "--state-estimation", "tasks.csv",
            "report",
            "--no-text",
        ]);

        assert_eq!(cli.trace, Some(PathBuf::from("trace.csv")));
        assert_eq!(cli.schema, Some(SchemaArg::PathOnly));
        assert_eq!(cli.threads, Some(4));
        assert_eq!(cli.state_estimation, Some(PathBuf::from("tasks.csv")));
        assert!(matches!(
            cli.command,
            Commands::Report { no_json: false, no_text: true }
        ));
    }

    #[test]
    fn test_cli_without_config_uses_defaults() {
        let cli = Cli::parse_from(["hoptrace", "--trace", "trace.csv", "summary"]);
        let config = cli.resolve_config().unwrap();

        assert_eq!(config.trace.schema, ColumnSchema::WithRelayTarget);
        assert_eq!(config.output_dir, PathBuf::from("analysis_output"));
        assert_eq!(config.threads, 0);
    }
}
