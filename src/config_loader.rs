use crate::config::{AnalysisConfig, ColumnSchema};
use color_eyre::eyre::{Context, Result};
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<AnalysisConfig> {
    info!("Loading configuration from: {:?}", config_path);

    // Open the configuration file
    let file = File::open(config_path)
        .with_context(|| format!("Failed to open config file {}", config_path.display()))?;

    // Parse the YAML content
    let config: AnalysisConfig = serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;

    // Validate the configuration
    config.validate()?;

    Ok(config)
}

/// CLI arguments that can override YAML settings
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub trace: Option<PathBuf>,
    pub schema: Option<ColumnSchema>,
    pub output_dir: Option<PathBuf>,
    pub network_usage: Option<PathBuf>,
    pub state_estimation: Option<PathBuf>,
    pub threads: Option<usize>,
}

/// Apply CLI overrides to a loaded configuration
pub fn apply_overrides(config: &mut AnalysisConfig, overrides: &ConfigOverrides) -> Result<()> {
    if let Some(ref trace) = overrides.trace {
        info!("Trace path override: {}", trace.display());
        config.trace.path = trace.clone();
    }

    if let Some(schema) = overrides.schema {
        // A schema switch also switches the conventional status literals
        config.trace.schema = schema;
    }

    if let Some(ref output_dir) = overrides.output_dir {
        config.output_dir = output_dir.clone();
    }

    if let Some(ref usage) = overrides.network_usage {
        config.network_usage_path = Some(usage.clone());
    }

    if let Some(ref tasks) = overrides.state_estimation {
        config.state_estimation_path = Some(tasks.clone());
    }

    if let Some(threads) = overrides.threads {
        config.threads = threads;
    }

    // Re-validate after applying overrides
    config.validate()?;

    Ok(())
}

/// Build a configuration from CLI arguments alone
pub fn config_from_overrides(overrides: &ConfigOverrides) -> Result<AnalysisConfig> {
    let trace = overrides
        .trace
        .clone()
        .ok_or_else(|| color_eyre::eyre::eyre!("Either --config or --trace must be given"))?;

    let mut config =
        AnalysisConfig::for_trace(trace, overrides.schema.unwrap_or(ColumnSchema::WithRelayTarget));
    apply_overrides(&mut config, overrides)?;
    Ok(config)
}
