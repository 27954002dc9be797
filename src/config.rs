use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::analysis::normalizer::StatusMap;
use crate::analysis::path_decoder::DEFAULT_RELAY_PREFIX;
use crate::analysis::types::Outcome;

/// Column layout variants written by the simulator
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSchema {
    /// `Time,DeviceID,DeviceCoordinates,DataSize,Path,HopSum,Status`
    PathOnly,
    /// `Time,DeviceID,DeviceCoordinates,DataSize,RelayTarget,Path,HopSum,Status`
    WithRelayTarget,
}

/// Column indices for one schema variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub time: usize,
    pub device_id: usize,
    pub coordinates: usize,
    pub data_size: usize,
    pub relay_target: Option<usize>,
    pub path: usize,
    pub hop_sum: usize,
    pub status: usize,
}

impl ColumnSchema {
    pub fn column_count(self) -> usize {
        self.header().len()
    }

    pub fn header(self) -> &'static [&'static str] {
        match self {
            ColumnSchema::PathOnly => &[
                "Time", "DeviceID", "DeviceCoordinates", "DataSize", "Path", "HopSum", "Status",
            ],
            ColumnSchema::WithRelayTarget => &[
                "Time", "DeviceID", "DeviceCoordinates", "DataSize", "RelayTarget", "Path", "HopSum",
                "Status",
            ],
        }
    }

    pub fn layout(self) -> ColumnLayout {
        // Columns after the optional target shift by one
        let shift = match self {
            ColumnSchema::PathOnly => 0,
            ColumnSchema::WithRelayTarget => 1,
        };
        ColumnLayout {
            time: 0,
            device_id: 1,
            coordinates: 2,
            data_size: 3,
            relay_target: (shift == 1).then_some(4),
            path: 4 + shift,
            hop_sum: 5 + shift,
            status: 6 + shift,
        }
    }

    /// Status literals the simulator writes for this variant
    pub fn conventional_status_map(self) -> StatusMap {
        match self {
            ColumnSchema::PathOnly => StatusMap::short_codes(),
            ColumnSchema::WithRelayTarget => StatusMap::ok_deadline_missed(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ColumnSchema::PathOnly => "path_only",
            ColumnSchema::WithRelayTarget => "with_relay_target",
        }
    }
}

/// Analysis configuration passed explicitly into the core
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisConfig {
    pub trace: TraceConfig,
    /// Replaces the schema's conventional status literals when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_tokens: Option<StatusMap>,
    #[serde(default = "default_relay_prefix")]
    pub relay_prefix: String,
    /// Simulator network usage CSV, reported alongside the trace-derived volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_usage_path: Option<PathBuf>,
    /// Simulator state-estimation task log, summarized per relay and overall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_estimation_path: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Number of ingest shards (0 or 1 = single sequential pass)
    #[serde(default)]
    pub threads: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TraceConfig {
    pub path: PathBuf,
    pub schema: ColumnSchema,
    #[serde(default = "default_has_header")]
    pub has_header: bool,
}

fn default_relay_prefix() -> String {
    DEFAULT_RELAY_PREFIX.to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("analysis_output")
}

fn default_has_header() -> bool {
    true
}

impl AnalysisConfig {
    /// Configuration with defaults for everything but the trace itself
    pub fn for_trace(path: impl Into<PathBuf>, schema: ColumnSchema) -> Self {
        Self {
            trace: TraceConfig {
                path: path.into(),
                schema,
                has_header: true,
            },
            status_tokens: None,
            relay_prefix: default_relay_prefix(),
            network_usage_path: None,
            state_estimation_path: None,
            output_dir: default_output_dir(),
            threads: 0,
        }
    }

    /// Status map in effect: the configured one, or the schema's conventional literals
    pub fn status_map(&self) -> StatusMap {
        self.status_tokens
            .clone()
            .unwrap_or_else(|| self.trace.schema.conventional_status_map())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.trace.path.as_os_str().is_empty() {
            return Err(ValidationError::InvalidTrace(
                "trace path cannot be empty".to_string(),
            ));
        }

        if let Some(tokens) = &self.status_tokens {
            if tokens.is_empty() {
                return Err(ValidationError::InvalidStatusMap(
                    "status_tokens cannot be empty".to_string(),
                ));
            }
            for outcome in [Outcome::OnTime, Outcome::DeadlineMissed] {
                if !tokens.maps_to(outcome) {
                    return Err(ValidationError::InvalidStatusMap(format!(
                        "no status token maps to {}",
                        outcome
                    )));
                }
            }
        }

        let prefix_ok = !self.relay_prefix.is_empty()
            && self
                .relay_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            return Err(ValidationError::InvalidRelayPrefix(self.relay_prefix.clone()));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid trace configuration: {0}")]
    InvalidTrace(String),
    #[error("Invalid status map: {0}")]
    InvalidStatusMap(String),
    #[error("Invalid relay prefix: {0:?}")]
    InvalidRelayPrefix(String),
}
