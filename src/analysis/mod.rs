//! Transfer trace analysis.
//!
//! This module turns the simulator's per-transfer trace into device, relay
//! and network-wide delivery statistics: rows are typed by the normalizer,
//! folded into the aggregation store and reduced into a report.

pub mod types;
pub mod path_decoder;
pub mod normalizer;
pub mod store;
pub mod statistics;
pub mod trace_reader;
pub mod network_usage;
pub mod state_estimation;
pub mod report;

pub use types::*;
pub use normalizer::{normalize, RecordNormalizer, StatusMap};
pub use path_decoder::{decode, PathDecoder};
pub use store::AggregationStore;
pub use statistics::derive;
pub use trace_reader::{ingest_trace, TraceError, TraceIngest};
pub use network_usage::read_network_usage;
pub use state_estimation::{read_state_estimation, TaskAccumulator};
pub use report::{build_report, generate_json_report, generate_text_report, print_summary};

use crate::config::AnalysisConfig;

/// Run one full analysis pass: ingest, derive, attach the side inputs
pub fn analyze(config: &AnalysisConfig) -> Result<AnalysisReport, TraceError> {
    let ingest = ingest_trace(config)?;
    let network_usage = config
        .network_usage_path
        .as_deref()
        .and_then(read_network_usage);
    let tasks = config
        .state_estimation_path
        .as_deref()
        .and_then(|path| read_state_estimation(path, &config.relay_prefix));
    Ok(build_report(config, &ingest, network_usage, tasks.as_ref()))
}
