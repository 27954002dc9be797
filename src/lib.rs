//! # Hoptrace - Delivery analysis for simulated device/relay/hub transfer traces
//!
//! This library parses the per-transfer trace written by an edge network
//! simulator and aggregates it at device, relay and network level.
//!
//! ## Overview
//!
//! Each trace row records one data transfer from a measurement device through
//! its relay to a hub (and optionally a tier-2 endpoint), with per-hop elapsed
//! times and distances and a deadline outcome. Hoptrace reduces a trace into
//! success rates, deadline-miss rates and hop-by-hop latency averages.
//!
//! ## Key Features
//!
//! - **Two trace layouts**: with or without an explicit relay target column
//! - **Tolerant ingest**: malformed rows are counted and skipped, never fatal
//! - **Two-level averaging**: relay and network averages weigh each device equally
//! - **Sharded ingest**: optional parallel pass with row-order merge
//! - **Reports**: JSON, plain text and a stdout summary
//!
//! ## Architecture
//!
//! - `config`: Analysis configuration, column schemas and validation
//! - `config_loader`: YAML loading and CLI overrides
//! - `analysis::path_decoder`: Hop-by-hop path string decoding
//! - `analysis::normalizer`: Row validation into typed transfer records
//! - `analysis::store`: Incremental device, relay and global accumulators
//! - `analysis::statistics`: Derived rates and averages
//! - `analysis::trace_reader`: File ingest, sequential or sharded
//! - `analysis::network_usage`: Simulator network usage side input
//! - `analysis::state_estimation`: Simulator state-estimation task log
//! - `analysis::report`: JSON and text report generation
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use hoptrace::analysis;
//! use hoptrace::config::{AnalysisConfig, ColumnSchema};
//!
//! let config = AnalysisConfig::for_trace("output/trace.csv", ColumnSchema::WithRelayTarget);
//! let report = analysis::analyze(&config)?;
//!
//! for device in &report.statistics.devices {
//!     println!("{}: {:.1}% on time", device.device_id, device.success_rate);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! trace:
//!   path: "output/trace.csv"
//!   schema: with_relay_target   # or path_only
//!   has_header: true
//! relay_prefix: RELAY
//! network_usage_path: "output/network_usage.csv"
//! state_estimation_path: "output/state_estimation.csv"
//! output_dir: analysis_output
//! threads: 4
//! ```
//!
//! ## Error Handling
//!
//! Row-level problems are reported through [`analysis::IngestSummary`]. Only a
//! missing or unreadable trace file aborts a run. The binary uses `color_eyre`
//! for error reporting with context.

pub mod analysis;
pub mod config;
pub mod config_loader;
