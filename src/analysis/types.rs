//! Core data types for transfer trace analysis.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Simulation timestamp in seconds since simulation start
pub type SimTime = f64;

/// Device identifier as written by the simulator (unique, not necessarily contiguous)
pub type DeviceId = u32;

/// One segment type in the fixed routing topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HopClass {
    /// First hop: device to its relay
    DeviceToRelay,
    /// Second hop: relay to hub
    RelayToHub,
    /// Third hop: hub to the tier-2 endpoint
    HubToTier2,
}

impl HopClass {
    pub const ALL: [HopClass; 3] = [
        HopClass::DeviceToRelay,
        HopClass::RelayToHub,
        HopClass::HubToTier2,
    ];

    /// Hop class for the hop at `index` in a decoded path (0 = first hop)
    pub fn from_position(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            HopClass::DeviceToRelay => "device_to_relay",
            HopClass::RelayToHub => "relay_to_hub",
            HopClass::HubToTier2 => "hub_to_tier2",
        }
    }

    /// Arrow form used in text reports
    pub fn arrow(self) -> &'static str {
        match self {
            HopClass::DeviceToRelay => "DEVICE -> RELAY",
            HopClass::RelayToHub => "RELAY -> HUB",
            HopClass::HubToTier2 => "HUB -> TIER2",
        }
    }
}

impl fmt::Display for HopClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One value per hop class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerHopClass<T> {
    pub device_to_relay: T,
    pub relay_to_hub: T,
    pub hub_to_tier2: T,
}

impl<T> PerHopClass<T> {
    pub fn from_fn(mut f: impl FnMut(HopClass) -> T) -> Self {
        Self {
            device_to_relay: f(HopClass::DeviceToRelay),
            relay_to_hub: f(HopClass::RelayToHub),
            hub_to_tier2: f(HopClass::HubToTier2),
        }
    }

    pub fn get(&self, class: HopClass) -> &T {
        match class {
            HopClass::DeviceToRelay => &self.device_to_relay,
            HopClass::RelayToHub => &self.relay_to_hub,
            HopClass::HubToTier2 => &self.hub_to_tier2,
        }
    }

    pub fn get_mut(&mut self, class: HopClass) -> &mut T {
        match class {
            HopClass::DeviceToRelay => &mut self.device_to_relay,
            HopClass::RelayToHub => &mut self.relay_to_hub,
            HopClass::HubToTier2 => &mut self.hub_to_tier2,
        }
    }
}

/// A single decoded hop of a routed path.
///
/// `relay_id` is `None` when the hop token could not be parsed; elapsed time
/// and distance are then zero and the hop is left out of aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopSegment {
    pub relay_id: Option<String>,
    pub elapsed_seconds: f64,
    pub distance_meters: f64,
}

impl HopSegment {
    pub fn malformed() -> Self {
        Self {
            relay_id: None,
            elapsed_seconds: 0.0,
            distance_meters: 0.0,
        }
    }

    pub fn is_decoded(&self) -> bool {
        self.relay_id.is_some()
    }
}

/// Delivery outcome reported by the simulator's status token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    OnTime,
    DeadlineMissed,
}

impl Outcome {
    pub fn is_on_time(self) -> bool {
        self == Outcome::OnTime
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::OnTime => write!(f, "ON_TIME"),
            Outcome::DeadlineMissed => write!(f, "DEADLINE_MISSED"),
        }
    }
}

/// Planar device position in meters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One reported data transfer, typed and validated
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub timestamp: SimTime,
    pub device_id: DeviceId,
    /// `None` when the coordinates token was unparseable
    pub device_position: Option<Position>,
    pub data_size_kb: f64,
    /// Explicit target column, present only in the 8-column schema
    pub relay_target: Option<String>,
    pub path: Vec<HopSegment>,
    /// Sum of all hop elapsed times ("hop sum")
    pub total_elapsed_seconds: f64,
    pub outcome: Outcome,
}

impl TransferRecord {
    /// Relay named by the first hop, if that hop decoded
    pub fn access_relay(&self) -> Option<&str> {
        self.path.first().and_then(|hop| hop.relay_id.as_deref())
    }
}

/// Row-local failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseErrorKind {
    SchemaMismatch,
    MalformedPath,
    BadCoordinates,
    UnknownStatus,
    InvalidField,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseErrorKind::SchemaMismatch => "schema mismatch",
            ParseErrorKind::MalformedPath => "malformed path",
            ParseErrorKind::BadCoordinates => "bad coordinates",
            ParseErrorKind::UnknownStatus => "unknown status",
            ParseErrorKind::InvalidField => "invalid field",
        };
        write!(f, "{}", name)
    }
}

/// Bookkeeping for one pass over a trace file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSummary {
    /// Non-empty data rows seen (header excluded)
    pub rows_read: usize,
    /// Rows that reached the aggregation store
    pub rows_accepted: usize,
    /// Rejected rows by failure kind
    pub rows_rejected: BTreeMap<ParseErrorKind, usize>,
    /// Accepted rows whose coordinates could not be parsed
    pub bad_coordinates: usize,
    /// Hop tokens that did not match the expected pattern
    pub malformed_hops: usize,
}

impl IngestSummary {
    pub fn total_rejected(&self) -> usize {
        self.rows_rejected.values().sum()
    }

    pub fn reject(&mut self, kind: ParseErrorKind) {
        *self.rows_rejected.entry(kind).or_insert(0) += 1;
    }

    /// Add the counters of another (later) pass
    pub fn merge(&mut self, other: IngestSummary) {
        self.rows_read += other.rows_read;
        self.rows_accepted += other.rows_accepted;
        for (kind, count) in other.rows_rejected {
            *self.rows_rejected.entry(kind).or_insert(0) += count;
        }
        self.bad_coordinates += other.bad_coordinates;
        self.malformed_hops += other.malformed_hops;
    }
}

// ============================================================================
// Derived statistics
// ============================================================================

/// Per-device summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: DeviceId,
    /// First relay the device was seen routing through
    pub relay_id: Option<String>,
    /// First successfully parsed position
    pub position: Option<Position>,
    pub total: usize,
    pub on_time: usize,
    pub deadline_missed: usize,
    /// Percentage of on-time transfers (0.0 when no transfers)
    pub success_rate: f64,
    pub deadline_missed_rate: f64,
    pub avg_times_by_hop_class: PerHopClass<f64>,
    pub avg_distances_by_hop_class: PerHopClass<f64>,
    pub samples_by_hop_class: PerHopClass<usize>,
    /// Mean hop sum over all of the device's transfers
    pub avg_total_elapsed: f64,
}

/// Per-relay summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayStats {
    pub relay_id: String,
    pub total: usize,
    pub on_time: usize,
    pub success_rate: f64,
    /// Distinct devices that routed at least one transfer through the relay
    pub device_count: usize,
    /// Mean of per-device device-to-relay averages of the devices assigned to the relay
    pub avg_time_to_relay: f64,
    pub avg_total_elapsed: f64,
    /// Mean PDC waiting time of the relay's state-estimation tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_pdc_waiting_time: Option<f64>,
    /// Mean total processing time of the relay's state-estimation tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_total_time: Option<f64>,
}

/// Totals over every ingested transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_transfers: usize,
    pub on_time: usize,
    pub deadline_missed: usize,
    pub deadline_missed_rate: f64,
}

/// Network-wide hop-by-hop averages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopClassSummary {
    /// Mean of per-device average times, over devices with samples in the class
    pub avg_times: PerHopClass<f64>,
    pub avg_distances: PerHopClass<f64>,
    pub devices_with_samples: PerHopClass<usize>,
    pub total_path_time: f64,
    pub total_path_distance: f64,
}

/// Transfer payload size statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSizeStats {
    pub count: usize,
    pub mean_kb: f64,
    pub min_kb: f64,
    pub max_kb: f64,
    /// Sample standard deviation (n - 1)
    pub std_dev_kb: f64,
    pub total_kb: f64,
}

/// Data volume carried over one hop class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerVolume {
    pub hop_class: HopClass,
    pub total_kb: f64,
    pub transfers: usize,
    pub avg_kb: f64,
}

/// Mean hop sum per explicit relay target column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub relay_target: String,
    pub samples: usize,
    pub avg_total_elapsed: f64,
}

/// Everything derived from one aggregation store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub global: GlobalStats,
    /// Sorted ascending by device id
    pub devices: Vec<DeviceStats>,
    /// Sorted lexicographically by relay id
    pub relays: Vec<RelayStats>,
    pub hop_classes: HopClassSummary,
    pub data_size: DataSizeStats,
    pub layer_volumes: Vec<LayerVolume>,
    pub relay_targets: Vec<TargetStats>,
}

/// Count, mean, extremes and sample standard deviation of one measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// State-estimation task outcomes and timings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub success_rate: f64,
    /// Successful tasks only
    pub exec_time: SampleStats,
    pub pdc_waiting_time: SampleStats,
    pub total_time: SampleStats,
    pub complete_batches: usize,
    pub timeout_batches: usize,
    pub complete_batch_rate: f64,
}

/// One row of the simulator's network usage CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkUsageRow {
    pub network_level: String,
    pub total_data_volume_kb: f64,
    pub transfer_count: u64,
    pub average_data_size_kb: f64,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub analysis_timestamp: String,
    pub trace_path: String,
    pub schema: String,
}

/// Complete analysis report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub metadata: AnalysisMetadata,
    pub ingest: IngestSummary,
    pub statistics: StatisticsReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_usage: Option<Vec<NetworkUsageRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskStats>,
}
