//! Running accumulators for one ingest pass.
//!
//! [`AggregationStore::ingest`] is the only way records get in. Every
//! accumulator is append-only; first-seen device metadata (position and
//! assigned relay) is never overwritten once set.

use std::collections::{BTreeMap, BTreeSet};

use super::types::*;

/// Sum and count, enough for an incremental mean
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    pub sum: f64,
    pub count: usize,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    /// Mean of the pushed values, 0.0 when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    pub fn merge(&mut self, other: &RunningMean) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

/// Count, extremes and squared sum for payload sizes and task timings
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeAccumulator {
    pub count: usize,
    pub sum: f64,
    pub sum_sq: f64,
    pub min: f64,
    pub max: f64,
}

impl SizeAccumulator {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    pub fn merge(&mut self, other: &SizeAccumulator) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Per-device running state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceAccumulator {
    pub total: usize,
    pub on_time: usize,
    pub hop_times: PerHopClass<RunningMean>,
    pub hop_distances: PerHopClass<RunningMean>,
    pub total_elapsed: RunningMean,
    /// First successfully parsed position
    pub position: Option<Position>,
    /// First relay seen in a decoded access hop
    pub assigned_relay: Option<String>,
}

impl DeviceAccumulator {
    fn merge(&mut self, later: DeviceAccumulator) {
        self.total += later.total;
        self.on_time += later.on_time;
        for class in HopClass::ALL {
            self.hop_times.get_mut(class).merge(later.hop_times.get(class));
            self.hop_distances.get_mut(class).merge(later.hop_distances.get(class));
        }
        self.total_elapsed.merge(&later.total_elapsed);
        if self.position.is_none() {
            self.position = later.position;
        }
        if self.assigned_relay.is_none() {
            self.assigned_relay = later.assigned_relay;
        }
    }
}

/// Per-relay running state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayAccumulator {
    pub total: usize,
    pub on_time: usize,
    /// Devices that routed at least one transfer through this relay
    pub devices: BTreeSet<DeviceId>,
    pub total_elapsed: RunningMean,
}

impl RelayAccumulator {
    fn merge(&mut self, later: RelayAccumulator) {
        self.total += later.total;
        self.on_time += later.on_time;
        self.devices.extend(later.devices);
        self.total_elapsed.merge(&later.total_elapsed);
    }
}

/// Outcome totals over every ingested record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalAccumulator {
    pub total: usize,
    pub on_time: usize,
    pub deadline_missed: usize,
}

impl GlobalAccumulator {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::OnTime => self.on_time += 1,
            Outcome::DeadlineMissed => self.deadline_missed += 1,
        }
    }

    fn merge(&mut self, other: &GlobalAccumulator) {
        self.total += other.total;
        self.on_time += other.on_time;
        self.deadline_missed += other.deadline_missed;
    }
}

/// All accumulators for one analysis run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationStore {
    devices: BTreeMap<DeviceId, DeviceAccumulator>,
    relays: BTreeMap<String, RelayAccumulator>,
    global: GlobalAccumulator,
    data_size: SizeAccumulator,
    /// Payload carried per hop class (sum = KB, count = transfers)
    layer_volumes: PerHopClass<RunningMean>,
    /// Hop sum per explicit relay target column value
    targets: BTreeMap<String, RunningMean>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into every accumulator it can contribute to
    pub fn ingest(&mut self, record: &TransferRecord) {
        let on_time = record.outcome.is_on_time();

        let device = self.devices.entry(record.device_id).or_default();
        device.total += 1;
        if on_time {
            device.on_time += 1;
        }
        device.total_elapsed.push(record.total_elapsed_seconds);

        for (index, hop) in record.path.iter().enumerate() {
            let Some(class) = HopClass::from_position(index) else {
                break;
            };
            if !hop.is_decoded() {
                continue;
            }
            device.hop_times.get_mut(class).push(hop.elapsed_seconds);
            device.hop_distances.get_mut(class).push(hop.distance_meters);
            self.layer_volumes.get_mut(class).push(record.data_size_kb);
        }

        if device.position.is_none() {
            device.position = record.device_position;
        }

        if let Some(relay_id) = record.access_relay() {
            if device.assigned_relay.is_none() {
                device.assigned_relay = Some(relay_id.to_string());
            } else if device.assigned_relay.as_deref() != Some(relay_id) {
                log::debug!(
                    "Device {} routed via {} but stays assigned to {:?}",
                    record.device_id,
                    relay_id,
                    device.assigned_relay
                );
            }

            let relay = self.relays.entry(relay_id.to_string()).or_default();
            relay.total += 1;
            if on_time {
                relay.on_time += 1;
            }
            relay.devices.insert(record.device_id);
            relay.total_elapsed.push(record.total_elapsed_seconds);
        }

        if let Some(target) = &record.relay_target {
            self.targets
                .entry(target.clone())
                .or_default()
                .push(record.total_elapsed_seconds);
        }

        self.data_size.push(record.data_size_kb);
        self.global.record(record.outcome);
    }

    /// Absorb a store built from rows that came after this store's rows.
    ///
    /// First-seen device metadata from `self` wins, so merging shards in row
    /// order gives the same counts and metadata as one sequential pass. Float
    /// sums are added per shard and may differ from it in the last bits.
    pub fn merge(&mut self, later: AggregationStore) {
        for (device_id, accumulator) in later.devices {
            match self.devices.get_mut(&device_id) {
                Some(existing) => existing.merge(accumulator),
                None => {
                    self.devices.insert(device_id, accumulator);
                }
            }
        }
        for (relay_id, accumulator) in later.relays {
            self.relays.entry(relay_id).or_default().merge(accumulator);
        }
        for (target, mean) in later.targets {
            self.targets.entry(target).or_default().merge(&mean);
        }
        for class in HopClass::ALL {
            self.layer_volumes.get_mut(class).merge(later.layer_volumes.get(class));
        }
        self.global.merge(&later.global);
        self.data_size.merge(&later.data_size);
    }

    pub fn devices(&self) -> &BTreeMap<DeviceId, DeviceAccumulator> {
        &self.devices
    }

    pub fn relays(&self) -> &BTreeMap<String, RelayAccumulator> {
        &self.relays
    }

    pub fn global(&self) -> &GlobalAccumulator {
        &self.global
    }

    pub fn data_size(&self) -> &SizeAccumulator {
        &self.data_size
    }

    pub fn layer_volumes(&self) -> &PerHopClass<RunningMean> {
        &self.layer_volumes
    }

    pub fn targets(&self) -> &BTreeMap<String, RunningMean> {
        &self.targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(relay: &str, t: f64, d: f64) -> HopSegment {
        HopSegment {
            relay_id: Some(relay.to_string()),
            elapsed_seconds: t,
            distance_meters: d,
        }
    }

    fn record(device_id: DeviceId, x: f64, path: Vec<HopSegment>, outcome: Outcome) -> TransferRecord {
        let total = path.iter().map(|h| h.elapsed_seconds).sum();
        TransferRecord {
            timestamp: 0.0,
            device_id,
            device_position: Some(Position { x, y: 0.0 }),
            data_size_kb: 2.0,
            relay_target: None,
            path,
            total_elapsed_seconds: total,
            outcome,
        }
    }

    #[test]
    fn test_first_seen_position_and_relay_are_sticky() {
        let mut store = AggregationStore::new();
        store.ingest(&record(7, 1.0, vec![hop("RELAY_1", 0.1, 10.0)], Outcome::OnTime));
        store.ingest(&record(7, 99.0, vec![hop("RELAY_2", 0.3, 30.0)], Outcome::OnTime));

        let device = &store.devices()[&7];
        assert_eq!(device.position, Some(Position { x: 1.0, y: 0.0 }));
        assert_eq!(device.assigned_relay.as_deref(), Some("RELAY_1"));
        assert_eq!(device.total, 2);
        assert_eq!(store.relays().len(), 2);
        assert!(store.relays()["RELAY_2"].devices.contains(&7));
    }

    #[test]
    fn test_missing_position_is_filled_by_later_record() {
        let mut store = AggregationStore::new();
        let mut first = record(3, 5.0, vec![], Outcome::OnTime);
        first.device_position = None;
        store.ingest(&first);
        store.ingest(&record(3, 5.0, vec![], Outcome::OnTime));
        assert_eq!(store.devices()[&3].position, Some(Position { x: 5.0, y: 0.0 }));
    }

    #[test]
    fn test_hops_bucket_by_position() {
        let mut store = AggregationStore::new();
        let path = vec![
            HopSegment::malformed(),
            hop("HUB", 0.2, 200.0),
            hop("TIER2", 0.3, 300.0),
            hop("EXTRA", 9.0, 9.0),
        ];
        store.ingest(&record(1, 0.0, path, Outcome::DeadlineMissed));

        let device = &store.devices()[&1];
        assert_eq!(device.hop_times.device_to_relay.count, 0);
        assert_eq!(device.hop_times.relay_to_hub.mean(), 0.2);
        assert_eq!(device.hop_distances.hub_to_tier2.mean(), 300.0);
        assert_eq!(device.assigned_relay, None);
        assert!(store.relays().is_empty());
        assert_eq!(store.layer_volumes().device_to_relay.count, 0);
        assert_eq!(store.layer_volumes().relay_to_hub.sum, 2.0);
        assert_eq!(store.global().deadline_missed, 1);
    }

    #[test]
    fn test_zero_hop_record_still_counts() {
        let mut store = AggregationStore::new();
        store.ingest(&record(4, 0.0, vec![], Outcome::OnTime));
        assert_eq!(store.global().total, 1);
        assert_eq!(store.devices()[&4].total, 1);
        assert_eq!(store.devices()[&4].hop_times.device_to_relay.count, 0);
    }

    #[test]
    fn test_device_totals_reconcile_with_global() {
        let mut store = AggregationStore::new();
        for i in 0..10u32 {
            let outcome = if i % 3 == 0 { Outcome::DeadlineMissed } else { Outcome::OnTime };
            store.ingest(&record(i % 4, 0.0, vec![hop("RELAY_1", 0.1, 1.0)], outcome));
        }
        let device_total: usize = store.devices().values().map(|d| d.total).sum();
        assert_eq!(device_total, store.global().total);
        assert_eq!(store.global().deadline_missed, 4);
    }

    #[test]
    fn test_merge_matches_sequential_ingest() {
        let records = vec![
            record(1, 1.0, vec![hop("RELAY_1", 0.1, 10.0)], Outcome::OnTime),
            record(2, 2.0, vec![hop("RELAY_2", 0.2, 20.0)], Outcome::DeadlineMissed),
            record(1, 50.0, vec![hop("RELAY_2", 0.3, 30.0)], Outcome::OnTime),
            record(3, 3.0, vec![], Outcome::OnTime),
        ];

        let mut sequential = AggregationStore::new();
        records.iter().for_each(|r| sequential.ingest(r));

        let mut head = AggregationStore::new();
        let mut tail = AggregationStore::new();
        records[..2].iter().for_each(|r| head.ingest(r));
        records[2..].iter().for_each(|r| tail.ingest(r));
        head.merge(tail);

        assert_eq!(head, sequential);
    }

    #[test]
    fn test_size_accumulator_merge_into_empty() {
        let mut empty = SizeAccumulator::default();
        let mut other = SizeAccumulator::default();
        other.push(4.0);
        other.push(-1.0);
        empty.merge(&other);
        assert_eq!(empty.min, -1.0);
        assert_eq!(empty.max, 4.0);
        assert_eq!(empty.count, 2);
    }
}
