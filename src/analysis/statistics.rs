//! Reduction of an [`AggregationStore`] into reported statistics.
//!
//! Pure and read-only: [`derive`] walks the store once and never mutates it.
//! Every average and rate falls back to 0.0 when it has nothing to divide by.

use super::store::{AggregationStore, DeviceAccumulator, SizeAccumulator};
use super::types::*;

/// Derive the full statistics report from a populated store
pub fn derive(store: &AggregationStore) -> StatisticsReport {
    // BTreeMap iteration keeps devices ascending by id and relays lexicographic
    let devices: Vec<DeviceStats> = store
        .devices()
        .iter()
        .map(|(device_id, accumulator)| device_stats(*device_id, accumulator))
        .collect();

    let relays = relay_stats(store, &devices);
    let hop_classes = hop_class_summary(&devices);

    let layer_volumes = HopClass::ALL
        .iter()
        .map(|class| {
            let volume = store.layer_volumes().get(*class);
            LayerVolume {
                hop_class: *class,
                total_kb: volume.sum,
                transfers: volume.count,
                avg_kb: volume.mean(),
            }
        })
        .collect();

    let relay_targets = store
        .targets()
        .iter()
        .map(|(target, hop_sum)| TargetStats {
            relay_target: target.clone(),
            samples: hop_sum.count,
            avg_total_elapsed: hop_sum.mean(),
        })
        .collect();

    let global = store.global();
    StatisticsReport {
        global: GlobalStats {
            total_transfers: global.total,
            on_time: global.on_time,
            deadline_missed: global.deadline_missed,
            deadline_missed_rate: percentage(global.deadline_missed, global.total),
        },
        devices,
        relays,
        hop_classes,
        data_size: data_size_stats(store.data_size()),
        layer_volumes,
        relay_targets,
    }
}

fn device_stats(device_id: DeviceId, acc: &DeviceAccumulator) -> DeviceStats {
    let deadline_missed = acc.total - acc.on_time;
    DeviceStats {
        device_id,
        relay_id: acc.assigned_relay.clone(),
        position: acc.position,
        total: acc.total,
        on_time: acc.on_time,
        deadline_missed,
        success_rate: percentage(acc.on_time, acc.total),
        deadline_missed_rate: percentage(deadline_missed, acc.total),
        avg_times_by_hop_class: PerHopClass::from_fn(|class| acc.hop_times.get(class).mean()),
        avg_distances_by_hop_class: PerHopClass::from_fn(|class| {
            acc.hop_distances.get(class).mean()
        }),
        samples_by_hop_class: PerHopClass::from_fn(|class| acc.hop_times.get(class).count),
        avg_total_elapsed: acc.total_elapsed.mean(),
    }
}

/// Relay summaries.
///
/// `avg_time_to_relay` is the mean of the device-level device-to-relay
/// averages of the relay's assigned devices, so each device weighs the same
/// regardless of how many transfers it sent.
fn relay_stats(store: &AggregationStore, devices: &[DeviceStats]) -> Vec<RelayStats> {
    store
        .relays()
        .iter()
        .map(|(relay_id, acc)| {
            let device_means: Vec<f64> = devices
                .iter()
                .filter(|d| d.relay_id.as_deref() == Some(relay_id.as_str()))
                .filter(|d| d.samples_by_hop_class.device_to_relay > 0)
                .map(|d| d.avg_times_by_hop_class.device_to_relay)
                .collect();

            RelayStats {
                relay_id: relay_id.clone(),
                total: acc.total,
                on_time: acc.on_time,
                success_rate: percentage(acc.on_time, acc.total),
                device_count: acc.devices.len(),
                avg_time_to_relay: mean(&device_means),
                avg_total_elapsed: acc.total_elapsed.mean(),
                avg_pdc_waiting_time: None,
                avg_total_time: None,
            }
        })
        .collect()
}

/// Network-wide hop averages, again as a mean of per-device means
fn hop_class_summary(devices: &[DeviceStats]) -> HopClassSummary {
    let sampled = |class: HopClass| {
        devices
            .iter()
            .filter(move |d| *d.samples_by_hop_class.get(class) > 0)
    };

    let avg_times = PerHopClass::from_fn(|class| {
        let means: Vec<f64> = sampled(class)
            .map(|d| *d.avg_times_by_hop_class.get(class))
            .collect();
        mean(&means)
    });
    let avg_distances = PerHopClass::from_fn(|class| {
        let means: Vec<f64> = sampled(class)
            .map(|d| *d.avg_distances_by_hop_class.get(class))
            .collect();
        mean(&means)
    });
    let devices_with_samples = PerHopClass::from_fn(|class| sampled(class).count());

    let total_path_time = HopClass::ALL.iter().map(|c| avg_times.get(*c)).sum();
    let total_path_distance = HopClass::ALL.iter().map(|c| avg_distances.get(*c)).sum();

    HopClassSummary {
        avg_times,
        avg_distances,
        devices_with_samples,
        total_path_time,
        total_path_distance,
    }
}

fn data_size_stats(acc: &SizeAccumulator) -> DataSizeStats {
    let stats = sample_stats(acc);
    DataSizeStats {
        count: stats.count,
        mean_kb: stats.mean,
        min_kb: stats.min,
        max_kb: stats.max,
        std_dev_kb: stats.std_dev,
        total_kb: acc.sum,
    }
}

/// Summary of an accumulator; all zeros when it is empty
pub(crate) fn sample_stats(acc: &SizeAccumulator) -> SampleStats {
    if acc.count == 0 {
        return SampleStats::default();
    }

    let n = acc.count as f64;
    let std_dev = if acc.count < 2 {
        0.0
    } else {
        ((acc.sum_sq - acc.sum * acc.sum / n) / (n - 1.0)).max(0.0).sqrt()
    };

    SampleStats {
        count: acc.count,
        mean: acc.sum / n,
        min: acc.min,
        max: acc.max,
        std_dev,
    }
}

/// `part / total * 100`, 0.0 when total is zero
pub(crate) fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

/// Calculate mean of a slice
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
