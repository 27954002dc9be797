//! Report generation for transfer trace analysis.
//!
//! Generates both JSON and human-readable text reports.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};

use super::state_estimation::TaskAccumulator;
use super::trace_reader::TraceIngest;
use super::types::*;
use crate::config::AnalysisConfig;

/// Assemble the full report for one ingest pass
pub fn build_report(
    config: &AnalysisConfig,
    ingest: &TraceIngest,
    network_usage: Option<Vec<NetworkUsageRow>>,
    tasks: Option<&TaskAccumulator>,
) -> AnalysisReport {
    let mut statistics = super::statistics::derive(&ingest.store);
    if let Some(tasks) = tasks {
        tasks.annotate_relays(&mut statistics.relays);
    }

    AnalysisReport {
        metadata: create_metadata(config),
        ingest: ingest.summary.clone(),
        statistics,
        network_usage,
        tasks: tasks.map(TaskAccumulator::task_stats),
    }
}

fn create_metadata(config: &AnalysisConfig) -> AnalysisMetadata {
    AnalysisMetadata {
        analysis_timestamp: chrono::Utc::now().to_rfc3339(),
        trace_path: config.trace.path.display().to_string(),
        schema: config.trace.schema.name().to_string(),
    }
}

/// Generate JSON report
pub fn generate_json_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report
pub fn generate_text_report(report: &AnalysisReport, output_path: &Path) -> Result<()> {
    let content = render_text_report(report);
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

fn section(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());
}

/// Render the text report body
pub fn render_text_report(report: &AnalysisReport) -> String {
    let stats = &report.statistics;
    let mut lines: Vec<String> = Vec::new();

    section(&mut lines, "TRANSFER TRACE ANALYSIS");

    // Metadata
    lines.push(format!("Analysis Date: {}", report.metadata.analysis_timestamp));
    lines.push(format!("Trace File: {}", report.metadata.trace_path));
    lines.push(format!("Schema: {}", report.metadata.schema));
    lines.push(format!(
        "Rows: {} read, {} accepted, {} rejected",
        report.ingest.rows_read,
        report.ingest.rows_accepted,
        report.ingest.total_rejected()
    ));
    for (kind, count) in &report.ingest.rows_rejected {
        lines.push(format!("  {}: {}", kind, count));
    }
    if report.ingest.bad_coordinates > 0 || report.ingest.malformed_hops > 0 {
        lines.push(format!(
            "Warnings: {} unparseable coordinates, {} undecoded hops",
            report.ingest.bad_coordinates, report.ingest.malformed_hops
        ));
    }
    lines.push(String::new());

    // Per-device delivery
    section(&mut lines, "PER-DEVICE DELIVERY");
    for device in &stats.devices {
        lines.push(device_line(device));
        lines.push(format!(
            "    hop times: {:.4}s / {:.4}s / {:.4}s, mean hop sum {:.4}s",
            device.avg_times_by_hop_class.device_to_relay,
            device.avg_times_by_hop_class.relay_to_hub,
            device.avg_times_by_hop_class.hub_to_tier2,
            device.avg_total_elapsed
        ));
    }
    if stats.devices.is_empty() {
        lines.push("No transfers recorded.".to_string());
    }
    lines.push(String::new());

    // Relays
    section(&mut lines, "RELAY SUMMARY");
    for relay in &stats.relays {
        lines.push(format!(
            "{}: {} devices, {}/{} transfers on time ({:.1}%)",
            relay.relay_id, relay.device_count, relay.on_time, relay.total, relay.success_rate
        ));
        lines.push(format!(
            "    avg time to relay: {:.4}s, mean hop sum {:.4}s",
            relay.avg_time_to_relay, relay.avg_total_elapsed
        ));
        if let (Some(pdc), Some(total)) = (relay.avg_pdc_waiting_time, relay.avg_total_time) {
            lines.push(format!(
                "    task pdc waiting: {:.4}s, task total time: {:.4}s",
                pdc, total
            ));
        }
    }
    lines.push(String::new());

    lines.push("Deadline Summary:".to_string());
    lines.push(format!("  Total transfers: {}", stats.global.total_transfers));
    lines.push(format!("  On time: {}", stats.global.on_time));
    lines.push(format!(
        "  Deadline missed: {} ({:.1}%)",
        stats.global.deadline_missed, stats.global.deadline_missed_rate
    ));
    lines.push(String::new());

    // Hop-by-hop
    section(&mut lines, "HOP-BY-HOP AVERAGES");
    for class in HopClass::ALL {
        lines.push(format!(
            "{:<16} {:>10.4}s {:>10.1}m  ({} devices)",
            class.arrow(),
            stats.hop_classes.avg_times.get(class),
            stats.hop_classes.avg_distances.get(class),
            stats.hop_classes.devices_with_samples.get(class)
        ));
    }
    lines.push(format!(
        "{:<16} {:>10.4}s {:>10.1}m",
        "TOTAL PATH", stats.hop_classes.total_path_time, stats.hop_classes.total_path_distance
    ));
    lines.push(String::new());

    // Data volume
    section(&mut lines, "DATA VOLUME");
    let size = &stats.data_size;
    lines.push(format!("Transfers: {}", size.count));
    lines.push(format!(
        "Size: mean {:.2} KB, min {:.2} KB, max {:.2} KB, std dev {:.2} KB",
        size.mean_kb, size.min_kb, size.max_kb, size.std_dev_kb
    ));
    lines.push(format!("Total: {:.2} KB", size.total_kb));
    lines.push(String::new());

    lines.push("Per Layer (from trace):".to_string());
    for layer in &stats.layer_volumes {
        lines.push(format!(
            "  {:<16} {:>12.2} KB over {:>6} transfers (avg {:.2} KB)",
            layer.hop_class.arrow(),
            layer.total_kb,
            layer.transfers,
            layer.avg_kb
        ));
    }
    lines.push(String::new());

    if let Some(ref usage) = report.network_usage {
        lines.push("Per Layer (simulator network usage):".to_string());
        for row in usage {
            lines.push(format!(
                "  {:<16} {:>12.2} KB over {:>6} transfers (avg {:.2} KB)",
                row.network_level,
                row.total_data_volume_kb,
                row.transfer_count,
                row.average_data_size_kb
            ));
        }
        lines.push(String::new());
    }

    if !stats.relay_targets.is_empty() {
        section(&mut lines, "RELAY TARGETS");
        for target in &stats.relay_targets {
            lines.push(format!(
                "{}: mean hop sum {:.4}s over {} transfers",
                target.relay_target, target.avg_total_elapsed, target.samples
            ));
        }
        lines.push(String::new());
    }

    if let Some(ref tasks) = report.tasks {
        section(&mut lines, "STATE ESTIMATION TASKS");
        lines.push(format!("Total tasks: {}", tasks.total_tasks));
        lines.push(format!(
            "Successful: {}, failed: {} ({:.1}% success)",
            tasks.successful_tasks, tasks.failed_tasks, tasks.success_rate
        ));
        lines.push(format!(
            "Batches: {} complete, {} timeout ({:.1}% complete)",
            tasks.complete_batches, tasks.timeout_batches, tasks.complete_batch_rate
        ));
        lines.push(String::new());
        for (label, stats) in [
            ("Exec time (successful)", &tasks.exec_time),
            ("PDC waiting time", &tasks.pdc_waiting_time),
            ("Total time", &tasks.total_time),
        ] {
            lines.push(format!(
                "{:<24} mean {:.4}s, min {:.4}s, max {:.4}s, std dev {:.4}s",
                label, stats.mean, stats.min, stats.max, stats.std_dev
            ));
        }
        lines.push(String::new());
    }

    // Footer
    lines.push("=".repeat(80));

    lines.join("\n")
}

fn device_line(device: &DeviceStats) -> String {
    format!(
        "DEV_{:02} -> {}: {}/{:>2} transfers on time ({:.1}%)",
        device.device_id,
        device.relay_id.as_deref().unwrap_or("unassigned"),
        device.on_time,
        device.total,
        device.success_rate
    )
}

/// Print a summary to stdout
pub fn print_summary(report: &AnalysisReport) {
    let stats = &report.statistics;
    println!("\n=== TRANSFER TRACE ANALYSIS SUMMARY ===\n");
    println!(
        "Rows: {} accepted / {} read",
        report.ingest.rows_accepted, report.ingest.rows_read
    );
    println!("Devices: {}", stats.devices.len());
    println!("Relays: {}", stats.relays.len());

    println!("\nDeadlines:");
    println!("  Transfers: {}", stats.global.total_transfers);
    println!(
        "  Missed: {} ({:.1}%)",
        stats.global.deadline_missed, stats.global.deadline_missed_rate
    );

    println!("\nHop Averages:");
    for class in HopClass::ALL {
        println!("  {}: {:.4}s", class.arrow(), stats.hop_classes.avg_times.get(class));
    }

    if !stats.relays.is_empty() {
        println!("\nRelays:");
        for relay in &stats.relays {
            println!(
                "  {}: {:.1}% on time, {} devices",
                relay.relay_id, relay.success_rate, relay.device_count
            );
        }
    }

    if let Some(ref tasks) = report.tasks {
        println!("\nState Estimation:");
        println!(
            "  Tasks: {} ({:.1}% successful)",
            tasks.total_tasks, tasks.success_rate
        );
        println!("  Mean total time: {:.4}s", tasks.total_time.mean);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::state_estimation::TaskRecord;
    use crate::analysis::store::AggregationStore;
    use crate::config::ColumnSchema;

    fn sample_ingest() -> TraceIngest {
        let mut store = AggregationStore::new();
        for outcome in [Outcome::OnTime, Outcome::OnTime, Outcome::OnTime] {
            store.ingest(&TransferRecord {
                timestamp: 1.0,
                device_id: 7,
                device_position: Some(Position { x: 1.0, y: 2.0 }),
                data_size_kb: 4.0,
                relay_target: Some("RELAY_1".to_string()),
                path: vec![HopSegment {
                    relay_id: Some("RELAY_1".to_string()),
                    elapsed_seconds: 0.01,
                    distance_meters: 50.0,
                }],
                total_elapsed_seconds: 0.01,
                outcome,
            });
        }
        TraceIngest {
            store,
            summary: IngestSummary {
                rows_read: 3,
                rows_accepted: 3,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_text_report_contains_device_line() {
        let config = AnalysisConfig::for_trace("trace.csv", ColumnSchema::WithRelayTarget);
        let report = build_report(&config, &sample_ingest(), None, None);
        let text = render_text_report(&report);

        assert!(text.contains("DEV_07 -> RELAY_1: 3/ 3 transfers on time (100.0%)"));
        assert!(text.contains("RELAY TARGETS"));
        assert!(!text.contains("simulator network usage"));
    }

    #[test]
    fn test_json_report_round_trips_statistics() {
        let config = AnalysisConfig::for_trace("trace.csv", ColumnSchema::WithRelayTarget);
        let report = build_report(&config, &sample_ingest(), None, None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        generate_json_report(&report, &path).unwrap();

        let parsed: AnalysisReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.statistics.global, report.statistics.global);
        assert_eq!(parsed.statistics.devices.len(), 1);
        assert_eq!(parsed.statistics.devices[0].relay_id.as_deref(), Some("RELAY_1"));
        assert_eq!(parsed.metadata.schema, "with_relay_target");
        assert!(parsed.network_usage.is_none());
        assert!(parsed.tasks.is_none());
    }

    #[test]
    fn test_task_stats_in_reports() {
        let mut tasks = TaskAccumulator::default();
        for (pdc, success) in [(0.5, true), (1.5, false)] {
            tasks.ingest(&TaskRecord {
                relay_id: Some("RELAY_1".to_string()),
                batch_type: "COMPLETE".to_string(),
                exec_time: 0.25,
                total_time: 2.0,
                pdc_waiting_time: pdc,
                success,
            });
        }
        let config = AnalysisConfig::for_trace("trace.csv", ColumnSchema::WithRelayTarget);
        let report = build_report(&config, &sample_ingest(), None, Some(&tasks));

        assert_eq!(report.statistics.relays[0].avg_pdc_waiting_time, Some(1.0));
        assert_eq!(report.statistics.relays[0].avg_total_time, Some(2.0));
        let task_stats = report.tasks.as_ref().unwrap();
        assert_eq!(task_stats.failed_tasks, 1);
        assert_eq!(task_stats.success_rate, 50.0);

        let text = render_text_report(&report);
        assert!(text.contains("STATE ESTIMATION TASKS"));
        assert!(text.contains("task pdc waiting: 1.0000s, task total time: 2.0000s"));
        assert!(text.contains("Batches: 2 complete, 0 timeout (100.0% complete)"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["tasks"]["total_tasks"], 2);
        assert_eq!(json["statistics"]["relays"][0]["avg_pdc_waiting_time"], 1.0);
    }
}
