//! Reader for the simulator's state-estimation task log.
//!
//! The file is an optional side input. Columns are located by header name:
//! `BatchType`, `ExecTime`, `TotalTime`, `PDCWaitingTime` and `SuccessFlag`
//! are required, `GNBID` is present only when tasks run at the relays.
//! A missing or unreadable file is logged and skipped, as are malformed rows.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::normalizer::split_fields;
use super::statistics::{percentage, sample_stats};
use super::store::{RunningMean, SizeAccumulator};
use super::types::{RelayStats, TaskStats};

const RELAY_COLUMN: &str = "GNBID";

/// Errors that make the whole task log unusable
#[derive(Debug, thiserror::Error)]
pub enum StateEstimationError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("state estimation file is empty")]
    Empty,
    #[error("state estimation header has no {0} column")]
    MissingColumn(&'static str),
}

/// One state-estimation task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub relay_id: Option<String>,
    pub batch_type: String,
    pub exec_time: f64,
    pub total_time: f64,
    pub pdc_waiting_time: f64,
    pub success: bool,
}

/// Mean task timings at one relay
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RelayTaskTimes {
    pub pdc_waiting_time: RunningMean,
    pub total_time: RunningMean,
}

/// Running state over all tasks of one log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskAccumulator {
    pub total: usize,
    pub successful: usize,
    /// Successful tasks only
    pub exec_time: SizeAccumulator,
    pub pdc_waiting_time: SizeAccumulator,
    pub total_time: SizeAccumulator,
    pub complete_batches: usize,
    pub timeout_batches: usize,
    pub relays: BTreeMap<String, RelayTaskTimes>,
    /// Rows dropped as malformed
    pub skipped_rows: usize,
}

impl TaskAccumulator {
    pub fn ingest(&mut self, task: &TaskRecord) {
        self.total += 1;
        if task.success {
            self.successful += 1;
            self.exec_time.push(task.exec_time);
        }
        self.pdc_waiting_time.push(task.pdc_waiting_time);
        self.total_time.push(task.total_time);

        match task.batch_type.as_str() {
            "COMPLETE" => self.complete_batches += 1,
            "TIMEOUT" => self.timeout_batches += 1,
            _ => {}
        }

        if let Some(ref relay_id) = task.relay_id {
            let times = self.relays.entry(relay_id.clone()).or_default();
            times.pdc_waiting_time.push(task.pdc_waiting_time);
            times.total_time.push(task.total_time);
        }
    }

    pub fn task_stats(&self) -> TaskStats {
        TaskStats {
            total_tasks: self.total,
            successful_tasks: self.successful,
            failed_tasks: self.total - self.successful,
            success_rate: percentage(self.successful, self.total),
            exec_time: sample_stats(&self.exec_time),
            pdc_waiting_time: sample_stats(&self.pdc_waiting_time),
            total_time: sample_stats(&self.total_time),
            complete_batches: self.complete_batches,
            timeout_batches: self.timeout_batches,
            complete_batch_rate: percentage(self.complete_batches, self.total),
        }
    }

    /// Fill the task timing means of relays that ran tasks
    pub fn annotate_relays(&self, relays: &mut [RelayStats]) {
        for relay in relays.iter_mut() {
            if let Some(times) = self.relays.get(&relay.relay_id) {
                relay.avg_pdc_waiting_time = Some(times.pdc_waiting_time.mean());
                relay.avg_total_time = Some(times.total_time.mean());
            }
        }

        for relay_id in self.relays.keys() {
            if !relays.iter().any(|r| &r.relay_id == relay_id) {
                log::debug!("Relay {} ran tasks but carried no transfers", relay_id);
            }
        }
    }
}

/// Read the task log, `None` when it cannot be opened or has no usable header
pub fn read_state_estimation(path: &Path, relay_prefix: &str) -> Option<TaskAccumulator> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("State estimation file not found: {}", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("Failed to open state estimation file {}: {}", path.display(), e);
            return None;
        }
    };

    match parse_state_estimation(BufReader::new(file), relay_prefix) {
        Ok(tasks) => {
            log::info!("Loaded {} state estimation tasks from {}", tasks.total, path.display());
            Some(tasks)
        }
        Err(e) => {
            log::warn!("Failed to read state estimation file {}: {}", path.display(), e);
            None
        }
    }
}

/// Parse a task log; the first non-empty line is the header
pub fn parse_state_estimation<R: BufRead>(
    reader: R,
    relay_prefix: &str,
) -> Result<TaskAccumulator, StateEstimationError> {
    let mut lines = reader.lines();
    let columns = loop {
        match lines.next() {
            Some(line) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break Columns::from_header(&line)?;
                }
            }
            None => return Err(StateEstimationError::Empty),
        }
    };

    let mut tasks = TaskAccumulator::default();
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        match columns.parse_task(&line, relay_prefix) {
            Some(task) => tasks.ingest(&task),
            None => {
                log::debug!("Skipping state estimation row {:?}", line);
                tasks.skipped_rows += 1;
            }
        }
    }

    if tasks.skipped_rows > 0 {
        log::warn!("Skipped {} malformed state estimation rows", tasks.skipped_rows);
    }
    Ok(tasks)
}

/// Column positions found in the header
#[derive(Debug, Clone, Copy)]
struct Columns {
    width: usize,
    relay: Option<usize>,
    batch_type: usize,
    exec_time: usize,
    total_time: usize,
    pdc_waiting_time: usize,
    success_flag: usize,
}

impl Columns {
    fn from_header(line: &str) -> Result<Self, StateEstimationError> {
        let names: Vec<String> = split_fields(line)
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect();
        let find = |name: &str| names.iter().position(|n| n == name);
        let require = |name: &'static str| find(name).ok_or(StateEstimationError::MissingColumn(name));

        Ok(Self {
            width: names.len(),
            relay: find(RELAY_COLUMN),
            batch_type: require("BatchType")?,
            exec_time: require("ExecTime")?,
            total_time: require("TotalTime")?,
            pdc_waiting_time: require("PDCWaitingTime")?,
            success_flag: require("SuccessFlag")?,
        })
    }

    fn parse_task(&self, line: &str, relay_prefix: &str) -> Option<TaskRecord> {
        let fields = split_fields(line);
        if fields.len() != self.width {
            return None;
        }

        let success = match fields[self.success_flag].trim() {
            "1" => true,
            "0" => false,
            _ => return None,
        };
        let relay_id = match self.relay {
            Some(index) => Some(relay_name(fields[index].trim(), relay_prefix)?),
            None => None,
        };

        Some(TaskRecord {
            relay_id,
            batch_type: fields[self.batch_type].trim().to_string(),
            exec_time: seconds(&fields[self.exec_time])?,
            total_time: seconds(&fields[self.total_time])?,
            pdc_waiting_time: seconds(&fields[self.pdc_waiting_time])?,
            success,
        })
    }
}

fn seconds(field: &str) -> Option<f64> {
    field.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Relay name as it appears in trace paths: bare numbers get the relay prefix
fn relay_name(raw: &str, relay_prefix: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{}_{}", relay_prefix, raw));
    }
    Some(raw.to_string())
}
