//! Reader for the simulator's per-layer network usage summary.
//!
//! The file is an optional side input with the header
//! `NetworkLevel,TotalDataVolumeKB,TransferCount,AverageDataSizeKB`.
//! Missing or unreadable files and malformed rows are logged and skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use super::normalizer::split_fields;
use super::types::NetworkUsageRow;

const COLUMNS: usize = 4;

/// Read the usage file, `None` when it cannot be opened or read
pub fn read_network_usage(path: &Path) -> Option<Vec<NetworkUsageRow>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::warn!("Network usage file not found: {}", path.display());
            return None;
        }
        Err(e) => {
            log::warn!("Failed to open network usage file {}: {}", path.display(), e);
            return None;
        }
    };

    match parse_network_usage(BufReader::new(file)) {
        Ok(rows) => {
            log::info!("Loaded {} network usage rows from {}", rows.len(), path.display());
            Some(rows)
        }
        Err(e) => {
            log::warn!("Failed to read network usage file {}: {}", path.display(), e);
            None
        }
    }
}

/// Parse usage rows; the first non-empty line is the header
pub fn parse_network_usage<R: BufRead>(reader: R) -> io::Result<Vec<NetworkUsageRow>> {
    let mut rows = Vec::new();
    let mut header_seen = false;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if !header_seen {
            header_seen = true;
            continue;
        }

        match parse_row(&line) {
            Some(row) => rows.push(row),
            None => log::debug!("Skipping network usage row {:?}", line),
        }
    }

    Ok(rows)
}

fn parse_row(line: &str) -> Option<NetworkUsageRow> {
    let fields = split_fields(line);
    if fields.len() != COLUMNS {
        return None;
    }

    let network_level = fields[0].trim().to_string();
    if network_level.is_empty() {
        return None;
    }

    Some(NetworkUsageRow {
        network_level,
        total_data_volume_kb: fields[1].trim().parse().ok()?,
        transfer_count: fields[2].trim().parse().ok()?,
        average_data_size_kb: fields[3].trim().parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    const USAGE: &str = "NetworkLevel,TotalDataVolumeKB,TransferCount,AverageDataSizeKB
DEVICE_to_RELAY,1200.5,300,4.0017
RELAY_to_HUB,1200.5,300,4.0017

HUB_to_TIER2,not-a-number,300,4.0
";

    #[test]
    fn test_parse_skips_malformed_rows() {
        let rows = parse_network_usage(Cursor::new(USAGE)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].network_level, "DEVICE_to_RELAY");
        assert_eq!(rows[0].transfer_count, 300);
        assert_eq!(rows[1].total_data_volume_kb, 1200.5);
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(read_network_usage(Path::new("/nonexistent/usage.csv")).is_none());
    }

    #[test]
    fn test_read_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(USAGE.as_bytes()).unwrap();

        let rows = read_network_usage(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
