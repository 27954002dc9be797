//! Trace file ingestion.
//!
//! Streams a transfer trace through the [`RecordNormalizer`] into an
//! [`AggregationStore`], skipping rejected rows and counting why. Optionally
//! buffers the rows and splits them into contiguous shards that are ingested
//! in parallel and merged back in row order. Sums merged from shards equal
//! the single-pass sums up to floating-point rounding.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use super::normalizer::{ParseError, RecordNormalizer};
use super::store::AggregationStore;
use super::types::*;
use crate::config::{AnalysisConfig, ColumnSchema};

/// Errors that abort a whole ingest pass
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Trace file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read trace file {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid relay name pattern: {0}")]
    InvalidRelayPattern(#[from] regex::Error),
}

/// Result of one ingest pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceIngest {
    pub store: AggregationStore,
    pub summary: IngestSummary,
}

impl TraceIngest {
    fn merge(&mut self, later: TraceIngest) {
        self.store.merge(later.store);
        self.summary.merge(later.summary);
    }
}

/// Ingest the trace file named by `config`
pub fn ingest_trace(config: &AnalysisConfig) -> Result<TraceIngest, TraceError> {
    let path = &config.trace.path;
    let normalizer = RecordNormalizer::from_config(config)?;

    let file = File::open(path).map_err(|e| open_error(path, e))?;
    let reader = BufReader::with_capacity(64 * 1024, file);

    log::info!(
        "Ingesting {} ({} schema, {} shard(s))",
        path.display(),
        config.trace.schema.name(),
        config.threads.max(1)
    );

    let ingest = ingest_reader(reader, &normalizer, config.trace.has_header, config.threads)
        .map_err(|source| TraceError::Unreadable {
            path: path.clone(),
            source,
        })?;

    log::info!(
        "Accepted {}/{} rows from {} devices",
        ingest.summary.rows_accepted,
        ingest.summary.rows_read,
        ingest.store.devices().len()
    );
    for (kind, count) in &ingest.summary.rows_rejected {
        log::warn!("Skipped {} rows: {}", count, kind);
    }
    if ingest.summary.bad_coordinates > 0 {
        log::warn!(
            "{} rows had unparseable coordinates (timing kept, position skipped)",
            ingest.summary.bad_coordinates
        );
    }
    if ingest.summary.malformed_hops > 0 {
        log::warn!("{} hop tokens could not be decoded", ingest.summary.malformed_hops);
    }

    Ok(ingest)
}

/// Ingest trace lines from any reader.
///
/// A single pass normalizes each line as it is read. With `shards` above 1
/// the data rows are buffered instead, split into that many contiguous
/// chunks, ingested on the rayon pool and merged in row order.
pub fn ingest_reader<R: BufRead>(
    reader: R,
    normalizer: &RecordNormalizer,
    has_header: bool,
    shards: usize,
) -> io::Result<TraceIngest> {
    let rows = DataRows::new(reader, has_header, normalizer.schema());

    if shards <= 1 {
        let mut ingest = TraceIngest::default();
        for row in rows {
            ingest.push_row(&row?, normalizer);
        }
        return Ok(ingest);
    }

    let rows: Vec<DataRow> = rows.collect::<io::Result<_>>()?;
    if rows.is_empty() {
        return Ok(TraceIngest::default());
    }

    let chunk_size = rows.len().div_ceil(shards);
    let partials: Vec<TraceIngest> = rows
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut ingest = TraceIngest::default();
            for row in chunk {
                ingest.push_row(row, normalizer);
            }
            ingest
        })
        .collect();

    Ok(partials
        .into_iter()
        .fold(TraceIngest::default(), |mut acc, shard| {
            acc.merge(shard);
            acc
        }))
}

/// One non-empty data line of the trace
#[derive(Debug, Clone, PartialEq)]
pub enum DataRow {
    Line(String),
    /// Line bytes that are not valid UTF-8
    NotUtf8,
}

impl TraceIngest {
    /// Normalize and ingest one row, counting it in the summary
    pub fn push_row(&mut self, row: &DataRow, normalizer: &RecordNormalizer) {
        self.summary.rows_read += 1;

        let line = match row {
            DataRow::Line(line) => line,
            DataRow::NotUtf8 => {
                log::debug!("Skipping non UTF-8 row");
                self.summary.reject(ParseErrorKind::InvalidField);
                return;
            }
        };

        match normalizer.normalize_line(line) {
            Ok(normalized) => {
                for warning in &normalized.warnings {
                    match warning {
                        ParseError::BadCoordinates { .. } => self.summary.bad_coordinates += 1,
                        ParseError::MalformedPath { .. } => self.summary.malformed_hops += 1,
                        _ => {}
                    }
                }
                self.store.ingest(&normalized.record);
                self.summary.rows_accepted += 1;
            }
            Err(e) => {
                log::debug!("Skipping row {:?}: {}", line, e);
                self.summary.reject(e.kind());
            }
        }
    }
}

/// Non-empty data rows of a trace, header dropped
pub struct DataRows<R> {
    reader: R,
    header_pending: bool,
    schema: ColumnSchema,
    buf: Vec<u8>,
}

impl<R: BufRead> DataRows<R> {
    pub fn new(reader: R, has_header: bool, schema: ColumnSchema) -> Self {
        Self {
            reader,
            header_pending: has_header,
            schema,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for DataRows<R> {
    type Item = io::Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }

            let line = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim_end_matches(|c: char| c == '\r' || c == '\n'),
                Err(_) if self.header_pending => {
                    self.header_pending = false;
                    log::warn!("Trace header is not valid UTF-8");
                    continue;
                }
                Err(_) => return Some(Ok(DataRow::NotUtf8)),
            };

            if line.trim().is_empty() {
                continue;
            }

            if self.header_pending {
                self.header_pending = false;
                check_header(line, self.schema);
                continue;
            }

            return Some(Ok(DataRow::Line(line.to_string())));
        }
    }
}

fn check_header(line: &str, schema: ColumnSchema) {
    let found = super::normalizer::split_fields(line).len();
    if found != schema.column_count() {
        log::warn!(
            "Header has {} columns, {} schema expects {}: {:?}",
            found,
            schema.name(),
            schema.column_count(),
            schema.header()
        );
    }
}

fn open_error(path: &Path, e: io::Error) -> TraceError {
    if e.kind() == io::ErrorKind::NotFound {
        TraceError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        TraceError::Unreadable {
            path: path.to_path_buf(),
            source: e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalizer::StatusMap;
    use crate::analysis::path_decoder::PathDecoder;
    use crate::analysis::statistics::derive;
    use proptest::prelude::*;
    use std::io::Cursor;

    const HEADER: &str = "Time,DeviceID,DeviceCoordinates,DataSize,Path,HopSum,Status";

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(ColumnSchema::PathOnly, StatusMap::short_codes(), PathDecoder::default())
    }

    fn row(device: u32, relay: u32, quarter_steps: u32, coords_ok: bool, late: bool) -> String {
        let t = quarter_steps as f64 * 0.25;
        let coords = if coords_ok { format!("({}.0,{}.0)", device, relay) } else { "??".to_string() };
        format!(
            "{},{},\"{}\",{},\"D -> RELAY_{} ({}s, {}m) -> HUB ({}s, 100m)\",{},{}",
            quarter_steps,
            device,
            coords,
            device + 1,
            relay,
            t,
            relay * 10,
            t,
            t + t,
            if late { "L" } else { "S" }
        )
    }

    #[test]
    fn test_header_and_blank_lines_are_skipped() {
        let input = format!("{}\n\n{}\n   \n{}\n", HEADER, row(1, 1, 1, true, false), row(2, 1, 2, true, true));
        let ingest = ingest_reader(Cursor::new(input), &normalizer(), true, 0).unwrap();
        assert_eq!(ingest.summary.rows_read, 2);
        assert_eq!(ingest.summary.rows_accepted, 2);
        assert_eq!(ingest.store.global().deadline_missed, 1);
    }

    #[test]
    fn test_rejected_rows_are_counted_by_kind() {
        let input = format!(
            "{}\n{}\nonly,three,columns\n{}\n",
            row(1, 1, 1, true, false),
            row(2, 1, 1, true, false).replace(",S", ",X"),
            row(3, 1, 1, false, false)
        );
        let ingest = ingest_reader(Cursor::new(input), &normalizer(), false, 0).unwrap();
        let summary = &ingest.summary;
        assert_eq!(summary.rows_read, 4);
        assert_eq!(summary.rows_accepted, 2);
        assert_eq!(summary.rows_rejected[&ParseErrorKind::UnknownStatus], 1);
        assert_eq!(summary.rows_rejected[&ParseErrorKind::SchemaMismatch], 1);
        assert_eq!(summary.total_rejected(), 2);
        assert_eq!(summary.bad_coordinates, 1);
        assert_eq!(ingest.store.global().total, 2);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let config = AnalysisConfig::for_trace("/nonexistent/trace.csv", ColumnSchema::PathOnly);
        let err = ingest_trace(&config).unwrap_err();
        assert!(matches!(err, TraceError::NotFound { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_non_utf8_row_is_counted() {
        let mut input = format!("{}\n{}\n", HEADER, row(1, 1, 1, true, false)).into_bytes();
        input.extend_from_slice(b"1,2,\"(\xff\xfe,1)\",3\n");
        input.extend_from_slice(format!("{}\n", row(2, 1, 1, true, false)).as_bytes());

        for shards in [0, 2] {
            let ingest = ingest_reader(Cursor::new(input.clone()), &normalizer(), true, shards).unwrap();
            let summary = &ingest.summary;
            assert_eq!(summary.rows_read, 3);
            assert_eq!(summary.rows_accepted, 2);
            assert_eq!(summary.rows_rejected[&ParseErrorKind::InvalidField], 1);
            assert_eq!(summary.rows_accepted + summary.total_rejected(), summary.rows_read);
        }
    }

    #[test]
    fn test_data_rows_drop_header_and_blanks() {
        let mut input = b"Time,DeviceID\r\n\r\n  \nfirst\r\n".to_vec();
        input.extend_from_slice(b"\xc3\x28\nlast");

        let rows: Vec<DataRow> = DataRows::new(Cursor::new(input), true, ColumnSchema::PathOnly)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(
            rows,
            vec![
                DataRow::Line("first".to_string()),
                DataRow::NotUtf8,
                DataRow::Line("last".to_string()),
            ]
        );
    }

    #[test]
    fn test_sharded_sums_agree_up_to_rounding() {
        let lines: Vec<String> = (1..=9)
            .map(|i| {
                format!(
                    "{i},4,\"(1.0,2.0)\",0.{i},\"D -> RELAY_1 (0.0{i}s, 1{i}m) -> HUB (0.{i}s, 100m)\",0.{i}{i},{}",
                    if i % 4 == 0 { "L" } else { "S" }
                )
            })
            .collect();
        let input = lines.join("\n");

        let single = ingest_reader(Cursor::new(input.clone()), &normalizer(), false, 1).unwrap();
        let sharded = ingest_reader(Cursor::new(input), &normalizer(), false, 3).unwrap();
        assert_eq!(single.summary, sharded.summary);

        let (a, b) = (derive(&single.store), derive(&sharded.store));
        let close = |x: f64, y: f64| (x - y).abs() <= 1e-12 * x.abs().max(1.0);

        assert_eq!(a.global, b.global);
        let (da, db) = (&a.devices[0], &b.devices[0]);
        assert_eq!((da.total, da.on_time, da.position), (db.total, db.on_time, db.position));
        assert_eq!(da.relay_id, db.relay_id);
        for class in HopClass::ALL {
            assert!(close(*da.avg_times_by_hop_class.get(class), *db.avg_times_by_hop_class.get(class)));
            assert!(close(*da.avg_distances_by_hop_class.get(class), *db.avg_distances_by_hop_class.get(class)));
        }
        assert!(close(da.avg_total_elapsed, db.avg_total_elapsed));
        assert!(close(a.relays[0].avg_time_to_relay, b.relays[0].avg_time_to_relay));
        assert!(close(a.data_size.mean_kb, b.data_size.mean_kb));
        assert!(close(a.data_size.std_dev_kb, b.data_size.std_dev_kb));
        assert!(close(a.data_size.total_kb, b.data_size.total_kb));
        assert_eq!((a.data_size.min_kb, a.data_size.max_kb), (b.data_size.min_kb, b.data_size.max_kb));
    }

    fn row_strategy() -> impl Strategy<Value = String> {
        (0u32..6, 1u32..4, 0u32..40, any::<bool>(), any::<bool>(), 0u8..10).prop_map(
            |(device, relay, steps, coords_ok, late, corrupt)| {
                if corrupt == 0 {
                    "1,2,3".to_string()
                } else {
                    row(device, relay, steps, coords_ok, late)
                }
            },
        )
    }

    proptest! {
        #[test]
        fn prop_sharded_ingest_matches_sequential(
            rows in prop::collection::vec(row_strategy(), 0..60),
            shards in 2usize..6,
        ) {
            // Quarter-second steps and whole sizes add exactly in any order
            let input = rows.join("\n");
            let sequential = ingest_reader(Cursor::new(input.clone()), &normalizer(), false, 1).unwrap();
            let sharded = ingest_reader(Cursor::new(input), &normalizer(), false, shards).unwrap();
            prop_assert_eq!(sharded, sequential);
        }
    }
}
