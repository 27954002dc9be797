//! Validation and typing of raw trace rows.
//!
//! Turns one delimited trace line into a [`TransferRecord`]. Every failure is
//! local to the row: the caller decides whether to skip it, and the batch is
//! never aborted from here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::path_decoder::{PathDecoder, DEFAULT_DECODER};
use super::types::*;
use crate::config::{AnalysisConfig, ColumnSchema};

/// Row-local parse failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Expected {expected} columns, found {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("Hop {hop} of the path does not match the hop pattern")]
    MalformedPath { hop: usize },

    #[error("Unparseable coordinates: {token:?}")]
    BadCoordinates { token: String },

    #[error("Unknown status token: {token:?}")]
    UnknownStatus { token: String },

    #[error("Invalid {column} value: {value:?}")]
    InvalidField { column: &'static str, value: String },
}

impl ParseError {
    pub fn kind(&self) -> ParseErrorKind {
        match self {
            ParseError::SchemaMismatch { .. } => ParseErrorKind::SchemaMismatch,
            ParseError::MalformedPath { .. } => ParseErrorKind::MalformedPath,
            ParseError::BadCoordinates { .. } => ParseErrorKind::BadCoordinates,
            ParseError::UnknownStatus { .. } => ParseErrorKind::UnknownStatus,
            ParseError::InvalidField { .. } => ParseErrorKind::InvalidField,
        }
    }
}

/// Mapping from the simulator's status literals to outcomes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusMap(BTreeMap<String, Outcome>);

impl StatusMap {
    /// `OK` / `DEADLINE_MISSED`, written alongside the explicit relay target column
    pub fn ok_deadline_missed() -> Self {
        [
            ("OK".to_string(), Outcome::OnTime),
            ("DEADLINE_MISSED".to_string(), Outcome::DeadlineMissed),
        ]
        .into_iter()
        .collect()
    }

    /// `S` (success) / `L` (late)
    pub fn short_codes() -> Self {
        [
            ("S".to_string(), Outcome::OnTime),
            ("L".to_string(), Outcome::DeadlineMissed),
        ]
        .into_iter()
        .collect()
    }

    pub fn classify(&self, token: &str) -> Result<Outcome, ParseError> {
        let token = token.trim();
        self.0
            .get(token)
            .copied()
            .ok_or_else(|| ParseError::UnknownStatus {
                token: token.to_string(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn maps_to(&self, outcome: Outcome) -> bool {
        self.0.values().any(|o| *o == outcome)
    }

    pub fn tokens(&self) -> impl Iterator<Item = (&str, Outcome)> {
        self.0.iter().map(|(token, outcome)| (token.as_str(), *outcome))
    }
}

impl FromIterator<(String, Outcome)> for StatusMap {
    fn from_iter<I: IntoIterator<Item = (String, Outcome)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A typed record plus the non-fatal problems found while building it
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: TransferRecord,
    /// `BadCoordinates` and `MalformedPath` only; neither rejects the row
    pub warnings: Vec<ParseError>,
}

/// Row normalizer configured for one schema variant
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    schema: ColumnSchema,
    status_map: StatusMap,
    decoder: PathDecoder,
}

impl RecordNormalizer {
    pub fn new(schema: ColumnSchema, status_map: StatusMap, decoder: PathDecoder) -> Self {
        Self {
            schema,
            status_map,
            decoder,
        }
    }

    /// Normalizer for the schema, status literals and relay naming of `config`
    pub fn from_config(config: &AnalysisConfig) -> Result<Self, regex::Error> {
        Ok(Self::new(
            config.trace.schema,
            config.status_map(),
            PathDecoder::new(&config.relay_prefix)?,
        ))
    }

    pub fn schema(&self) -> ColumnSchema {
        self.schema
    }

    /// Split a raw line and normalize its fields
    pub fn normalize_line(&self, line: &str) -> Result<Normalized, ParseError> {
        let fields = split_fields(line);
        self.normalize(&fields)
    }

    pub fn normalize<S: AsRef<str>>(&self, fields: &[S]) -> Result<Normalized, ParseError> {
        let expected = self.schema.column_count();
        if fields.len() != expected {
            return Err(ParseError::SchemaMismatch {
                expected,
                found: fields.len(),
            });
        }

        let layout = self.schema.layout();
        let field = move |index: usize| field_at(fields, index);

        let outcome = self.status_map.classify(field(layout.status))?;
        let timestamp = parse_number("Time", field(layout.time))?;
        let device_id = field(layout.device_id)
            .parse::<DeviceId>()
            .map_err(|_| ParseError::InvalidField {
                column: "DeviceID",
                value: field(layout.device_id).to_string(),
            })?;
        let data_size_kb = parse_number("DataSize", field(layout.data_size))?;
        let total_elapsed_seconds = parse_number("HopSum", field(layout.hop_sum))?;

        let mut warnings = Vec::new();

        let device_position = match parse_position(field(layout.coordinates)) {
            Ok(position) => Some(position),
            Err(e) => {
                warnings.push(e);
                None
            }
        };

        let relay_target = layout
            .relay_target
            .map(|index| field(index).to_string())
            .filter(|target| !target.is_empty());

        let path = self.decoder.decode(field(layout.path));
        warnings.extend(
            path.iter()
                .enumerate()
                .filter(|(_, hop)| !hop.is_decoded())
                .map(|(i, _)| ParseError::MalformedPath { hop: i + 1 }),
        );

        Ok(Normalized {
            record: TransferRecord {
                timestamp,
                device_id,
                device_position,
                data_size_kb,
                relay_target,
                path,
                total_elapsed_seconds,
                outcome,
            },
            warnings,
        })
    }
}

/// Normalize one row with the default relay naming
pub fn normalize<S: AsRef<str>>(
    raw_row: &[S],
    column_schema: ColumnSchema,
    status_map: &StatusMap,
) -> Result<Normalized, ParseError> {
    RecordNormalizer::new(column_schema, status_map.clone(), DEFAULT_DECODER.clone())
        .normalize(raw_row)
}

/// Parse a `"(x,y)"` coordinates token.
///
/// Only the first comma separates the two values.
pub fn parse_position(token: &str) -> Result<Position, ParseError> {
    let bad = || ParseError::BadCoordinates {
        token: token.to_string(),
    };

    let inner = unquote(token)
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(bad)?;
    let (x, y) = inner.split_once(',').ok_or_else(bad)?;
    let x: f64 = x.trim().parse().map_err(|_| bad())?;
    let y: f64 = y.trim().parse().map_err(|_| bad())?;
    if !x.is_finite() || !y.is_finite() {
        return Err(bad());
    }
    Ok(Position { x, y })
}

/// Split one CSV line into fields, honouring double-quoted fields and `""` escapes
pub fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(|c: char| c == '\r' || c == '\n').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn field_at<S: AsRef<str>>(fields: &[S], index: usize) -> &str {
    unquote(fields[index].as_ref())
}

fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"').trim()
}

fn parse_number(column: &'static str, raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidField {
            column,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TARGET_ROW: &str = r#"12.5000,7,"(120.5,-40.0)",3.25,RELAY_2,"PMU_7 -> RELAY_2 (0.0182s, 409.6m) -> HUB (0.0114s, 500.0m) -> TIER2 (0.0606s, 1415.6m)",0.0902,OK"#;
    const PATH_ONLY_ROW: &str = r#"1.0,3,"(10.0,20.0)",2.00,"PMU_3 -> RELAY_1 (0.0100s, 10.0m) -> HUB (0.0200s, 100.0m)",0.0300,L"#;

    fn target_normalizer() -> RecordNormalizer {
        RecordNormalizer::new(
            ColumnSchema::WithRelayTarget,
            StatusMap::ok_deadline_missed(),
            PathDecoder::default(),
        )
    }

    #[test]
    fn test_split_fields_respects_quotes() {
        let fields = split_fields(r#"1,"(1.0,2.0)",x,"a ""quoted"" b""#);
        assert_eq!(fields, vec!["1", "(1.0,2.0)", "x", r#"a "quoted" b"#]);
        assert_eq!(split_fields("a,,b\r\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_normalize_target_row() {
        let normalized = target_normalizer().normalize_line(TARGET_ROW).unwrap();
        let record = normalized.record;
        assert!(normalized.warnings.is_empty());
        assert_eq!(record.device_id, 7);
        assert_eq!(record.device_position, Some(Position { x: 120.5, y: -40.0 }));
        assert_eq!(record.data_size_kb, 3.25);
        assert_eq!(record.relay_target.as_deref(), Some("RELAY_2"));
        assert_eq!(record.path.len(), 3);
        assert_eq!(record.access_relay(), Some("RELAY_2"));
        assert_eq!(record.total_elapsed_seconds, 0.0902);
        assert_eq!(record.outcome, Outcome::OnTime);
    }

    #[test]
    fn test_normalize_path_only_row_with_short_codes() {
        let normalized = normalize(&split_fields(PATH_ONLY_ROW), ColumnSchema::PathOnly, &StatusMap::short_codes())
            .unwrap();
        assert_eq!(normalized.record.outcome, Outcome::DeadlineMissed);
        assert_eq!(normalized.record.relay_target, None);
        assert_eq!(normalized.record.path.len(), 2);
    }

    #[test]
    fn test_wrong_column_count_is_schema_mismatch() {
        let err = target_normalizer().normalize_line(PATH_ONLY_ROW).unwrap_err();
        assert_eq!(err, ParseError::SchemaMismatch { expected: 8, found: 7 });
        assert_eq!(err.kind(), ParseErrorKind::SchemaMismatch);
    }

    #[test]
    fn test_normalizer_from_config() {
        let mut config = AnalysisConfig::for_trace("trace.csv", ColumnSchema::PathOnly);
        config.relay_prefix = "GNB".to_string();
        let normalizer = RecordNormalizer::from_config(&config).unwrap();
        assert_eq!(normalizer.schema(), ColumnSchema::PathOnly);

        let row = PATH_ONLY_ROW.replace("RELAY_1", "GNB_1");
        let normalized = normalizer.normalize_line(&row).unwrap();
        assert_eq!(normalized.record.access_relay(), Some("GNB_1"));
        assert_eq!(normalized.record.outcome, Outcome::DeadlineMissed);
    }

    #[test]
    fn test_status_literals_are_not_shared_between_variants() {
        let fields = split_fields(PATH_ONLY_ROW);
        let err = normalize(&fields, ColumnSchema::PathOnly, &StatusMap::ok_deadline_missed()).unwrap_err();
        assert_eq!(err, ParseError::UnknownStatus { token: "L".to_string() });
    }

    #[test]
    fn test_invalid_device_id() {
        let row = PATH_ONLY_ROW.replacen(",3,", ",three,", 1);
        let err = normalize(&split_fields(&row), ColumnSchema::PathOnly, &StatusMap::short_codes()).unwrap_err();
        assert_eq!(err.kind(), ParseErrorKind::InvalidField);
    }

    #[test]
    fn test_bad_coordinates_keep_the_row() {
        let row = TARGET_ROW.replace("(120.5,-40.0)", "120.5;-40.0");
        let normalized = target_normalizer().normalize_line(&row).unwrap();
        assert_eq!(normalized.record.device_position, None);
        assert_eq!(normalized.record.total_elapsed_seconds, 0.0902);
        assert_eq!(
            normalized.warnings,
            vec![ParseError::BadCoordinates { token: "120.5;-40.0".to_string() }]
        );
    }

    #[test]
    fn test_malformed_hop_is_a_warning() {
        let row = TARGET_ROW.replace("HUB (0.0114s, 500.0m)", "HUB (?s)");
        let normalized = target_normalizer().normalize_line(&row).unwrap();
        assert_eq!(normalized.warnings, vec![ParseError::MalformedPath { hop: 2 }]);
        assert_eq!(normalized.record.path.len(), 3);
    }

    #[test]
    fn test_path_without_hops_is_valid() {
        let row = TARGET_ROW.replace(
            "PMU_7 -> RELAY_2 (0.0182s, 409.6m) -> HUB (0.0114s, 500.0m) -> TIER2 (0.0606s, 1415.6m)",
            "PMU_7",
        );
        let normalized = target_normalizer().normalize_line(&row).unwrap();
        assert!(normalized.record.path.is_empty());
        assert_eq!(normalized.record.access_relay(), None);
    }

    #[test]
    fn test_parse_position_splits_on_first_comma() {
        assert_eq!(parse_position("(1.5, 2.5)").unwrap(), Position { x: 1.5, y: 2.5 });
        assert!(parse_position("(1.5,2.5,3.5)").is_err());
        assert!(parse_position("1.5,2.5").is_err());
        assert!(parse_position("(nan,1)").is_err());
    }

    proptest! {
        #[test]
        fn prop_bad_coordinates_only_drop_position(token in "[a-z;: ]{0,12}") {
            let row = TARGET_ROW.replace("\"(120.5,-40.0)\"", &format!("\"{}\"", token));
            let normalized = target_normalizer().normalize_line(&row).unwrap();
            prop_assert_eq!(normalized.record.device_position, None);
            prop_assert_eq!(normalized.record.device_id, 7);
            prop_assert_eq!(normalized.record.total_elapsed_seconds, 0.0902);
            prop_assert_eq!(normalized.record.path.len(), 3);
            prop_assert_eq!(normalized.record.outcome, Outcome::OnTime);
        }
    }
}
