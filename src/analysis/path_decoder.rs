//! Decoding of routed path strings.
//!
//! The simulator packs the route of a transfer into one column:
//!
//! ```text
//! PMU_3 -> RELAY_2 (0.0060s, 42.9m) -> HUB (0.0114s, 500.0m) -> TIER2 (0.0606s, 1415.6m)
//! ```
//!
//! The origin token is always the device itself and is dropped. Every later
//! token becomes one [`HopSegment`]. A token that does not match is kept as a
//! malformed segment so that the remaining hops keep their positions.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::types::{HopClass, HopSegment};

/// Relay name prefix used when none is configured
pub const DEFAULT_RELAY_PREFIX: &str = "RELAY";

const SEPARATOR: &str = "->";

/// Compiled hop patterns for one relay naming scheme
#[derive(Debug, Clone)]
pub struct PathDecoder {
    /// Match: "RELAY_<n> (<t>s, <d>m)" or "RELAY_Unknown (<t>s, <d>m)"
    access_hop: Regex,
    /// Match: "<label> (<t>s, <d>m)", label optional
    downstream_hop: Regex,
}

impl PathDecoder {
    pub fn new(relay_prefix: &str) -> Result<Self, regex::Error> {
        let prefix = regex::escape(relay_prefix);
        Ok(Self {
            access_hop: Regex::new(&format!(
                r"^({p}_\d+|{p}_Unknown)\s*\(([\d.]+)s,\s*([\d.]+)m\)",
                p = prefix
            ))?,
            downstream_hop: Regex::new(r"^([^()]*?)\s*\(([\d.]+)s,\s*([\d.]+)m\)")?,
        })
    }

    /// Decode a full path string into its hop sequence.
    ///
    /// Returns an empty sequence when the string has no `->` separator; that
    /// means "no routing information" and is not an error.
    pub fn decode(&self, path: &str) -> Vec<HopSegment> {
        if !path.contains(SEPARATOR) {
            return Vec::new();
        }

        path.split(SEPARATOR)
            .skip(1)
            .enumerate()
            .map(|(index, token)| self.decode_token(index, token.trim()))
            .collect()
    }

    fn decode_token(&self, index: usize, token: &str) -> HopSegment {
        let decoded = if index == 0 {
            self.access_hop.captures(token).and_then(|caps| {
                let relay = caps.get(1)?.as_str().to_string();
                let (elapsed, distance) = timing(&caps)?;
                Some((relay, elapsed, distance))
            })
        } else {
            self.downstream_hop.captures(token).and_then(|caps| {
                let label = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                let (elapsed, distance) = timing(&caps)?;
                Some((downstream_label(index, label), elapsed, distance))
            })
        };

        match decoded {
            Some((relay_id, elapsed_seconds, distance_meters)) => HopSegment {
                relay_id: Some(relay_id),
                elapsed_seconds,
                distance_meters,
            },
            None => {
                log::trace!("Undecodable hop {} token: {:?}", index + 1, token);
                HopSegment::malformed()
            }
        }
    }
}

impl Default for PathDecoder {
    fn default() -> Self {
        DEFAULT_DECODER.clone()
    }
}

/// Decoder for the default `RELAY_<n>` naming
pub static DEFAULT_DECODER: LazyLock<PathDecoder> = LazyLock::new(|| {
    PathDecoder::new(DEFAULT_RELAY_PREFIX).expect("Invalid default path regex")
});

/// Decode with the default relay naming
pub fn decode(path: &str) -> Vec<HopSegment> {
    DEFAULT_DECODER.decode(path)
}

/// Elapsed seconds and distance from capture groups 2 and 3
fn timing(caps: &Captures<'_>) -> Option<(f64, f64)> {
    let elapsed = caps.get(2)?.as_str().parse().ok()?;
    let distance = caps.get(3)?.as_str().parse().ok()?;
    Some((elapsed, distance))
}

/// Downstream hops are named by position when the token carries no label
fn downstream_label(index: usize, label: &str) -> String {
    if !label.is_empty() {
        return label.to_string();
    }
    match HopClass::from_position(index) {
        Some(class) => class.label().to_string(),
        None => format!("hop_{}", index + 1),
    }
}
