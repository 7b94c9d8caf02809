//! Track Adjustment Table
//!
//! Per-track corrections keyed by normalized track name. Absent tracks and
//! absent boxes resolve to the identity adjustment.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::weights::BoxPattern;
use crate::error::ConfigError;
use crate::models::normalize_track;

fn one() -> f64 {
    1.0
}

/// Box-level correction: additive offset on the base score, multiplier on box position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxAdjustment {
    #[serde(default)]
    pub offset: f64,
    #[serde(default = "one")]
    pub multiplier: f64,
}

impl BoxAdjustment {
    pub const IDENTITY: BoxAdjustment = BoxAdjustment {
        offset: 0.0,
        multiplier: 1.0,
    };

    pub fn new(offset: f64, multiplier: f64) -> Self {
        Self { offset, multiplier }
    }
}

impl Default for BoxAdjustment {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackAdjustment {
    /// Dominant-box pattern; overrides the profile's generic box table
    #[serde(default)]
    pub pattern: Option<BoxPattern>,
    /// Upset rate in [0, 1]; higher values compress scores harder
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub boxes: BTreeMap<u8, BoxAdjustment>,
}

impl TrackAdjustment {
    pub fn with_pattern(mut self, pattern: BoxPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    pub fn with_box(mut self, box_no: u8, adjustment: BoxAdjustment) -> Self {
        self.boxes.insert(box_no, adjustment);
        self
    }
}

/// Track name -> adjustment, names compared trimmed and upper-cased
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BTreeMap<String, TrackAdjustment>",
    into = "BTreeMap<String, TrackAdjustment>"
)]
pub struct TrackAdjustmentTable {
    tracks: BTreeMap<String, TrackAdjustment>,
}

impl From<BTreeMap<String, TrackAdjustment>> for TrackAdjustmentTable {
    fn from(raw: BTreeMap<String, TrackAdjustment>) -> Self {
        let mut table = Self::new();
        for (track, adjustment) in raw {
            table.insert(&track, adjustment);
        }
        table
    }
}

impl From<TrackAdjustmentTable> for BTreeMap<String, TrackAdjustment> {
    fn from(table: TrackAdjustmentTable) -> Self {
        table.tracks
    }
}

impl TrackAdjustmentTable {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
        }
    }

    /// Insert or replace the adjustment for a track
    pub fn insert(&mut self, track: &str, adjustment: TrackAdjustment) {
        self.tracks.insert(normalize_track(track), adjustment);
    }

    /// Overlay `other` onto this table; its tracks replace existing entries
    pub fn merge(&mut self, other: TrackAdjustmentTable) {
        self.tracks.extend(other.tracks);
    }

    pub fn get(&self, track: &str) -> Option<&TrackAdjustment> {
        self.tracks.get(&normalize_track(track))
    }

    pub fn box_adjustment(&self, track: &str, box_no: u8) -> BoxAdjustment {
        self.get(track)
            .and_then(|t| t.boxes.get(&box_no).copied())
            .unwrap_or(BoxAdjustment::IDENTITY)
    }

    pub fn pattern(&self, track: &str) -> Option<BoxPattern> {
        self.get(track).and_then(|t| t.pattern)
    }

    pub fn volatility(&self, track: &str) -> f64 {
        self.get(track).map(|t| t.volatility).unwrap_or(0.0)
    }

    pub fn tracks(&self) -> impl Iterator<Item = (&str, &TrackAdjustment)> {
        self.tracks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (track, adjustment) in &self.tracks {
            if !(0.0..=1.0).contains(&adjustment.volatility) {
                return Err(ConfigError::InvalidVolatility {
                    track: track.clone(),
                    volatility: adjustment.volatility,
                });
            }
        }
        Ok(())
    }
}

impl Default for TrackAdjustmentTable {
    fn default() -> Self {
        let mut table = Self::new();
        table.insert(
            "ANGLE PARK",
            TrackAdjustment::default()
                .with_pattern(BoxPattern::InsideDominant)
                .with_volatility(0.20)
                .with_box(1, BoxAdjustment::new(0.02, 1.0))
                .with_box(8, BoxAdjustment::new(-0.01, 1.0)),
        );
        table.insert(
            "SANDOWN PARK",
            TrackAdjustment::default()
                .with_pattern(BoxPattern::OutsideDominant)
                .with_volatility(0.35)
                .with_box(8, BoxAdjustment::new(0.015, 1.02)),
        );
        table.insert(
            "WENTWORTH PARK",
            TrackAdjustment::default()
                .with_volatility(0.10)
                .with_box(1, BoxAdjustment::new(0.0, 1.03)),
        );
        table
    }
}
