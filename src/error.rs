use std::collections::HashSet;
use thiserror::Error;

use crate::core::tiers::Tier;
use crate::core::weights::DistanceCategory;
use crate::models::RaceCard;

/// Errors raised at the engine boundary for structurally invalid input
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{track} race {race_number} has no entrants")]
    EmptyRace { track: String, race_number: u32 },

    #[error("box number must be between 1 and {max}, got {box_no} ({name})")]
    InvalidBox { name: String, box_no: u8, max: u8 },

    #[error("box {box_no} appears more than once in {track} race {race_number}")]
    DuplicateBox {
        track: String,
        race_number: u32,
        box_no: u8,
    },

    #[error("{track} race {race_number} has entries with distances {first}m and {second}m")]
    MixedRace {
        track: String,
        race_number: u32,
        first: u32,
        second: u32,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors found while loading or validating the configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("additive weights for {category:?} sum to {sum:.6}, expected 1.0")]
    WeightsDoNotSumToOne { category: DistanceCategory, sum: f64 },

    #[error("weight for {factor} in {category:?} profile is negative ({weight})")]
    NegativeWeight {
        category: DistanceCategory,
        factor: String,
        weight: f64,
    },

    #[error("multiplier range for {factor} is invalid: [{min}, {max}]")]
    InvalidMultiplierRange { factor: String, min: f64, max: f64 },

    #[error("distance band for {category:?} is invalid: {min_m}m..={max_m}m")]
    InvalidDistanceBand {
        category: DistanceCategory,
        min_m: u32,
        max_m: u32,
    },

    #[error("no distance bands configured")]
    NoDistanceBands,

    #[error("timing fallback boost {0} outside 1.0..=1.5")]
    InvalidFallbackBoost(f64),

    #[error("timing fallback cannot boost the timing factor {0}")]
    InvalidFallbackFactor(String),

    #[error("bucket table {table} is invalid: {reason}")]
    InvalidBucketTable { table: String, reason: String },

    #[error("compression floor for {name} must be in (0, 1], got {floor}")]
    InvalidCompressionFloor { name: String, floor: f64 },

    #[error("volatility for track {track} must be in [0, 1], got {volatility}")]
    InvalidVolatility { track: String, volatility: f64 },

    #[error("tier rules must be ordered strictest first: {previous} listed before {next}")]
    UnorderedTierRules { previous: Tier, next: Tier },

    #[error("tier rule {stricter} does not imply the looser rule {looser}")]
    TierRuleNotImplied { stricter: Tier, looser: Tier },

    #[error("tier rule cannot target {0}")]
    NoBetRule(Tier),

    #[error("ensemble weight for {source_name} is invalid ({weight})")]
    InvalidBlendWeight { source_name: String, weight: f64 },

    #[error("ensemble weights sum to {0:.6}, expected 1.0")]
    BlendWeightsDoNotSumToOne(f64),

    #[error("hybrid confidence threshold must be within 0..=100, got {0}")]
    InvalidConfidenceThreshold(f64),
}

/// Validate a race before it enters the engine
pub fn validate_race(race: &RaceCard, max_box: u8) -> Result<(), EngineError> {
    if race.entrants.is_empty() {
        return Err(EngineError::EmptyRace {
            track: race.track.clone(),
            race_number: race.race_number,
        });
    }

    let mut seen = HashSet::with_capacity(race.entrants.len());
    for entrant in &race.entrants {
        validate_box_number(&entrant.name, entrant.box_no, max_box)?;
        if !seen.insert(entrant.box_no) {
            return Err(EngineError::DuplicateBox {
                track: race.track.clone(),
                race_number: race.race_number,
                box_no: entrant.box_no,
            });
        }
    }

    Ok(())
}

pub fn validate_box_number(name: &str, box_no: u8, max_box: u8) -> Result<(), EngineError> {
    if !(1..=max_box).contains(&box_no) {
        return Err(EngineError::InvalidBox {
            name: name.to_string(),
            box_no,
            max: max_box,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntrantRecord;

    fn race_with_boxes(boxes: &[u8]) -> RaceCard {
        boxes.iter().fold(RaceCard::new("Sandown", 1, 515), |race, &b| {
            race.with_entrant(EntrantRecord::new(format!("Dog {}", b), b))
        })
    }

    #[test]
    fn test_validate_race_valid() {
        assert!(validate_race(&race_with_boxes(&[1, 2, 5, 8]), 8).is_ok());
    }

    #[test]
    fn test_validate_race_empty() {
        let err = validate_race(&race_with_boxes(&[]), 8).unwrap_err();
        assert!(matches!(err, EngineError::EmptyRace { .. }));
    }

    #[test]
    fn test_validate_box_number_invalid() {
        assert!(validate_box_number("a", 0, 8).is_err());
        assert!(validate_box_number("a", 9, 8).is_err());
        assert!(validate_box_number("a", 9, 10).is_ok());
    }

    #[test]
    fn test_validate_race_duplicate_box() {
        let err = validate_race(&race_with_boxes(&[1, 3, 3]), 8).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateBox { box_no: 3, .. }));
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidBox {
            name: "Rex".to_string(),
            box_no: 11,
            max: 8,
        };
        assert!(err.to_string().contains("between 1 and 8"));
    }
}
