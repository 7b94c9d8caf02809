//! Weight Profile Selector
//!
//! Maps a race distance onto one of three weight profiles and resolves the
//! box multiplier table (generic, or the track's dominant-box pattern).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::data::factors::{nearest_box_value, Factor};
use crate::error::ConfigError;

/// Tolerance for "weights sum to 1.0"
pub const WEIGHT_SUM_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceCategory {
    Sprint,
    Middle,
    Long,
}

impl fmt::Display for DistanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DistanceCategory::Sprint => "sprint",
            DistanceCategory::Middle => "middle",
            DistanceCategory::Long => "long",
        };
        f.write_str(s)
    }
}

/// Inclusive distance range for a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceBand {
    pub category: DistanceCategory,
    pub min_m: u32,
    pub max_m: u32,
}

impl DistanceBand {
    pub fn new(category: DistanceCategory, min_m: u32, max_m: u32) -> Self {
        Self {
            category,
            min_m,
            max_m,
        }
    }

    /// Metres between `distance_m` and the band, 0 when inside
    pub fn gap(&self, distance_m: u32) -> u32 {
        if distance_m < self.min_m {
            self.min_m - distance_m
        } else if distance_m > self.max_m {
            distance_m - self.max_m
        } else {
            0
        }
    }
}

pub fn default_distance_bands() -> Vec<DistanceBand> {
    vec![
        DistanceBand::new(DistanceCategory::Sprint, 0, 399),
        DistanceBand::new(DistanceCategory::Middle, 400, 500),
        DistanceBand::new(DistanceCategory::Long, 501, 1000),
    ]
}

/// Multiplicative corrections, in the order they are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Multiplier {
    BoxPosition,
    TrainerTier,
    Experience,
    Closer,
    PaceBox,
}

/// Canonical application order of the multiplicative corrections
pub const MULTIPLIER_ORDER: [Multiplier; 5] = [
    Multiplier::BoxPosition,
    Multiplier::TrainerTier,
    Multiplier::Experience,
    Multiplier::Closer,
    Multiplier::PaceBox,
];

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Multiplier::BoxPosition => "box_position",
            Multiplier::TrainerTier => "trainer_tier",
            Multiplier::Experience => "experience",
            Multiplier::Closer => "closer",
            Multiplier::PaceBox => "pace_box",
        };
        f.write_str(s)
    }
}

/// Allowed span of a multiplicative factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MultiplierRange {
    pub min: f64,
    pub max: f64,
}

impl MultiplierRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Bonus for dogs whose finishing speed outranks their early speed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloserSettings {
    /// Minimum `speed - early_speed` percentile gap
    pub min_gap: f64,
    pub multiplier: f64,
}

/// Bonus for early-speed dogs drawn in the listed boxes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaceBoxSettings {
    pub min_early_percentile: f64,
    pub boxes: Vec<u8>,
    pub multiplier: f64,
}

/// Weights and multiplier settings for one distance category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightProfile {
    pub weights: BTreeMap<Factor, f64>,
    pub multiplier_ranges: BTreeMap<Multiplier, MultiplierRange>,
    /// Generic box multiplier, replaced by a track pattern table when one applies
    pub box_multipliers: BTreeMap<u8, f64>,
    pub closer: CloserSettings,
    pub pace_box: PaceBoxSettings,
}

impl WeightProfile {
    pub fn weight(&self, factor: Factor) -> f64 {
        self.weights.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn weight_sum(&self) -> f64 {
        Factor::ALL.iter().map(|f| self.weight(*f)).sum()
    }

    /// Configured range, or no clamping when the profile leaves it out
    pub fn range(&self, multiplier: Multiplier) -> MultiplierRange {
        self.multiplier_ranges
            .get(&multiplier)
            .copied()
            .unwrap_or(MultiplierRange::new(0.0, f64::MAX))
    }

    pub fn validate(&self, category: DistanceCategory) -> Result<(), ConfigError> {
        for (factor, &weight) in &self.weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    category,
                    factor: factor.to_string(),
                    weight,
                });
            }
        }

        let sum = self.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_EPSILON {
            return Err(ConfigError::WeightsDoNotSumToOne { category, sum });
        }

        for (multiplier, range) in &self.multiplier_ranges {
            if !(range.min > 0.0 && range.min <= range.max) {
                return Err(ConfigError::InvalidMultiplierRange {
                    factor: multiplier.to_string(),
                    min: range.min,
                    max: range.max,
                });
            }
        }

        Ok(())
    }

    fn with_common_ranges(
        weights: [(Factor, f64); 10],
        box_multipliers: [(u8, f64); 8],
        closer: CloserSettings,
        pace_box: PaceBoxSettings,
    ) -> Self {
        Self {
            weights: weights.into_iter().collect(),
            multiplier_ranges: [
                (Multiplier::BoxPosition, MultiplierRange::new(0.85, 1.15)),
                (Multiplier::TrainerTier, MultiplierRange::new(0.95, 1.08)),
                (Multiplier::Experience, MultiplierRange::new(0.90, 1.05)),
                (Multiplier::Closer, MultiplierRange::new(1.00, 1.08)),
                (Multiplier::PaceBox, MultiplierRange::new(1.00, 1.06)),
            ]
            .into_iter()
            .collect(),
            box_multipliers: box_multipliers.into_iter().collect(),
            closer,
            pace_box,
        }
    }

    /// Under 400m: early pace and the draw dominate
    pub fn sprint() -> Self {
        Self::with_common_ranges(
            [
                (Factor::Speed, 0.25),
                (Factor::EarlySpeed, 0.20),
                (Factor::WinRate, 0.12),
                (Factor::PlaceRate, 0.10),
                (Factor::Form, 0.10),
                (Factor::BoxDraw, 0.10),
                (Factor::Freshness, 0.05),
                (Factor::WinRecency, 0.03),
                (Factor::Age, 0.03),
                (Factor::Weight, 0.02),
            ],
            [
                (1, 1.08),
                (2, 1.04),
                (3, 1.00),
                (4, 0.98),
                (5, 0.96),
                (6, 0.96),
                (7, 0.98),
                (8, 1.04),
            ],
            CloserSettings {
                min_gap: 0.25,
                multiplier: 1.00,
            },
            PaceBoxSettings {
                min_early_percentile: 0.75,
                boxes: vec![1, 2],
                multiplier: 1.05,
            },
        )
    }

    pub fn middle() -> Self {
        Self::with_common_ranges(
            [
                (Factor::Speed, 0.28),
                (Factor::EarlySpeed, 0.15),
                (Factor::WinRate, 0.13),
                (Factor::PlaceRate, 0.10),
                (Factor::Form, 0.12),
                (Factor::BoxDraw, 0.07),
                (Factor::Freshness, 0.06),
                (Factor::WinRecency, 0.04),
                (Factor::Age, 0.03),
                (Factor::Weight, 0.02),
            ],
            [
                (1, 1.05),
                (2, 1.02),
                (3, 1.00),
                (4, 0.99),
                (5, 0.98),
                (6, 0.98),
                (7, 0.99),
                (8, 1.03),
            ],
            CloserSettings {
                min_gap: 0.25,
                multiplier: 1.03,
            },
            PaceBoxSettings {
                min_early_percentile: 0.75,
                boxes: vec![1, 2],
                multiplier: 1.03,
            },
        )
    }

    /// Over 500m: finishing speed and form carry more weight than the draw
    pub fn long() -> Self {
        Self::with_common_ranges(
            [
                (Factor::Speed, 0.30),
                (Factor::EarlySpeed, 0.10),
                (Factor::WinRate, 0.14),
                (Factor::PlaceRate, 0.11),
                (Factor::Form, 0.14),
                (Factor::BoxDraw, 0.05),
                (Factor::Freshness, 0.06),
                (Factor::WinRecency, 0.04),
                (Factor::Age, 0.04),
                (Factor::Weight, 0.02),
            ],
            [
                (1, 1.02),
                (2, 1.01),
                (3, 1.00),
                (4, 1.00),
                (5, 1.00),
                (6, 0.99),
                (7, 1.00),
                (8, 1.02),
            ],
            CloserSettings {
                min_gap: 0.25,
                multiplier: 1.06,
            },
            PaceBoxSettings {
                min_early_percentile: 0.80,
                boxes: vec![1],
                multiplier: 1.01,
            },
        )
    }
}

/// One profile per distance category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightProfiles {
    pub sprint: WeightProfile,
    pub middle: WeightProfile,
    pub long: WeightProfile,
}

impl WeightProfiles {
    pub fn get(&self, category: DistanceCategory) -> &WeightProfile {
        match category {
            DistanceCategory::Sprint => &self.sprint,
            DistanceCategory::Middle => &self.middle,
            DistanceCategory::Long => &self.long,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DistanceCategory, &WeightProfile)> {
        [
            (DistanceCategory::Sprint, &self.sprint),
            (DistanceCategory::Middle, &self.middle),
            (DistanceCategory::Long, &self.long),
        ]
        .into_iter()
    }
}

impl Default for WeightProfiles {
    fn default() -> Self {
        Self {
            sprint: WeightProfile::sprint(),
            middle: WeightProfile::middle(),
            long: WeightProfile::long(),
        }
    }
}

/// Dominant-box classification of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxPattern {
    InsideDominant,
    OutsideDominant,
}

pub fn default_box_patterns() -> BTreeMap<BoxPattern, BTreeMap<u8, f64>> {
    let inside = [
        (1, 1.10),
        (2, 1.06),
        (3, 1.02),
        (4, 0.98),
        (5, 0.96),
        (6, 0.94),
        (7, 0.94),
        (8, 0.96),
    ];
    let outside = [
        (1, 0.98),
        (2, 0.96),
        (3, 0.96),
        (4, 0.98),
        (5, 1.00),
        (6, 1.02),
        (7, 1.05),
        (8, 1.08),
    ];

    [
        (BoxPattern::InsideDominant, inside.into_iter().collect()),
        (BoxPattern::OutsideDominant, outside.into_iter().collect()),
    ]
    .into_iter()
    .collect()
}

pub fn validate_distance_bands(bands: &[DistanceBand]) -> Result<(), ConfigError> {
    if bands.is_empty() {
        return Err(ConfigError::NoDistanceBands);
    }
    for band in bands {
        if band.min_m > band.max_m {
            return Err(ConfigError::InvalidDistanceBand {
                category: band.category,
                min_m: band.min_m,
                max_m: band.max_m,
            });
        }
    }
    Ok(())
}

/// Profile chosen for one race
#[derive(Debug, Clone, Copy)]
pub struct SelectedProfile<'a> {
    pub category: DistanceCategory,
    pub profile: &'a WeightProfile,
    pub box_multipliers: &'a BTreeMap<u8, f64>,
}

impl SelectedProfile<'_> {
    /// Box multiplier before range clamping; nearest listed box, else 1.0
    pub fn box_multiplier(&self, box_no: u8) -> f64 {
        nearest_box_value(self.box_multipliers, box_no).unwrap_or(1.0)
    }
}

/// Chooses the weight profile for a race
pub struct WeightProfileSelector<'a> {
    bands: &'a [DistanceBand],
    profiles: &'a WeightProfiles,
    patterns: &'a BTreeMap<BoxPattern, BTreeMap<u8, f64>>,
}

impl<'a> WeightProfileSelector<'a> {
    pub fn new(
        bands: &'a [DistanceBand],
        profiles: &'a WeightProfiles,
        patterns: &'a BTreeMap<BoxPattern, BTreeMap<u8, f64>>,
    ) -> Self {
        Self {
            bands,
            profiles,
            patterns,
        }
    }

    /// Band containing the distance; otherwise the nearest band, ties to the longer one
    pub fn category_for(&self, distance_m: u32) -> DistanceCategory {
        self.bands
            .iter()
            .min_by(|a, b| {
                a.gap(distance_m)
                    .cmp(&b.gap(distance_m))
                    .then(b.category.cmp(&a.category))
            })
            .map(|band| band.category)
            .unwrap_or(DistanceCategory::Long)
    }

    pub fn select(&self, distance_m: u32, pattern: Option<BoxPattern>) -> SelectedProfile<'a> {
        let category = self.category_for(distance_m);
        let profile = self.profiles.get(category);
        let box_multipliers = pattern
            .and_then(|p| self.patterns.get(&p))
            .unwrap_or(&profile.box_multipliers);

        SelectedProfile {
            category,
            profile,
            box_multipliers,
        }
    }
}
