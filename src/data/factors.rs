//! Factor Table
//!
//! Converts raw entrant attributes into normalized factor values. Two kinds:
//! static lookups (box tables and bucketed attributes) and race-relative
//! percentiles, which rank an entrant against the rest of its field.
//!
//! Percentile directions, declared per factor:
//!
//! | factor        | metric         | direction        |
//! |---------------|----------------|------------------|
//! | `speed`       | best time      | lower is better  |
//! | `early_speed` | sectional time | lower is better  |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;
use crate::models::{EntrantRecord, RaceCard};

/// Additive factors feeding the weighted sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Speed,
    EarlySpeed,
    WinRate,
    PlaceRate,
    Form,
    BoxDraw,
    Freshness,
    WinRecency,
    Age,
    Weight,
}

impl Factor {
    /// Fixed evaluation order for every additive sum
    pub const ALL: [Factor; 10] = [
        Factor::Speed,
        Factor::EarlySpeed,
        Factor::WinRate,
        Factor::PlaceRate,
        Factor::Form,
        Factor::BoxDraw,
        Factor::Freshness,
        Factor::WinRecency,
        Factor::Age,
        Factor::Weight,
    ];

    /// Factors derived from timing data
    pub const TIMING: [Factor; 2] = [Factor::Speed, Factor::EarlySpeed];

    pub fn name(&self) -> &'static str {
        match self {
            Factor::Speed => "speed",
            Factor::EarlySpeed => "early_speed",
            Factor::WinRate => "win_rate",
            Factor::PlaceRate => "place_rate",
            Factor::Form => "form",
            Factor::BoxDraw => "box_draw",
            Factor::Freshness => "freshness",
            Factor::WinRecency => "win_recency",
            Factor::Age => "age",
            Factor::Weight => "weight",
        }
    }

    /// Ranking direction for race-relative percentile factors, `None` for the rest
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Factor::Speed | Factor::EarlySpeed => Some(Direction::LowerIsBetter),
            _ => None,
        }
    }

    pub fn is_timing(&self) -> bool {
        Self::TIMING.contains(self)
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which raw values rank first in a percentile factor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

/// One bucket of a bucketed lookup; `up_to` is an inclusive upper bound,
/// `None` marks the open-ended final bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    #[serde(default)]
    pub up_to: Option<f64>,
    pub value: f64,
}

impl Bucket {
    pub fn new(up_to: f64, value: f64) -> Self {
        Self {
            up_to: Some(up_to),
            value,
        }
    }

    pub fn open(value: f64) -> Self {
        Self { up_to: None, value }
    }
}

/// Ordered bucket table with a fallback for absent input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketTable {
    pub buckets: Vec<Bucket>,
    pub missing: f64,
}

impl BucketTable {
    /// Inputs past either end resolve to the nearest defined bucket
    pub fn lookup(&self, value: Option<f64>) -> f64 {
        let value = match value {
            Some(v) if v.is_finite() => v,
            _ => return self.missing,
        };

        for bucket in &self.buckets {
            match bucket.up_to {
                Some(limit) if value <= limit => return bucket.value,
                None => return bucket.value,
                _ => {}
            }
        }

        self.buckets.last().map(|b| b.value).unwrap_or(self.missing)
    }

    /// Bounds must be finite and strictly ascending, with at most one open
    /// bucket and only in last position
    pub fn validate(&self, table: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBucketTable {
            table: table.to_string(),
            reason,
        };

        if self.buckets.is_empty() {
            return Err(invalid("no buckets".to_string()));
        }

        let last = self.buckets.len() - 1;
        let mut previous: Option<f64> = None;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if !bucket.value.is_finite() {
                return Err(invalid(format!("bucket {} has a non-finite value", i)));
            }
            match bucket.up_to {
                None if i != last => {
                    return Err(invalid(format!("open bucket {} is not last", i)));
                }
                None => {}
                Some(limit) if !limit.is_finite() => {
                    return Err(invalid(format!("bucket {} has a non-finite bound", i)));
                }
                Some(limit) => {
                    if let Some(prev) = previous {
                        if limit <= prev {
                            return Err(invalid(format!(
                                "bound {} follows {}; bounds must ascend",
                                limit, prev
                            )));
                        }
                    }
                    previous = Some(limit);
                }
            }
        }

        Ok(())
    }
}

/// Value for `box_no`, or for the nearest box present in the table
///
/// Equidistant neighbours resolve to the lower box.
pub fn nearest_box_value(table: &BTreeMap<u8, f64>, box_no: u8) -> Option<f64> {
    let below = table.range(..=box_no).next_back();
    let above = table.range(box_no..).next();

    match (below, above) {
        (Some((&b, &v)), Some((&a, &w))) => {
            if box_no - b <= a - box_no {
                Some(v)
            } else {
                Some(w)
            }
        }
        (Some((_, &v)), None) | (None, Some((_, &v))) => Some(v),
        (None, None) => None,
    }
}

/// Static tables used by the factor computations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorTables {
    /// Generic box draw quality in [0, 1]
    pub box_draw: BTreeMap<u8, f64>,
    pub age_months: BucketTable,
    pub weight_kg: BucketTable,
    pub days_since_last_race: BucketTable,
    pub days_since_last_win: BucketTable,
    /// Multiplier by career starts
    pub experience: BucketTable,
    /// Number of recent runs averaged for form
    pub form_window: usize,
    /// Mean margin (lengths) at which form bottoms out at 0
    pub form_margin_ceiling: f64,
    pub form_missing: f64,
}

impl Default for FactorTables {
    fn default() -> Self {
        Self {
            box_draw: [
                (1, 1.00),
                (2, 0.85),
                (3, 0.75),
                (4, 0.70),
                (5, 0.65),
                (6, 0.60),
                (7, 0.65),
                (8, 0.80),
            ]
            .into_iter()
            .collect(),
            age_months: BucketTable {
                buckets: vec![
                    Bucket::new(18.0, 0.70),
                    Bucket::new(24.0, 0.92),
                    Bucket::new(30.0, 1.00),
                    Bucket::new(36.0, 0.90),
                    Bucket::new(42.0, 0.72),
                    Bucket::open(0.55),
                ],
                missing: 0.80,
            },
            weight_kg: BucketTable {
                buckets: vec![
                    Bucket::new(27.0, 0.85),
                    Bucket::new(30.0, 0.95),
                    Bucket::new(33.0, 1.00),
                    Bucket::new(36.0, 0.96),
                    Bucket::open(0.90),
                ],
                missing: 0.93,
            },
            days_since_last_race: BucketTable {
                buckets: vec![
                    Bucket::new(3.0, 0.60),
                    Bucket::new(10.0, 1.00),
                    Bucket::new(21.0, 0.80),
                    Bucket::new(42.0, 0.55),
                    Bucket::open(0.30),
                ],
                missing: 0.50,
            },
            days_since_last_win: BucketTable {
                buckets: vec![
                    Bucket::new(14.0, 1.00),
                    Bucket::new(30.0, 0.80),
                    Bucket::new(60.0, 0.60),
                    Bucket::new(120.0, 0.40),
                    Bucket::open(0.20),
                ],
                missing: 0.10,
            },
            experience: BucketTable {
                buckets: vec![
                    Bucket::new(0.0, 0.90),
                    Bucket::new(4.0, 0.94),
                    Bucket::new(14.0, 0.98),
                    Bucket::new(29.0, 1.00),
                    Bucket::new(59.0, 1.03),
                    Bucket::open(1.01),
                ],
                missing: 1.00,
            },
            form_window: 3,
            form_margin_ceiling: 8.0,
            form_missing: 0.40,
        }
    }
}

impl FactorTables {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, table) in [
            ("age_months", &self.age_months),
            ("weight_kg", &self.weight_kg),
            ("days_since_last_race", &self.days_since_last_race),
            ("days_since_last_win", &self.days_since_last_win),
            ("experience", &self.experience),
        ] {
            table.validate(name)?;
        }
        Ok(())
    }
}

/// Trainer multiplier: named overrides first, then strike-rate buckets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerTable {
    pub strike_rate: BucketTable,
    pub named: BTreeMap<String, f64>,
}

impl TrainerTable {
    pub fn multiplier(&self, entrant: &EntrantRecord) -> f64 {
        if let Some(trainer) = entrant.trainer.as_deref() {
            let trainer = trainer.trim();
            if let Some((_, &m)) = self
                .named
                .iter()
                .find(|(name, _)| name.trim().eq_ignore_ascii_case(trainer))
            {
                return m;
            }
        }
        self.strike_rate.lookup(entrant.trainer_strike_rate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strike_rate.validate("trainer_strike_rate")
    }
}

impl Default for TrainerTable {
    fn default() -> Self {
        Self {
            strike_rate: BucketTable {
                buckets: vec![
                    Bucket::new(10.0, 0.97),
                    Bucket::new(18.0, 1.00),
                    Bucket::new(25.0, 1.04),
                    Bucket::open(1.07),
                ],
                missing: 1.00,
            },
            named: BTreeMap::new(),
        }
    }
}

/// Factor values for one entrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSet {
    pub box_no: u8,
    values: BTreeMap<Factor, f64>,
    /// Entrant had no timing data, so timing weight is redistributed
    pub timing_missing: bool,
}

impl FactorSet {
    pub fn get(&self, factor: Factor) -> f64 {
        self.values.get(&factor).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> &BTreeMap<Factor, f64> {
        &self.values
    }
}

/// Rank a race-relative metric into percentiles in (0, 1]
///
/// The best value gets 1.0; ties share the better position. Entrants
/// without a value get `1/(n+1)`, below every entrant that has one.
pub fn race_percentiles(values: &[Option<f64>], direction: Direction) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|x| x.is_finite()).map(|x| (i, x)))
        .collect();

    ranked.sort_by(|a, b| {
        let ord = a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal);
        let ord = match direction {
            Direction::LowerIsBetter => ord,
            Direction::HigherIsBetter => ord.reverse(),
        };
        ord.then(a.0.cmp(&b.0))
    });

    let mut percentiles = vec![1.0 / (n + 1) as f64; n];
    let mut position = 0;
    for (i, &(idx, value)) in ranked.iter().enumerate() {
        if i > 0 && value != ranked[i - 1].1 {
            position = i;
        }
        percentiles[idx] = (n - position) as f64 / n as f64;
    }

    percentiles
}

/// Factor computation for race entrants
pub struct FactorEngineering;

impl FactorEngineering {
    /// Form from recent margins: 1.0 for a winner, 0.0 at the margin ceiling
    pub fn form(entrant: &EntrantRecord, tables: &FactorTables) -> f64 {
        match entrant.mean_recent_margin(tables.form_window) {
            Some(mean) if tables.form_margin_ceiling > 0.0 => {
                (1.0 - mean / tables.form_margin_ceiling).clamp(0.0, 1.0)
            }
            Some(_) => tables.form_missing,
            None => tables.form_missing,
        }
    }

    pub fn box_draw(box_no: u8, tables: &FactorTables) -> f64 {
        nearest_box_value(&tables.box_draw, box_no).unwrap_or(0.5)
    }

    /// Static factors that need no race context
    fn static_factors(entrant: &EntrantRecord, tables: &FactorTables) -> [(Factor, f64); 8] {
        [
            (Factor::WinRate, entrant.win_rate()),
            (Factor::PlaceRate, entrant.place_rate()),
            (Factor::Form, Self::form(entrant, tables)),
            (Factor::BoxDraw, Self::box_draw(entrant.box_no, tables)),
            (
                Factor::Freshness,
                tables
                    .days_since_last_race
                    .lookup(entrant.days_since_last_race.map(f64::from)),
            ),
            (
                Factor::WinRecency,
                tables
                    .days_since_last_win
                    .lookup(entrant.days_since_last_win.map(f64::from)),
            ),
            (
                Factor::Age,
                tables.age_months.lookup(entrant.age_months.map(f64::from)),
            ),
            (Factor::Weight, tables.weight_kg.lookup(entrant.weight_kg)),
        ]
    }

    /// Compute every factor for every entrant in the race, in entrant order
    pub fn create_race_factors(race: &RaceCard, tables: &FactorTables) -> Vec<FactorSet> {
        if race.entrants.is_empty() {
            return Vec::new();
        }

        let best_times: Vec<Option<f64>> =
            race.entrants.iter().map(|e| e.valid_best_time()).collect();
        let sectionals: Vec<Option<f64>> = race
            .entrants
            .iter()
            .map(|e| e.valid_sectional_time())
            .collect();

        let speed = race_percentiles(&best_times, Direction::LowerIsBetter);
        let early_speed = race_percentiles(&sectionals, Direction::LowerIsBetter);

        race.entrants
            .iter()
            .enumerate()
            .map(|(i, entrant)| {
                let mut values = BTreeMap::new();
                values.insert(Factor::Speed, speed[i]);
                values.insert(Factor::EarlySpeed, early_speed[i]);
                values.extend(Self::static_factors(entrant, tables));

                FactorSet {
                    box_no: entrant.box_no,
                    values,
                    timing_missing: entrant.lacks_timing(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timed(name: &str, box_no: u8, best: Option<f64>, sectional: Option<f64>) -> EntrantRecord {
        let mut e = EntrantRecord::new(name, box_no);
        e.best_time = best;
        e.sectional_time = sectional;
        e
    }

    #[test]
    fn test_fastest_time_gets_highest_percentile() {
        let p = race_percentiles(
            &[Some(30.10), Some(29.80), Some(30.45)],
            Direction::LowerIsBetter,
        );
        assert!((p[1] - 1.0).abs() < 1e-12);
        assert!(p[1] > p[0]);
        assert!(p[0] > p[2]);
    }

    #[test]
    fn test_higher_is_better_direction() {
        let p = race_percentiles(&[Some(0.1), Some(0.5), Some(0.3)], Direction::HigherIsBetter);
        assert!((p[1] - 1.0).abs() < 1e-12);
        assert!(p[2] > p[0]);
    }

    #[test]
    fn test_missing_metric_sorts_lowest() {
        let p = race_percentiles(
            &[None, Some(30.9), Some(29.5), None],
            Direction::LowerIsBetter,
        );
        assert!((p[2] - 1.0).abs() < 1e-12);
        assert!((p[0] - 0.2).abs() < 1e-12);
        assert!((p[3] - 0.2).abs() < 1e-12);
        // Slowest dog with a time still beats a dog with no time
        assert!(p[1] > p[0]);
    }

    #[test]
    fn test_tied_values_share_better_position() {
        let p = race_percentiles(&[Some(30.0), Some(30.0), Some(31.0)], Direction::LowerIsBetter);
        assert_eq!(p[0], p[1]);
        assert!((p[0] - 1.0).abs() < 1e-12);
        assert!((p[2] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_percentiles_in_unit_interval() {
        let p = race_percentiles(&[None, None], Direction::LowerIsBetter);
        assert!(p.iter().all(|&x| x > 0.0 && x <= 1.0));
        assert!(race_percentiles(&[], Direction::LowerIsBetter).is_empty());
    }

    #[test]
    fn test_lone_missing_entrant_is_not_top() {
        let p = race_percentiles(&[None], Direction::LowerIsBetter);
        assert!(p[0] < 1.0);
    }

    #[test]
    fn test_bucket_lookup_nearest_bucket() {
        let tables = FactorTables::default();
        // Below the first bound resolves to the first bucket
        assert!((tables.age_months.lookup(Some(2.0)) - 0.70).abs() < 1e-12);
        assert!((tables.age_months.lookup(Some(26.0)) - 1.00).abs() < 1e-12);
        assert!((tables.age_months.lookup(Some(90.0)) - 0.55).abs() < 1e-12);
        assert!((tables.age_months.lookup(None) - 0.80).abs() < 1e-12);
        assert!((tables.age_months.lookup(Some(f64::NAN)) - 0.80).abs() < 1e-12);
    }

    #[test]
    fn test_bucket_lookup_closed_table() {
        let table = BucketTable {
            buckets: vec![Bucket::new(10.0, 1.0), Bucket::new(20.0, 2.0)],
            missing: 0.0,
        };
        assert_eq!(table.lookup(Some(25.0)), 2.0);
    }

    #[test]
    fn test_nearest_box_value() {
        let table: BTreeMap<u8, f64> = [(1, 1.0), (4, 4.0), (8, 8.0)].into_iter().collect();
        assert_eq!(nearest_box_value(&table, 4), Some(4.0));
        assert_eq!(nearest_box_value(&table, 2), Some(1.0));
        assert_eq!(nearest_box_value(&table, 6), Some(4.0)); // tie resolves low
        assert_eq!(nearest_box_value(&table, 7), Some(8.0));
        assert_eq!(nearest_box_value(&table, 10), Some(8.0));
        assert_eq!(nearest_box_value(&BTreeMap::new(), 3), None);
    }

    #[test]
    fn test_form_factor() {
        let tables = FactorTables::default();
        let mut e = EntrantRecord::new("Form", 1);
        assert!((FactorEngineering::form(&e, &tables) - 0.40).abs() < 1e-12);

        e.recent_margins = vec![0.0, 0.0, 0.0];
        assert!((FactorEngineering::form(&e, &tables) - 1.0).abs() < 1e-12);

        e.recent_margins = vec![4.0, 4.0, 4.0, 0.0];
        assert!((FactorEngineering::form(&e, &tables) - 0.5).abs() < 1e-12);

        e.recent_margins = vec![20.0];
        assert_eq!(FactorEngineering::form(&e, &tables), 0.0);
    }

    #[test]
    fn test_create_race_factors_defines_every_factor() {
        let tables = FactorTables::default();
        let race = RaceCard::new("The Meadows", 2, 525)
            .with_entrant(timed("Quick", 1, Some(29.6), Some(5.20)))
            .with_entrant(timed("Steady", 5, Some(30.1), None))
            .with_entrant(EntrantRecord::new("Unknown", 8));

        let factors = FactorEngineering::create_race_factors(&race, &tables);
        assert_eq!(factors.len(), 3);

        for set in &factors {
            for factor in Factor::ALL {
                let v = set.get(factor);
                assert!(v.is_finite(), "{} undefined", factor);
                assert!(set.values().contains_key(&factor));
            }
        }

        assert!((factors[0].get(Factor::Speed) - 1.0).abs() < 1e-12);
        assert!(factors[1].get(Factor::Speed) > factors[2].get(Factor::Speed));
        assert!(!factors[0].timing_missing);
        assert!(!factors[1].timing_missing);
        assert!(factors[2].timing_missing);
    }

    #[test]
    fn test_non_positive_times_count_as_missing() {
        let tables = FactorTables::default();
        let race = RaceCard::new("Wentworth Park", 1, 520)
            .with_entrant(timed("Zero", 1, Some(0.0), Some(0.0)))
            .with_entrant(timed("Real", 2, Some(30.2), Some(5.5)));

        let factors = FactorEngineering::create_race_factors(&race, &tables);
        assert!(factors[0].timing_missing);
        assert!(factors[1].get(Factor::Speed) > factors[0].get(Factor::Speed));
    }

    #[test]
    fn test_trainer_multiplier() {
        let mut trainers = TrainerTable::default();
        trainers.named.insert("J. Smith".to_string(), 1.06);

        let mut e = EntrantRecord::new("Trained", 3);
        assert!((trainers.multiplier(&e) - 1.0).abs() < 1e-12);

        e.trainer_strike_rate = Some(22.0);
        assert!((trainers.multiplier(&e) - 1.04).abs() < 1e-12);

        // Named override wins over the strike rate
        e.trainer = Some(" j. smith".to_string());
        assert!((trainers.multiplier(&e) - 1.06).abs() < 1e-12);
    }

    #[test]
    fn test_factor_directions_declared() {
        assert_eq!(Factor::Speed.direction(), Some(Direction::LowerIsBetter));
        assert_eq!(Factor::EarlySpeed.direction(), Some(Direction::LowerIsBetter));
        assert_eq!(Factor::WinRate.direction(), None);
    }

    #[test]
    fn test_bucket_table_validation() {
        assert!(FactorTables::default().validate().is_ok());
        assert!(TrainerTable::default().validate().is_ok());

        let unsorted = BucketTable {
            buckets: vec![
                Bucket::new(30.0, 0.8),
                Bucket::new(18.0, 0.7),
                Bucket::open(0.9),
            ],
            missing: 0.8,
        };
        assert!(matches!(
            unsorted.validate("age_months"),
            Err(ConfigError::InvalidBucketTable { .. })
        ));

        let early_open = BucketTable {
            buckets: vec![Bucket::open(0.9), Bucket::new(18.0, 0.7), Bucket::open(0.8)],
            missing: 0.8,
        };
        assert!(early_open.validate("age_months").is_err());

        let empty = BucketTable {
            buckets: Vec::new(),
            missing: 0.8,
        };
        assert!(empty.validate("age_months").is_err());
    }

    #[test]
    fn test_empty_race() {
        let race = RaceCard::new("Nowhere", 1, 400);
        assert!(FactorEngineering::create_race_factors(&race, &FactorTables::default()).is_empty());
    }
}
