//! Score Aggregator
//!
//! Produces one rule-based score per entrant:
//!
//! 1. additive base: weighted sum of factor values (timing weight
//!    redistributed when the entrant has no timing data) plus the track's
//!    box offset, floored at 0
//! 2. multiplicative corrections in [`MULTIPLIER_ORDER`], each clamped into
//!    the profile's range
//! 3. field-similarity then track-volatility compression toward the race mean
//! 4. scaled to points

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::track::TrackAdjustmentTable;
use crate::core::weights::{
    default_box_patterns, default_distance_bands, validate_distance_bands, BoxPattern,
    DistanceBand, DistanceCategory, Multiplier, SelectedProfile, WeightProfileSelector,
    WeightProfiles, MULTIPLIER_ORDER,
};
use crate::data::factors::{Factor, FactorEngineering, FactorSet, FactorTables, TrainerTable};
use crate::error::ConfigError;
use crate::models::{EntrantRecord, RaceCard};

/// Weight redistribution for entrants without timing data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingFallback {
    /// Multiplier on the alternate factors' weights, within 1.0..=1.5
    pub boost: f64,
    pub alternate: Vec<Factor>,
}

impl Default for TimingFallback {
    fn default() -> Self {
        Self {
            boost: 1.3,
            alternate: vec![Factor::WinRate, Factor::PlaceRate, Factor::BoxDraw],
        }
    }
}

/// Compresses near-identical fields toward their mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSimilarity {
    /// Coefficient of variation below which compression starts
    pub cv_threshold: f64,
    /// Compression factor reached when every score is equal
    pub floor: f64,
}

impl Default for FieldSimilarity {
    fn default() -> Self {
        Self {
            cv_threshold: 0.05,
            floor: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackVolatility {
    /// Compression factor at volatility 1.0
    pub floor: f64,
}

impl Default for TrackVolatility {
    fn default() -> Self {
        Self { floor: 0.7 }
    }
}

/// Everything the aggregator needs apart from track adjustments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub max_box: u8,
    pub score_scale: f64,
    pub distance_bands: Vec<DistanceBand>,
    pub profiles: WeightProfiles,
    pub box_patterns: BTreeMap<BoxPattern, BTreeMap<u8, f64>>,
    pub factor_tables: FactorTables,
    pub trainers: TrainerTable,
    pub timing_fallback: TimingFallback,
    pub field_similarity: FieldSimilarity,
    pub track_volatility: TrackVolatility,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            max_box: 8,
            score_scale: 100.0,
            distance_bands: default_distance_bands(),
            profiles: WeightProfiles::default(),
            box_patterns: default_box_patterns(),
            factor_tables: FactorTables::default(),
            trainers: TrainerTable::default(),
            timing_fallback: TimingFallback::default(),
            field_similarity: FieldSimilarity::default(),
            track_volatility: TrackVolatility::default(),
        }
    }
}

impl ScoringSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_distance_bands(&self.distance_bands)?;
        self.factor_tables.validate()?;
        self.trainers.validate()?;

        for (category, profile) in self.profiles.iter() {
            profile.validate(category)?;
        }

        let boost = self.timing_fallback.boost;
        if !(1.0..=1.5).contains(&boost) {
            return Err(ConfigError::InvalidFallbackBoost(boost));
        }
        if let Some(f) = self.timing_fallback.alternate.iter().find(|f| f.is_timing()) {
            return Err(ConfigError::InvalidFallbackFactor(f.to_string()));
        }

        for (name, floor) in [
            ("field_similarity", self.field_similarity.floor),
            ("track_volatility", self.track_volatility.floor),
        ] {
            if !(floor > 0.0 && floor <= 1.0) {
                return Err(ConfigError::InvalidCompressionFloor {
                    name: name.to_string(),
                    floor,
                });
            }
        }

        Ok(())
    }
}

/// Rule-based score and its breakdown for one entrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntrant {
    pub name: String,
    pub box_no: u8,
    pub factors: BTreeMap<Factor, f64>,
    /// Weights actually applied, after any timing redistribution
    pub weights: BTreeMap<Factor, f64>,
    /// Clamped multiplier values
    pub multipliers: BTreeMap<Multiplier, f64>,
    pub timing_fallback: bool,
    /// Weighted sum plus track offset, floored at 0
    pub additive_score: f64,
    pub rule_score: f64,
}

/// Scores for a whole race, in entrant order
#[derive(Debug, Clone)]
pub struct RaceScoring {
    pub category: DistanceCategory,
    pub entrants: Vec<ScoredEntrant>,
    pub factor_sets: Vec<FactorSet>,
    pub field_compression: f64,
    pub volatility_compression: f64,
}

impl RaceScoring {
    pub fn scores(&self) -> Vec<f64> {
        self.entrants.iter().map(|e| e.rule_score).collect()
    }
}

/// Pull every score toward the race mean by `factor`; 1.0 leaves scores untouched
pub fn compress_toward_mean(scores: &[f64], factor: f64) -> Vec<f64> {
    if scores.is_empty() || factor >= 1.0 {
        return scores.to_vec();
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    scores.iter().map(|s| mean + factor * (s - mean)).collect()
}

/// Compression factor from the field's coefficient of variation
pub fn field_similarity_factor(scores: &[f64], settings: &FieldSimilarity) -> f64 {
    if scores.len() < 2 || settings.cv_threshold <= 0.0 {
        return 1.0;
    }

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }

    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;

    if cv >= settings.cv_threshold {
        1.0
    } else {
        settings.floor + (1.0 - settings.floor) * (cv / settings.cv_threshold)
    }
}

pub fn volatility_factor(volatility: f64, settings: &TrackVolatility) -> f64 {
    1.0 - volatility.clamp(0.0, 1.0) * (1.0 - settings.floor)
}

/// Additive and multiplicative parts before race-level compression
struct Partial {
    weights: BTreeMap<Factor, f64>,
    multipliers: BTreeMap<Multiplier, f64>,
    additive: f64,
    combined: f64,
}

/// Combines factors, weights, multipliers and track adjustments into scores
pub struct ScoreAggregator<'a> {
    settings: &'a ScoringSettings,
    tracks: &'a TrackAdjustmentTable,
}

impl<'a> ScoreAggregator<'a> {
    pub fn new(settings: &'a ScoringSettings, tracks: &'a TrackAdjustmentTable) -> Self {
        Self { settings, tracks }
    }

    pub fn selector(&self) -> WeightProfileSelector<'a> {
        WeightProfileSelector::new(
            &self.settings.distance_bands,
            &self.settings.profiles,
            &self.settings.box_patterns,
        )
    }

    /// Weights applied to one entrant
    pub fn effective_weights(
        &self,
        selected: &SelectedProfile<'_>,
        timing_missing: bool,
    ) -> BTreeMap<Factor, f64> {
        let mut weights: BTreeMap<Factor, f64> = Factor::ALL
            .iter()
            .map(|f| (*f, selected.profile.weight(*f)))
            .collect();

        if timing_missing {
            for factor in Factor::TIMING {
                weights.insert(factor, 0.0);
            }
            let fallback = &self.settings.timing_fallback;
            for factor in &fallback.alternate {
                if let Some(w) = weights.get_mut(factor) {
                    *w *= fallback.boost;
                }
            }
        }

        weights
    }

    fn multipliers(
        &self,
        entrant: &EntrantRecord,
        factors: &FactorSet,
        selected: &SelectedProfile<'_>,
        track: &str,
    ) -> BTreeMap<Multiplier, f64> {
        let profile = selected.profile;
        let box_no = entrant.box_no;

        let box_position =
            selected.box_multiplier(box_no) * self.tracks.box_adjustment(track, box_no).multiplier;

        let trainer = self.settings.trainers.multiplier(entrant);

        let experience = self
            .settings
            .factor_tables
            .experience
            .lookup(entrant.career_starts.map(f64::from));

        let has_both_times =
            entrant.valid_best_time().is_some() && entrant.valid_sectional_time().is_some();

        let speed_gap = factors.get(Factor::Speed) - factors.get(Factor::EarlySpeed);
        let closer = if has_both_times && speed_gap >= profile.closer.min_gap {
            profile.closer.multiplier
        } else {
            1.0
        };

        let pace_box = if entrant.valid_sectional_time().is_some()
            && factors.get(Factor::EarlySpeed) >= profile.pace_box.min_early_percentile
            && profile.pace_box.boxes.contains(&box_no)
        {
            profile.pace_box.multiplier
        } else {
            1.0
        };

        MULTIPLIER_ORDER
            .iter()
            .map(|&m| {
                let raw = match m {
                    Multiplier::BoxPosition => box_position,
                    Multiplier::TrainerTier => trainer,
                    Multiplier::Experience => experience,
                    Multiplier::Closer => closer,
                    Multiplier::PaceBox => pace_box,
                };
                (m, profile.range(m).clamp(raw))
            })
            .collect()
    }

    fn score_entrant(
        &self,
        entrant: &EntrantRecord,
        factors: &FactorSet,
        selected: &SelectedProfile<'_>,
        track: &str,
    ) -> Partial {
        let weights = self.effective_weights(selected, factors.timing_missing);

        let weighted: f64 = Factor::ALL
            .iter()
            .map(|f| weights.get(f).copied().unwrap_or(0.0) * factors.get(*f))
            .sum();
        let offset = self.tracks.box_adjustment(track, entrant.box_no).offset;
        let additive = (weighted + offset).max(0.0);

        let multipliers = self.multipliers(entrant, factors, selected, track);
        let combined = MULTIPLIER_ORDER
            .iter()
            .fold(additive, |acc, m| acc * multipliers.get(m).copied().unwrap_or(1.0));

        Partial {
            weights,
            multipliers,
            additive,
            combined,
        }
    }

    /// Score every entrant of a race, in entrant order
    pub fn score_race(&self, race: &RaceCard) -> RaceScoring {
        let track = self.tracks.get(&race.track);
        if track.is_none() {
            debug!(track = %race.track, "No track adjustments, using identity");
        }

        let selected = self
            .selector()
            .select(race.distance_m, track.and_then(|t| t.pattern));
        let factor_sets =
            FactorEngineering::create_race_factors(race, &self.settings.factor_tables);

        let partials: Vec<Partial> = race
            .entrants
            .iter()
            .zip(&factor_sets)
            .map(|(entrant, factors)| self.score_entrant(entrant, factors, &selected, &race.track))
            .collect();

        let combined: Vec<f64> = partials.iter().map(|p| p.combined).collect();
        let field_compression = field_similarity_factor(&combined, &self.settings.field_similarity);
        let after_field = compress_toward_mean(&combined, field_compression);

        let volatility_compression = volatility_factor(
            track.map(|t| t.volatility).unwrap_or(0.0),
            &self.settings.track_volatility,
        );
        let compressed = compress_toward_mean(&after_field, volatility_compression);

        let scale = self.settings.score_scale;
        let entrants = race
            .entrants
            .iter()
            .zip(&factor_sets)
            .zip(partials)
            .zip(compressed)
            .map(|(((entrant, factors), partial), score)| ScoredEntrant {
                name: entrant.name.clone(),
                box_no: entrant.box_no,
                factors: factors.values().clone(),
                weights: partial.weights,
                multipliers: partial.multipliers,
                timing_fallback: factors.timing_missing,
                additive_score: partial.additive,
                rule_score: (score * scale).max(0.0),
            })
            .collect();

        debug!(
            track = %race.track,
            race = race.race_number,
            category = %selected.category,
            field_compression,
            volatility_compression,
            "Scored race"
        );

        RaceScoring {
            category: selected.category,
            entrants,
            factor_sets,
            field_compression,
            volatility_compression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::track::{BoxAdjustment, TrackAdjustment};

    fn dog(name: &str, box_no: u8, best: f64, sectional: f64, starts: u32, wins: u32) -> EntrantRecord {
        let mut e = EntrantRecord::new(name, box_no);
        e.best_time = Some(best);
        e.sectional_time = Some(sectional);
        e.career_starts = Some(starts);
        e.career_wins = wins;
        e.career_places = wins;
        e.recent_margins = vec![1.0, 2.0];
        e.days_since_last_race = Some(7);
        e
    }

    fn sample_race() -> RaceCard {
        RaceCard::new("Test Park", 1, 515)
            .with_entrant(dog("Alpha", 1, 29.50, 5.10, 40, 12))
            .with_entrant(dog("Bravo", 4, 29.90, 5.30, 25, 5))
            .with_entrant(dog("Charlie", 8, 30.30, 5.45, 12, 1))
    }

    #[test]
    fn test_scores_are_non_negative_and_ordered() {
        let settings = ScoringSettings::default();
        let tracks = TrackAdjustmentTable::new();
        let scoring = ScoreAggregator::new(&settings, &tracks).score_race(&sample_race());

        let scores = scoring.scores();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|&s| s >= 0.0 && s.is_finite()));
        assert!(scores[0] > scores[1]);
        assert!(scores[1] > scores[2]);
        assert_eq!(scoring.category, DistanceCategory::Long);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let settings = ScoringSettings::default();
        let tracks = TrackAdjustmentTable::default();
        let aggregator = ScoreAggregator::new(&settings, &tracks);
        let race = sample_race();
        assert_eq!(
            aggregator.score_race(&race).scores(),
            aggregator.score_race(&race).scores()
        );
    }

    #[test]
    fn test_timing_fallback_redistributes_weight() {
        let settings = ScoringSettings::default();
        let tracks = TrackAdjustmentTable::new();
        let aggregator = ScoreAggregator::new(&settings, &tracks);
        let selected = aggregator.selector().select(515, None);

        let normal = aggregator.effective_weights(&selected, false);
        let fallback = aggregator.effective_weights(&selected, true);

        assert_eq!(fallback[&Factor::Speed], 0.0);
        assert_eq!(fallback[&Factor::EarlySpeed], 0.0);
        assert!((fallback[&Factor::WinRate] - normal[&Factor::WinRate] * 1.3).abs() < 1e-12);
        assert!((fallback[&Factor::BoxDraw] - normal[&Factor::BoxDraw] * 1.3).abs() < 1e-12);
        assert_eq!(fallback[&Factor::Form], normal[&Factor::Form]);
    }

    #[test]
    fn test_untimed_entrant_still_scored() {
        let settings = ScoringSettings::default();
        let tracks = TrackAdjustmentTable::new();
        let mut race = sample_race();
        let mut untimed = EntrantRecord::new("Mystery", 6);
        untimed.career_starts = Some(30);
        untimed.career_wins = 9;
        race.entrants.push(untimed);

        let scoring = ScoreAggregator::new(&settings, &tracks).score_race(&race);
        let mystery = &scoring.entrants[3];
        assert!(mystery.timing_fallback);
        assert!(mystery.rule_score > 0.0);
        assert_eq!(mystery.weights[&Factor::Speed], 0.0);
    }

    #[test]
    fn test_multipliers_clamped_into_range() {
        let settings = ScoringSettings::default();
        let mut tracks = TrackAdjustmentTable::new();
        tracks.insert(
            "Test Park",
            TrackAdjustment::default().with_box(1, BoxAdjustment::new(0.0, 3.0)),
        );
        let scoring = ScoreAggregator::new(&settings, &tracks).score_race(&sample_race());
        let box_position = scoring.entrants[0].multipliers[&Multiplier::BoxPosition];
        assert!((box_position - 1.15).abs() < 1e-12);

        for entrant in &scoring.entrants {
            assert_eq!(entrant.multipliers.len(), MULTIPLIER_ORDER.len());
        }
    }

    #[test]
    fn test_additive_base_floored_at_zero() {
        let settings = ScoringSettings::default();
        let mut tracks = TrackAdjustmentTable::new();
        tracks.insert(
            "Test Park",
            TrackAdjustment::default().with_box(8, BoxAdjustment::new(-5.0, 1.0)),
        );
        let scoring = ScoreAggregator::new(&settings, &tracks).score_race(&sample_race());
        assert_eq!(scoring.entrants[2].additive_score, 0.0);
        assert!(scoring.entrants[2].rule_score >= 0.0);
    }

    #[test]
    fn test_compression_preserves_order() {
        let scores = vec![0.9, 0.6, 0.3];
        let compressed = compress_toward_mean(&scores, 0.7);
        assert!(compressed[0] > compressed[1] && compressed[1] > compressed[2]);
        assert!(compressed[0] - compressed[2] < scores[0] - scores[2]);
        let mean_before: f64 = scores.iter().sum::<f64>() / 3.0;
        let mean_after: f64 = compressed.iter().sum::<f64>() / 3.0;
        assert!((mean_before - mean_after).abs() < 1e-12);
    }

    #[test]
    fn test_compression_identity_at_one() {
        let scores = vec![0.42, 0.41, 0.40];
        assert_eq!(compress_toward_mean(&scores, 1.0), scores);
    }

    #[test]
    fn test_field_similarity_factor() {
        let settings = FieldSimilarity::default();
        assert_eq!(field_similarity_factor(&[0.9, 0.5, 0.2], &settings), 1.0);
        assert!((field_similarity_factor(&[0.5, 0.5, 0.5], &settings) - 0.6).abs() < 1e-12);

        let near = field_similarity_factor(&[0.50, 0.51, 0.49], &settings);
        assert!(near > 0.6 && near < 1.0);

        assert_eq!(field_similarity_factor(&[0.5], &settings), 1.0);
        assert_eq!(field_similarity_factor(&[0.0, 0.0], &settings), 1.0);
    }

    #[test]
    fn test_volatility_factor() {
        let settings = TrackVolatility::default();
        assert_eq!(volatility_factor(0.0, &settings), 1.0);
        assert!((volatility_factor(1.0, &settings) - 0.7).abs() < 1e-12);
        assert!((volatility_factor(0.5, &settings) - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_volatile_track_narrows_spread() {
        let settings = ScoringSettings::default();
        let calm = TrackAdjustmentTable::new();
        let mut wild = TrackAdjustmentTable::new();
        wild.insert("Test Park", TrackAdjustment::default().with_volatility(1.0));

        let race = sample_race();
        let calm_scores = ScoreAggregator::new(&settings, &calm).score_race(&race).scores();
        let wild_scores = ScoreAggregator::new(&settings, &wild).score_race(&race).scores();

        assert!(wild_scores[0] - wild_scores[2] < calm_scores[0] - calm_scores[2]);
        assert!(wild_scores[0] > wild_scores[1]);
    }

    #[test]
    fn test_validate_defaults() {
        assert!(ScoringSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_boost_out_of_range() {
        let mut settings = ScoringSettings::default();
        settings.timing_fallback.boost = 2.0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidFallbackBoost(_))
        ));
    }

    #[test]
    fn test_validate_rejects_timing_alternate() {
        let mut settings = ScoringSettings::default();
        settings.timing_fallback.alternate.push(Factor::Speed);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsorted_bucket_table() {
        let mut settings = ScoringSettings::default();
        settings.factor_tables.days_since_last_race.buckets.swap(0, 2);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidBucketTable { .. })
        ));

        let mut settings = ScoringSettings::default();
        settings.trainers.strike_rate.buckets.reverse();
        assert!(settings.validate().is_err());
    }
}
