//! Ensemble probability sources
//!
//! Every source answers one question: given a race and its factor values,
//! what is each entrant's win confidence on a 0-100 scale, in entrant order?
//! A source that cannot answer returns `None` and the blender works around it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::data::factors::{Factor, FactorSet};
use crate::error::EngineError;
use crate::models::{find_race, normalize_track, RaceCard, RaceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Usable at every track
    Global,
    /// Trained per track; only eligible where it has enough history
    TrackSpecific,
    /// Accounts for track conditions
    WeatherAugmented,
}

pub trait ProbabilitySource: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Vec<Capability>;

    fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Whether the source has anything to say about this track
    fn covers(&self, _track: &str) -> bool {
        self.has_capability(Capability::Global)
    }

    /// Win confidence per entrant (0-100), in entrant order
    fn predict_race(&self, race: &RaceCard, factors: &[FactorSet]) -> Option<Vec<f64>>;
}

/// Heuristic source used when no trained model is available
///
/// Each entrant is judged on its own record rather than as a share of the
/// field, so a dominant dog can reach a high confidence in any field size.
/// The box draw scales the record score by `1 - box_weight` at the weakest
/// draw up to 1.0 at the strongest.
pub struct HeuristicSource {
    name: String,
    box_advantage: [f64; 8],
    box_weight: f64,
}

impl HeuristicSource {
    pub fn new() -> Self {
        Self::named("heuristic")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            box_advantage: [0.18, 0.14, 0.12, 0.11, 0.10, 0.10, 0.11, 0.14],
            box_weight: 0.4,
        }
    }

    fn calculate_score(&self, factors: &FactorSet) -> f64 {
        let mut score = 0.0;
        score += factors.get(Factor::WinRate) * 0.35;
        score += factors.get(Factor::PlaceRate) * 0.25;
        score += factors.get(Factor::Speed) * 0.25;
        score += factors.get(Factor::Form) * 0.15;
        score.max(0.01)
    }

    fn box_advantage(&self, box_no: u8) -> f64 {
        usize::from(box_no)
            .checked_sub(1)
            .and_then(|i| self.box_advantage.get(i))
            .copied()
            .unwrap_or(0.10)
    }
}

impl Default for HeuristicSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbabilitySource for HeuristicSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Global]
    }

    fn predict_race(&self, race: &RaceCard, factors: &[FactorSet]) -> Option<Vec<f64>> {
        if factors.is_empty() || factors.len() != race.entrants.len() {
            return None;
        }

        let best_advantage = self.box_advantage.iter().cloned().fold(0.0, f64::max);

        let probs = factors
            .iter()
            .map(|f| {
                let relative = if best_advantage > 0.0 {
                    self.box_advantage(f.box_no) / best_advantage
                } else {
                    1.0
                };
                let box_factor = 1.0 - self.box_weight + self.box_weight * relative.min(1.0);
                (self.calculate_score(f) * box_factor * 100.0).clamp(0.0, 100.0)
            })
            .collect();

        Some(probs)
    }
}

/// One externally produced win probability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRow {
    pub track: String,
    pub race_number: u32,
    /// Meeting date; undated rows apply to any meeting
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub box_no: u8,
    /// Win probability, 0-100
    pub probability: f64,
}

/// Precomputed predictions from an external model, looked up per race
pub struct TableSource {
    name: String,
    capability: Capability,
    predictions: HashMap<RaceKey, BTreeMap<u8, f64>>,
    tracks: HashSet<String>,
}

impl TableSource {
    pub fn from_rows(name: impl Into<String>, capability: Capability, rows: Vec<PredictionRow>) -> Self {
        let mut predictions: HashMap<RaceKey, BTreeMap<u8, f64>> = HashMap::new();
        let mut tracks = HashSet::new();

        for row in rows {
            let key = RaceKey::new(&row.track, row.race_number).on(row.date);
            tracks.insert(key.track.clone());
            predictions
                .entry(key)
                .or_default()
                .insert(row.box_no, row.probability.clamp(0.0, 100.0));
        }

        Self {
            name: name.into(),
            capability,
            predictions,
            tracks,
        }
    }

    /// Load a JSON array of prediction rows
    pub fn from_json_file<P: AsRef<Path>>(
        name: impl Into<String>,
        capability: Capability,
        path: P,
    ) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let rows: Vec<PredictionRow> = crate::data::race_loader::read_json(path)?;
        let source = Self::from_rows(name, capability, rows);
        info!(
            source = %source.name,
            races = source.predictions.len(),
            "Loaded predictions from {:?}",
            path
        );
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

impl ProbabilitySource for TableSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![self.capability]
    }

    fn covers(&self, track: &str) -> bool {
        match self.capability {
            Capability::TrackSpecific => self.tracks.contains(&normalize_track(track)),
            _ => true,
        }
    }

    fn predict_race(&self, race: &RaceCard, _factors: &[FactorSet]) -> Option<Vec<f64>> {
        let by_box = find_race(&self.predictions, &race.key())?;
        race.entrants
            .iter()
            .map(|e| by_box.get(&e.box_no).copied())
            .collect()
    }
}

/// Surface condition of a track on race day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackCondition {
    Fast,
    Good,
    Slow,
    Heavy,
}

impl TrackCondition {
    /// Higher ratings mean a less predictable surface
    pub fn rating(&self) -> f64 {
        match self {
            TrackCondition::Fast => 1.00,
            TrackCondition::Good => 1.05,
            TrackCondition::Slow => 1.10,
            TrackCondition::Heavy => 1.15,
        }
    }
}

/// Wraps a source and flattens its predictions on poor surfaces
pub struct ConditionAdjusted<S> {
    inner: S,
    name: String,
    conditions: HashMap<String, TrackCondition>,
}

impl<S: ProbabilitySource> ConditionAdjusted<S> {
    pub fn new(inner: S, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            conditions: HashMap::new(),
        }
    }

    pub fn with_condition(mut self, track: &str, condition: TrackCondition) -> Self {
        self.conditions.insert(normalize_track(track), condition);
        self
    }

    pub fn condition(&self, track: &str) -> Option<TrackCondition> {
        self.conditions.get(&normalize_track(track)).copied()
    }
}

impl<S: ProbabilitySource> ProbabilitySource for ConditionAdjusted<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut caps = self.inner.capabilities();
        if !caps.contains(&Capability::WeatherAugmented) {
            caps.push(Capability::WeatherAugmented);
        }
        caps
    }

    fn covers(&self, track: &str) -> bool {
        self.inner.covers(track)
    }

    fn predict_race(&self, race: &RaceCard, factors: &[FactorSet]) -> Option<Vec<f64>> {
        let probs = self.inner.predict_race(race, factors)?;
        let rating = match self.condition(&race.track) {
            Some(condition) => condition.rating(),
            None => return Some(probs),
        };
        if probs.is_empty() {
            return Some(probs);
        }

        let mean = probs.iter().sum::<f64>() / probs.len() as f64;
        Some(
            probs
                .iter()
                .map(|p| (mean + (p - mean) / rating).clamp(0.0, 100.0))
                .collect(),
        )
    }
}
