//! Ensemble Blender
//!
//! Weighted average of the configured probability sources. A member that is
//! ineligible or returns nothing is replaced by the fallback source at the
//! same weight; without a fallback it is dropped and the remaining weights
//! renormalize.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::data::factors::FactorSet;
use crate::error::ConfigError;
use crate::models::{normalize_track, RaceCard};
use crate::predictor::{Capability, ProbabilitySource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendMember {
    pub source: String,
    pub weight: f64,
}

impl BlendMember {
    pub fn new(source: impl Into<String>, weight: f64) -> Self {
        Self {
            source: source.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleSettings {
    pub members: Vec<BlendMember>,
    /// Source substituted for an unavailable member
    pub fallback_source: Option<String>,
    /// Races a track needs before track-specific sources are trusted there
    pub min_track_races: u32,
    /// Historical race count per track
    pub track_race_counts: BTreeMap<String, u32>,
}

impl Default for EnsembleSettings {
    fn default() -> Self {
        Self {
            members: vec![
                BlendMember::new("random_forest", 0.4),
                BlendMember::new("gradient_boosting", 0.3),
                BlendMember::new("xgboost", 0.2),
                BlendMember::new("lightgbm", 0.1),
            ],
            fallback_source: Some("heuristic".to_string()),
            min_track_races: 30,
            track_race_counts: BTreeMap::new(),
        }
    }
}

impl EnsembleSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for member in &self.members {
            if !member.weight.is_finite() || member.weight < 0.0 {
                return Err(ConfigError::InvalidBlendWeight {
                    source_name: member.source.clone(),
                    weight: member.weight,
                });
            }
        }

        if !self.members.is_empty() {
            let sum: f64 = self.members.iter().map(|m| m.weight).sum();
            if (sum - 1.0).abs() > 1e-6 {
                return Err(ConfigError::BlendWeightsDoNotSumToOne(sum));
            }
        }

        Ok(())
    }

    fn race_count(&self, track: &str) -> u32 {
        let track = normalize_track(track);
        self.track_race_counts
            .iter()
            .find(|(name, _)| normalize_track(name) == track)
            .map(|(_, &count)| count)
            .unwrap_or(0)
    }
}

/// How one configured member contributed to a blend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub member: String,
    /// Weight after renormalization
    pub weight: f64,
    /// Fallback that answered in place of the member
    #[serde(default)]
    pub substituted_by: Option<String>,
}

/// Blended confidences, in entrant order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSignal {
    pub confidences: Vec<f64>,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentReason {
    NotConfigured,
    NoSourceAvailable,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnsembleStatus {
    Present(EnsembleSignal),
    Absent(AbsentReason),
}

impl EnsembleStatus {
    pub fn signal(&self) -> Option<&EnsembleSignal> {
        match self {
            EnsembleStatus::Present(signal) => Some(signal),
            EnsembleStatus::Absent(_) => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, EnsembleStatus::Present(_))
    }
}

struct ResolvedMember {
    name: String,
    weight: f64,
    source: Option<Arc<dyn ProbabilitySource>>,
}

pub struct EnsembleBlender {
    members: Vec<ResolvedMember>,
    fallback: Option<Arc<dyn ProbabilitySource>>,
    settings: EnsembleSettings,
}

impl EnsembleBlender {
    /// Bind configured member names to the sources supplied by the caller
    pub fn new(settings: &EnsembleSettings, sources: &[Arc<dyn ProbabilitySource>]) -> Self {
        let find = |name: &str| sources.iter().find(|s| s.name() == name).cloned();

        let members = settings
            .members
            .iter()
            .map(|member| {
                let source = find(&member.source);
                if source.is_none() {
                    warn!(source = %member.source, "Ensemble member has no registered source");
                }
                ResolvedMember {
                    name: member.source.clone(),
                    weight: member.weight,
                    source,
                }
            })
            .collect();

        let fallback = settings.fallback_source.as_deref().and_then(|name| {
            let source = find(name);
            if source.is_none() {
                warn!(source = %name, "Fallback source is not registered");
            }
            source
        });

        Self {
            members,
            fallback,
            settings: settings.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.members.is_empty()
    }

    /// Track-specific sources need coverage and enough history at the track
    fn eligible(&self, source: &dyn ProbabilitySource, track: &str) -> bool {
        if !source.covers(track) {
            return false;
        }
        if source.has_capability(Capability::TrackSpecific)
            && !source.has_capability(Capability::Global)
        {
            return self.settings.race_count(track) >= self.settings.min_track_races;
        }
        true
    }

    fn predict_with(
        &self,
        source: &dyn ProbabilitySource,
        race: &RaceCard,
        factors: &[FactorSet],
    ) -> Option<Vec<f64>> {
        if !self.eligible(source, &race.track) {
            return None;
        }
        source
            .predict_race(race, factors)
            .filter(|probs| probs.len() == race.entrants.len() && probs.iter().all(|p| p.is_finite()))
    }

    pub fn blend(&self, race: &RaceCard, factors: &[FactorSet]) -> EnsembleStatus {
        if !self.is_configured() {
            return EnsembleStatus::Absent(AbsentReason::NotConfigured);
        }

        let mut fallback_probs: Option<Option<Vec<f64>>> = None;
        let mut used: Vec<(String, f64, Option<String>, Vec<f64>)> = Vec::new();

        for member in &self.members {
            if member.weight <= 0.0 {
                continue;
            }

            let direct = member
                .source
                .as_deref()
                .and_then(|source| self.predict_with(source, race, factors));

            match direct {
                Some(probs) => used.push((member.name.clone(), member.weight, None, probs)),
                None => {
                    let Some(fallback) = self.fallback.as_deref() else {
                        debug!(member = %member.name, track = %race.track, "Member unavailable, dropped");
                        continue;
                    };
                    let probs = fallback_probs
                        .get_or_insert_with(|| self.predict_with(fallback, race, factors))
                        .clone();
                    match probs {
                        Some(probs) => {
                            debug!(
                                member = %member.name,
                                fallback = %fallback.name(),
                                "Member unavailable, substituting fallback"
                            );
                            used.push((
                                member.name.clone(),
                                member.weight,
                                Some(fallback.name().to_string()),
                                probs,
                            ));
                        }
                        None => {
                            debug!(member = %member.name, "Member and fallback unavailable, dropped");
                        }
                    }
                }
            }
        }

        let total_weight: f64 = used.iter().map(|(_, w, _, _)| w).sum();
        if used.is_empty() || total_weight <= 0.0 {
            return EnsembleStatus::Absent(AbsentReason::NoSourceAvailable);
        }

        let n = race.entrants.len();
        let mut confidences = vec![0.0; n];
        for (_, weight, _, probs) in &used {
            for (c, p) in confidences.iter_mut().zip(probs) {
                *c += weight / total_weight * p;
            }
        }
        for c in confidences.iter_mut() {
            *c = c.clamp(0.0, 100.0);
        }

        let contributions = used
            .into_iter()
            .map(|(member, weight, substituted_by, _)| Contribution {
                member,
                weight: weight / total_weight,
                substituted_by,
            })
            .collect();

        EnsembleStatus::Present(EnsembleSignal {
            confidences,
            contributions,
        })
    }
}
