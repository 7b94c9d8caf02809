//! Race assessment pipeline
//!
//! Validate, score, rank, tier, blend, decide. Races are independent, so a
//! batch is assessed in parallel and returned in input order.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::aggregator::ScoreAggregator;
use crate::core::blend::{AbsentReason, Contribution, EnsembleBlender, EnsembleStatus};
use crate::core::hybrid::{HybridDecision, HybridDecisionMaker};
use crate::core::tiers::{
    assign_bet_calls, rank_entrants, BetCall, RaceClassification, Tier, TierClassifier,
};
use crate::core::weights::{DistanceCategory, Multiplier};
use crate::data::factors::Factor;
use crate::error::{validate_race, EngineError};
use crate::models::{RaceCard, RaceKey};
use crate::predictor::ProbabilitySource;

/// One entrant's outcome, listed in rank order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantAssessment {
    /// 1-based rank
    pub rank: usize,
    pub name: String,
    pub box_no: u8,
    pub rule_score: f64,
    #[serde(default)]
    pub ensemble_confidence: Option<f64>,
    pub bet_call: BetCall,
    pub timing_fallback: bool,
    pub factors: BTreeMap<Factor, f64>,
    pub multipliers: BTreeMap<Multiplier, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceAssessment {
    pub track: String,
    pub race_number: u32,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub distance_m: u32,
    pub category: DistanceCategory,
    pub entrants: Vec<EntrantAssessment>,
    pub classification: RaceClassification,
    pub hybrid: HybridDecision,
    pub ensemble_present: bool,
    #[serde(default)]
    pub ensemble_contributions: Vec<Contribution>,
}

impl RaceAssessment {
    pub fn key(&self) -> RaceKey {
        RaceKey::new(&self.track, self.race_number).on(self.date)
    }

    pub fn tier(&self) -> Tier {
        self.classification.tier
    }

    pub fn top_pick(&self) -> Option<&EntrantAssessment> {
        self.entrants.first()
    }

    pub fn recommended_box(&self) -> Option<u8> {
        self.hybrid.recommended_box()
    }

    pub fn trigger_tier(&self) -> Option<&str> {
        self.hybrid.trigger_tier()
    }

    pub fn entrant_by_box(&self, box_no: u8) -> Option<&EntrantAssessment> {
        self.entrants.iter().find(|e| e.box_no == box_no)
    }
}

/// Scores and tiers races against a fixed configuration
pub struct TieringEngine {
    config: Arc<EngineConfig>,
    blender: Option<EnsembleBlender>,
}

impl TieringEngine {
    /// Rule-based only; every race reports the ensemble as absent
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            blender: None,
        }
    }

    /// With the ensemble members the config names, drawn from `sources`
    pub fn with_sources(config: Arc<EngineConfig>, sources: &[Arc<dyn ProbabilitySource>]) -> Self {
        let blender = EnsembleBlender::new(&config.ensemble, sources);
        Self {
            config,
            blender: Some(blender),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn assess(&self, race: &RaceCard) -> Result<RaceAssessment, EngineError> {
        let config = &*self.config;
        validate_race(race, config.scoring.max_box)?;

        let scoring = ScoreAggregator::new(&config.scoring, &config.tracks).score_race(race);
        let ranked = rank_entrants(race, &scoring, config.scoring.factor_tables.form_window);
        let classification = TierClassifier::new(&config.tiers).classify(&ranked);
        let calls = assign_bet_calls(&ranked, classification.tier, config.tiers.place_window);

        let ensemble = match &self.blender {
            Some(blender) => blender.blend(race, &scoring.factor_sets),
            None => EnsembleStatus::Absent(AbsentReason::NotConfigured),
        };
        let signal = ensemble.signal();

        let confidences: Option<Vec<(u8, f64)>> = signal.map(|s| {
            race.entrants
                .iter()
                .zip(&s.confidences)
                .map(|(e, c)| (e.box_no, *c))
                .collect()
        });
        let hybrid = HybridDecisionMaker::new(&config.hybrid)
            .decide(&classification, confidences.as_deref());

        let entrants = ranked
            .iter()
            .zip(calls)
            .enumerate()
            .map(|(i, (r, bet_call))| {
                let scored = &scoring.entrants[r.index];
                EntrantAssessment {
                    rank: i + 1,
                    name: r.name.clone(),
                    box_no: r.box_no,
                    rule_score: r.rule_score,
                    ensemble_confidence: signal.and_then(|s| s.confidences.get(r.index).copied()),
                    bet_call,
                    timing_fallback: scored.timing_fallback,
                    factors: scored.factors.clone(),
                    multipliers: scored.multipliers.clone(),
                }
            })
            .collect();

        debug!(
            track = %race.track,
            race = race.race_number,
            tier = %classification.tier,
            ensemble = ensemble.is_present(),
            "Assessed race"
        );

        Ok(RaceAssessment {
            track: race.track.clone(),
            race_number: race.race_number,
            date: race.date,
            distance_m: race.distance_m,
            category: scoring.category,
            entrants,
            classification,
            ensemble_present: hybrid.ensemble_present,
            hybrid,
            ensemble_contributions: signal.map(|s| s.contributions.clone()).unwrap_or_default(),
        })
    }

    /// Assess races in parallel; results line up with the input
    pub fn assess_all(&self, races: &[RaceCard]) -> Vec<Result<RaceAssessment, EngineError>> {
        let results: Vec<_> = races.par_iter().map(|race| self.assess(race)).collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(races = races.len(), failed, "Assessed race batch");
        results
    }
}
