//! Evaluator
//!
//! Checks assessed races against actual results and reports how often the
//! top pick won at each confidence tier and for hybrid bets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use super::metrics::{analyze_by_category, analyze_by_track, calculate_metrics, DimensionAnalysis, HitMetrics};
use crate::core::tiers::Tier;
use crate::core::weights::DistanceCategory;
use crate::engine::RaceAssessment;
use crate::models::{find_race, RaceKey, RaceResult};

/// Outcome of one race's top pick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickRecord {
    pub track: String,
    pub race_number: u32,
    pub category: DistanceCategory,
    pub tier: Tier,
    #[serde(default)]
    pub hybrid_tier: Option<String>,
    pub top_box: u8,
    pub winning_box: u8,
    pub rule_score: f64,
    #[serde(default)]
    pub margin_percent: Option<f64>,
    pub hit: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub picks: Vec<PickRecord>,
    pub total_races: usize,
    /// Assessed races with no matching result
    pub unmatched: usize,
    pub overall: HitMetrics,
    pub by_tier: BTreeMap<Tier, HitMetrics>,
    pub hybrid: HitMetrics,
    pub by_track: Vec<DimensionAnalysis>,
    pub by_category: Vec<DimensionAnalysis>,
}

impl EvaluationResult {
    pub fn tier_metrics(&self, tier: Tier) -> HitMetrics {
        self.by_tier.get(&tier).cloned().unwrap_or_default()
    }
}

/// Match assessments to results and compute hit rates
pub fn evaluate(assessments: &[RaceAssessment], results: &[RaceResult]) -> EvaluationResult {
    let winners: HashMap<RaceKey, u8> = results.iter().map(|r| (r.key(), r.winning_box)).collect();

    let mut unmatched = 0;
    let mut picks = Vec::new();

    for assessment in assessments {
        let key = assessment.key();
        let (Some(&winning_box), Some(top)) = (find_race(&winners, &key), assessment.top_pick()) else {
            unmatched += 1;
            continue;
        };

        picks.push(PickRecord {
            track: key.track,
            race_number: assessment.race_number,
            category: assessment.category,
            tier: assessment.tier(),
            hybrid_tier: assessment.trigger_tier().map(str::to_string),
            top_box: top.box_no,
            winning_box,
            rule_score: top.rule_score,
            margin_percent: assessment.classification.margin_percent,
            hit: top.box_no == winning_box,
        });
    }

    if unmatched > 0 {
        warn!(unmatched, "Assessed races without a result were skipped");
    }

    let mut by_tier = BTreeMap::new();
    for tier in [Tier::Lock, Tier::Tier1, Tier::Tier2, Tier::Tier3, Tier::NoBet] {
        let metrics = calculate_metrics(picks.iter().filter(|p| p.tier == tier));
        if metrics.races > 0 {
            by_tier.insert(tier, metrics);
        }
    }
    let hybrid = calculate_metrics(picks.iter().filter(|p| p.hybrid_tier.is_some()));

    let result = EvaluationResult {
        total_races: assessments.len(),
        unmatched,
        overall: calculate_metrics(&picks),
        by_tier,
        hybrid,
        by_track: analyze_by_track(&picks),
        by_category: analyze_by_category(&picks),
        picks,
    };

    info!(
        races = result.total_races,
        hit_rate = result.overall.hit_rate,
        "Evaluation complete"
    );
    result
}
