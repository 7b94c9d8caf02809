//! Evaluation Metrics
//!
//! Hit rates of top picks, overall and grouped by tier, track and distance category.

use super::evaluator::PickRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HitMetrics {
    pub races: usize,
    pub hits: usize,
    pub hit_rate: f64,
    /// Mean rule score of the picks
    pub avg_score: f64,
    /// Mean margin percent over the second pick, where defined
    pub avg_margin_percent: f64,
}

/// Calculate metrics from pick records
pub fn calculate_metrics<'a, I>(picks: I) -> HitMetrics
where
    I: IntoIterator<Item = &'a PickRecord>,
{
    let picks: Vec<&PickRecord> = picks.into_iter().collect();
    if picks.is_empty() {
        return HitMetrics::default();
    }

    let races = picks.len();
    let hits = picks.iter().filter(|p| p.hit).count();
    let avg_score = picks.iter().map(|p| p.rule_score).sum::<f64>() / races as f64;

    let margins: Vec<f64> = picks.iter().filter_map(|p| p.margin_percent).collect();
    let avg_margin_percent = if margins.is_empty() {
        0.0
    } else {
        margins.iter().sum::<f64>() / margins.len() as f64
    };

    HitMetrics {
        races,
        hits,
        hit_rate: hits as f64 / races as f64,
        avg_score,
        avg_margin_percent,
    }
}

/// Analysis results by dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAnalysis {
    pub key: String,
    pub metrics: HitMetrics,
}

fn analyze_by<F>(picks: &[PickRecord], key: F) -> Vec<DimensionAnalysis>
where
    F: Fn(&PickRecord) -> String,
{
    let mut grouped: HashMap<String, Vec<&PickRecord>> = HashMap::new();
    for pick in picks {
        grouped.entry(key(pick)).or_default().push(pick);
    }

    let mut results: Vec<DimensionAnalysis> = grouped
        .into_iter()
        .map(|(key, group)| DimensionAnalysis {
            key,
            metrics: calculate_metrics(group),
        })
        .collect();

    results.sort_by(|a, b| a.key.cmp(&b.key));
    results
}

/// Analyze picks by track
pub fn analyze_by_track(picks: &[PickRecord]) -> Vec<DimensionAnalysis> {
    analyze_by(picks, |p| p.track.clone())
}

/// Analyze picks by distance category
pub fn analyze_by_category(picks: &[PickRecord]) -> Vec<DimensionAnalysis> {
    analyze_by(picks, |p| p.category.to_string())
}
