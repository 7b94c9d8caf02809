//! Confidence Tier Classifier
//!
//! Ranks a scored race, then walks the tier rules strictest first and
//! assigns the first one the race satisfies.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::core::aggregator::RaceScoring;
use crate::error::ConfigError;
use crate::models::RaceCard;

/// Confidence tiers, ordered loosest to strictest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    NoBet,
    Tier3,
    Tier2,
    Tier1,
    Lock,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::NoBet => "NO_BET",
            Tier::Tier3 => "TIER3",
            Tier::Tier2 => "TIER2",
            Tier::Tier1 => "TIER1",
            Tier::Lock => "LOCK",
        }
    }

    pub fn is_bet(&self) -> bool {
        *self != Tier::NoBet
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Thresholds a race must meet for one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub tier: Tier,
    pub min_top_score: f64,
    pub min_margin_percent: f64,
    pub min_margin_absolute: f64,
    /// Boxes the top pick must start from; `None` allows any box
    #[serde(default)]
    pub boxes: Option<BTreeSet<u8>>,
    #[serde(default)]
    pub min_career_starts: Option<u32>,
}

impl TierRule {
    pub fn new(tier: Tier, min_top_score: f64, min_margin_percent: f64, min_margin_absolute: f64) -> Self {
        Self {
            tier,
            min_top_score,
            min_margin_percent,
            min_margin_absolute,
            boxes: None,
            min_career_starts: None,
        }
    }

    pub fn with_boxes(mut self, boxes: impl IntoIterator<Item = u8>) -> Self {
        self.boxes = Some(boxes.into_iter().collect());
        self
    }

    pub fn with_min_career_starts(mut self, starts: u32) -> Self {
        self.min_career_starts = Some(starts);
        self
    }

    /// Every race satisfying `self` also satisfies `looser`
    pub fn implies(&self, looser: &TierRule) -> bool {
        let boxes_ok = match (&self.boxes, &looser.boxes) {
            (_, None) => true,
            (Some(mine), Some(theirs)) => mine.is_subset(theirs),
            (None, Some(_)) => false,
        };
        let starts_ok = match (self.min_career_starts, looser.min_career_starts) {
            (_, None) => true,
            (Some(mine), Some(theirs)) => mine >= theirs,
            (None, Some(_)) => false,
        };

        self.min_top_score >= looser.min_top_score
            && self.min_margin_percent >= looser.min_margin_percent
            && self.min_margin_absolute >= looser.min_margin_absolute
            && boxes_ok
            && starts_ok
    }

    pub fn matches(&self, snapshot: &RaceSnapshot) -> bool {
        let (Some(margin_percent), Some(margin_absolute)) =
            (snapshot.margin_percent, snapshot.margin_absolute)
        else {
            return false;
        };

        if snapshot.top_score < self.min_top_score
            || margin_percent < self.min_margin_percent
            || margin_absolute < self.min_margin_absolute
        {
            return false;
        }

        if let Some(boxes) = &self.boxes {
            if !boxes.contains(&snapshot.top_box) {
                return false;
            }
        }

        match self.min_career_starts {
            Some(min) => snapshot.top_career_starts.is_some_and(|s| s >= min),
            None => true,
        }
    }
}

/// Tier rules plus the settings that frame them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    /// Strictest first
    pub rules: Vec<TierRule>,
    /// Tier for races with a single entrant
    pub degenerate_race_tier: Tier,
    /// Points behind the top score within which an entrant gets a place call
    pub place_window: f64,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            rules: vec![
                TierRule::new(Tier::Lock, 50.0, 15.0, 7.0)
                    .with_boxes([1, 8])
                    .with_min_career_starts(30),
                TierRule::new(Tier::Tier1, 45.0, 12.0, 5.0).with_min_career_starts(10),
                TierRule::new(Tier::Tier2, 40.0, 8.0, 3.0),
                TierRule::new(Tier::Tier3, 35.0, 5.0, 2.0),
            ],
            degenerate_race_tier: Tier::NoBet,
            place_window: 3.0,
        }
    }
}

impl TierSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.rules {
            if !rule.tier.is_bet() {
                return Err(ConfigError::NoBetRule(rule.tier));
            }
        }

        for pair in self.rules.windows(2) {
            let (stricter, looser) = (&pair[0], &pair[1]);
            if stricter.tier <= looser.tier {
                return Err(ConfigError::UnorderedTierRules {
                    previous: stricter.tier,
                    next: looser.tier,
                });
            }
            if !stricter.implies(looser) {
                return Err(ConfigError::TierRuleNotImplied {
                    stricter: stricter.tier,
                    looser: looser.tier,
                });
            }
        }

        Ok(())
    }
}

/// One entrant in ranked order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntrant {
    /// Position in the race's entrant list
    pub index: usize,
    pub name: String,
    pub box_no: u8,
    pub rule_score: f64,
    pub career_starts: Option<u32>,
    pub mean_recent_margin: Option<f64>,
    pub place_rate: f64,
}

/// Order entrants by score, breaking ties deterministically
///
/// Tie-breakers, in order: better recent form (lower mean margin), higher
/// place rate, more career starts, lower box number.
pub fn rank_entrants(race: &RaceCard, scoring: &RaceScoring, form_window: usize) -> Vec<RankedEntrant> {
    let mut ranked: Vec<RankedEntrant> = race
        .entrants
        .iter()
        .zip(&scoring.entrants)
        .enumerate()
        .map(|(index, (entrant, scored))| RankedEntrant {
            index,
            name: entrant.name.clone(),
            box_no: entrant.box_no,
            rule_score: scored.rule_score,
            career_starts: entrant.career_starts,
            mean_recent_margin: entrant.mean_recent_margin(form_window),
            place_rate: entrant.place_rate(),
        })
        .collect();

    ranked.sort_by(compare_ranked);
    ranked
}

fn compare_ranked(a: &RankedEntrant, b: &RankedEntrant) -> Ordering {
    b.rule_score
        .partial_cmp(&a.rule_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (a.mean_recent_margin, b.mean_recent_margin) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| {
            b.place_rate
                .partial_cmp(&a.place_rate)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| b.career_starts.cmp(&a.career_starts))
        .then_with(|| a.box_no.cmp(&b.box_no))
}

/// `(top - second) / top * 100`, 0 when the top score is not positive
pub fn margin_percent(top: f64, second: f64) -> f64 {
    if top <= 0.0 {
        return 0.0;
    }
    ((top - second) / top * 100.0).max(0.0)
}

/// What the tier rules look at
#[derive(Debug, Clone, PartialEq)]
pub struct RaceSnapshot {
    pub top_box: u8,
    pub top_score: f64,
    /// `None` fails any career-starts condition
    pub top_career_starts: Option<u32>,
    pub margin_percent: Option<f64>,
    pub margin_absolute: Option<f64>,
}

impl RaceSnapshot {
    pub fn from_ranked(ranked: &[RankedEntrant]) -> Option<Self> {
        let top = ranked.first()?;
        let second = ranked.get(1).map(|e| e.rule_score);

        Some(Self {
            top_box: top.box_no,
            top_score: top.rule_score,
            top_career_starts: top.career_starts,
            margin_percent: second.map(|s| margin_percent(top.rule_score, s)),
            margin_absolute: second.map(|s| (top.rule_score - s).max(0.0)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPick {
    pub name: String,
    pub box_no: u8,
    pub rule_score: f64,
}

/// Tier outcome for one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceClassification {
    pub tier: Tier,
    pub top: Option<TopPick>,
    pub second_score: Option<f64>,
    pub margin_percent: Option<f64>,
    pub margin_absolute: Option<f64>,
    /// Single-entrant race; margins are undefined
    pub degenerate: bool,
}

pub struct TierClassifier<'a> {
    settings: &'a TierSettings,
}

impl<'a> TierClassifier<'a> {
    pub fn new(settings: &'a TierSettings) -> Self {
        Self { settings }
    }

    pub fn classify(&self, ranked: &[RankedEntrant]) -> RaceClassification {
        let Some(snapshot) = RaceSnapshot::from_ranked(ranked) else {
            return RaceClassification {
                tier: Tier::NoBet,
                top: None,
                second_score: None,
                margin_percent: None,
                margin_absolute: None,
                degenerate: false,
            };
        };

        let top = ranked.first().map(|e| TopPick {
            name: e.name.clone(),
            box_no: e.box_no,
            rule_score: e.rule_score,
        });
        let degenerate = ranked.len() == 1;

        let tier = if degenerate {
            self.settings.degenerate_race_tier
        } else {
            self.settings
                .rules
                .iter()
                .find(|rule| rule.matches(&snapshot))
                .map(|rule| rule.tier)
                .unwrap_or(Tier::NoBet)
        };

        RaceClassification {
            tier,
            top,
            second_score: ranked.get(1).map(|e| e.rule_score),
            margin_percent: snapshot.margin_percent,
            margin_absolute: snapshot.margin_absolute,
            degenerate,
        }
    }
}

/// Suggested bet for one entrant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BetCall {
    Win,
    Place,
    Pass,
}

impl fmt::Display for BetCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BetCall::Win => "WIN",
            BetCall::Place => "PLACE",
            BetCall::Pass => "PASS",
        };
        f.write_str(s)
    }
}

/// Bet call per ranked entrant: WIN for the top pick of a tiered race,
/// PLACE for anyone within `place_window` points of the top score
pub fn assign_bet_calls(ranked: &[RankedEntrant], tier: Tier, place_window: f64) -> Vec<BetCall> {
    let Some(top) = ranked.first() else {
        return Vec::new();
    };

    ranked
        .iter()
        .enumerate()
        .map(|(i, entrant)| {
            if i == 0 && tier.is_bet() {
                BetCall::Win
            } else if i > 0 && top.rule_score - entrant.rule_score <= place_window {
                BetCall::Place
            } else {
                BetCall::Pass
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(entries: &[(u8, f64, u32)]) -> Vec<RankedEntrant> {
        entries
            .iter()
            .enumerate()
            .map(|(index, &(box_no, rule_score, career_starts))| RankedEntrant {
                index,
                name: format!("Dog {}", box_no),
                box_no,
                rule_score,
                career_starts: Some(career_starts),
                mean_recent_margin: None,
                place_rate: 0.0,
            })
            .collect()
    }

    #[test]
    fn test_margin_percent() {
        assert!((margin_percent(50.0, 40.0) - 20.0).abs() < 0.01);
        assert_eq!(margin_percent(0.0, 0.0), 0.0);
        assert_eq!(margin_percent(-1.0, -2.0), 0.0);
    }

    #[test]
    fn test_lock_race() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&ranked(&[(1, 58.0, 45), (3, 42.0, 20)]));
        assert_eq!(result.tier, Tier::Lock);
        assert!((result.margin_percent.unwrap() - 27.586).abs() < 0.01);
    }

    #[test]
    fn test_lock_needs_allowed_box() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&ranked(&[(4, 58.0, 45), (3, 42.0, 20)]));
        assert_eq!(result.tier, Tier::Tier1);
    }

    #[test]
    fn test_missing_career_starts_fails_experience_rule() {
        let settings = TierSettings::default();
        let mut entrants = ranked(&[(1, 58.0, 45), (3, 42.0, 20)]);
        entrants[0].career_starts = None;
        let result = TierClassifier::new(&settings).classify(&entrants);
        assert_eq!(result.tier, Tier::Tier2);
    }

    #[test]
    fn test_zero_starts_rule_still_needs_career_data() {
        let rule = TierRule::new(Tier::Tier3, 0.0, 0.0, 0.0).with_min_career_starts(0);
        let mut snapshot = RaceSnapshot {
            top_box: 2,
            top_score: 40.0,
            top_career_starts: Some(0),
            margin_percent: Some(10.0),
            margin_absolute: Some(4.0),
        };
        assert!(rule.matches(&snapshot));

        snapshot.top_career_starts = None;
        assert!(!rule.matches(&snapshot));
    }

    #[test]
    fn test_close_race_is_no_bet() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&ranked(&[(1, 46.0, 45), (2, 45.0, 45)]));
        assert_eq!(result.tier, Tier::NoBet);
    }

    #[test]
    fn test_low_score_is_no_bet() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&ranked(&[(1, 30.0, 45), (2, 10.0, 45)]));
        assert_eq!(result.tier, Tier::NoBet);
    }

    #[test]
    fn test_tier3_boundary_inclusive() {
        let settings = TierSettings::default();
        // margin 2.0 points, 5.0%
        let result = TierClassifier::new(&settings).classify(&ranked(&[(5, 40.0, 3), (2, 38.0, 3)]));
        assert_eq!(result.tier, Tier::Tier3);
    }

    #[test]
    fn test_single_entrant_is_degenerate() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&ranked(&[(1, 80.0, 60)]));
        assert!(result.degenerate);
        assert_eq!(result.tier, Tier::NoBet);
        assert!(result.margin_percent.is_none());
        assert!(result.margin_absolute.is_none());
    }

    #[test]
    fn test_empty_ranking_is_no_bet() {
        let settings = TierSettings::default();
        let result = TierClassifier::new(&settings).classify(&[]);
        assert_eq!(result.tier, Tier::NoBet);
        assert!(result.top.is_none());
    }

    #[test]
    fn test_default_rules_validate() {
        assert!(TierSettings::default().validate().is_ok());
    }

    #[test]
    fn test_unordered_rules_rejected() {
        let mut settings = TierSettings::default();
        settings.rules.swap(0, 1);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::UnorderedTierRules { .. })
        ));
    }

    #[test]
    fn test_non_implied_rule_rejected() {
        let mut settings = TierSettings::default();
        // TIER1 loosened below TIER2's margin requirement
        settings.rules[1].min_margin_percent = 6.0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::TierRuleNotImplied {
                stricter: Tier::Tier1,
                looser: Tier::Tier2
            })
        ));
    }

    #[test]
    fn test_no_bet_rule_rejected() {
        let mut settings = TierSettings::default();
        settings.rules.push(TierRule::new(Tier::NoBet, 0.0, 0.0, 0.0));
        assert!(matches!(settings.validate(), Err(ConfigError::NoBetRule(_))));
    }

    #[test]
    fn test_implies() {
        let lock = TierRule::new(Tier::Lock, 50.0, 15.0, 7.0).with_boxes([1, 8]);
        let any_box = TierRule::new(Tier::Tier1, 45.0, 12.0, 5.0);
        let inside = TierRule::new(Tier::Tier1, 45.0, 12.0, 5.0).with_boxes([1]);
        assert!(lock.implies(&any_box));
        assert!(!lock.implies(&inside));
        assert!(!any_box.implies(&lock));
    }

    #[test]
    fn test_tie_breakers() {
        let mut entries = ranked(&[(5, 50.0, 10), (3, 50.0, 10), (2, 50.0, 20), (7, 50.0, 10)]);
        entries[0].mean_recent_margin = Some(1.0);
        entries[1].mean_recent_margin = Some(1.0);
        entries[1].place_rate = 0.5;
        entries[3].mean_recent_margin = Some(0.5);
        entries.sort_by(compare_ranked);

        let order: Vec<u8> = entries.iter().map(|e| e.box_no).collect();
        // form first, then place rate; no form sorts last
        assert_eq!(order, vec![7, 3, 5, 2]);
    }

    #[test]
    fn test_full_tie_resolves_to_lower_box() {
        let mut entries = ranked(&[(6, 44.0, 10), (2, 44.0, 10)]);
        entries.sort_by(compare_ranked);
        assert_eq!(entries[0].box_no, 2);
    }

    #[test]
    fn test_bet_calls() {
        let entries = ranked(&[(1, 50.0, 10), (2, 48.0, 10), (3, 40.0, 10)]);
        assert_eq!(
            assign_bet_calls(&entries, Tier::Tier2, 3.0),
            vec![BetCall::Win, BetCall::Place, BetCall::Pass]
        );
        assert_eq!(
            assign_bet_calls(&entries, Tier::NoBet, 3.0),
            vec![BetCall::Pass, BetCall::Place, BetCall::Pass]
        );
    }

    #[test]
    fn test_tier_serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&Tier::NoBet).unwrap(), "\"NO_BET\"");
        assert_eq!(serde_json::to_string(&Tier::Tier1).unwrap(), "\"TIER1\"");
        assert!(Tier::Lock > Tier::Tier1);
        assert!(Tier::Tier3 > Tier::NoBet);
    }
}
