//! Hybrid Decision Maker
//!
//! Recommends a bet only when the rule-based tier and the ensemble agree:
//! the rule tier clears its threshold, the ensemble is confident in the
//! rule's top pick, and the ensemble ranks that same entrant first.

use serde::{Deserialize, Serialize};

use crate::core::tiers::{RaceClassification, Tier};
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    /// Loosest rule tier that can trigger a hybrid bet
    pub min_rule_tier: Tier,
    /// Ensemble confidence (0-100) required for the rule's top pick
    pub min_ensemble_confidence: f64,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            min_rule_tier: Tier::Tier1,
            min_ensemble_confidence: 70.0,
        }
    }
}

impl HybridSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.min_ensemble_confidence) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.min_ensemble_confidence,
            ));
        }
        Ok(())
    }
}

/// Progress of one race through the decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HybridStage {
    NoSignal,
    RuleOnlyEvaluated,
    EnsembleEvaluated,
    AgreementChecked,
    Decided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoBetReason {
    NoEntrants,
    EnsembleAbsent,
    RuleTierTooLow,
    ConfidenceTooLow,
    PicksDisagree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HybridVerdict {
    HybridBet {
        recommended_box: u8,
        trigger_tier: String,
    },
    NoBet {
        reasons: Vec<NoBetReason>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridDecision {
    pub verdict: HybridVerdict,
    pub ensemble_present: bool,
    pub rule_top_box: Option<u8>,
    pub ensemble_top_box: Option<u8>,
    /// Ensemble confidence in the rule's top pick
    pub top_pick_confidence: Option<f64>,
    pub stages: Vec<HybridStage>,
}

impl HybridDecision {
    pub fn recommended_box(&self) -> Option<u8> {
        match &self.verdict {
            HybridVerdict::HybridBet { recommended_box, .. } => Some(*recommended_box),
            HybridVerdict::NoBet { .. } => None,
        }
    }

    pub fn trigger_tier(&self) -> Option<&str> {
        match &self.verdict {
            HybridVerdict::HybridBet { trigger_tier, .. } => Some(trigger_tier),
            HybridVerdict::NoBet { .. } => None,
        }
    }

    pub fn no_bet_reasons(&self) -> &[NoBetReason] {
        match &self.verdict {
            HybridVerdict::NoBet { reasons } => reasons,
            HybridVerdict::HybridBet { .. } => &[],
        }
    }
}

/// Name of the hybrid tier triggered by a rule tier
pub fn hybrid_tier_name(tier: Tier) -> String {
    format!("HYBRID_{}", tier)
}

/// Entrant with the highest confidence; ties go to the lower box
fn ensemble_top(confidences: &[(u8, f64)]) -> Option<(u8, f64)> {
    confidences.iter().copied().fold(None, |best, (box_no, c)| match best {
        Some((b, bc)) if bc > c || (bc == c && b < box_no) => Some((b, bc)),
        _ => Some((box_no, c)),
    })
}

pub struct HybridDecisionMaker<'a> {
    settings: &'a HybridSettings,
}

impl<'a> HybridDecisionMaker<'a> {
    pub fn new(settings: &'a HybridSettings) -> Self {
        Self { settings }
    }

    /// `confidences` pairs each entrant's box with its ensemble confidence;
    /// `None` when the ensemble is absent for this race
    pub fn decide(
        &self,
        classification: &RaceClassification,
        confidences: Option<&[(u8, f64)]>,
    ) -> HybridDecision {
        let mut stages = vec![HybridStage::NoSignal, HybridStage::RuleOnlyEvaluated];
        let rule_top_box = classification.top.as_ref().map(|t| t.box_no);

        let no_bet = |reasons: Vec<NoBetReason>, mut stages: Vec<HybridStage>, present: bool| {
            stages.push(HybridStage::Decided);
            HybridDecision {
                verdict: HybridVerdict::NoBet { reasons },
                ensemble_present: present,
                rule_top_box,
                ensemble_top_box: None,
                top_pick_confidence: None,
                stages,
            }
        };

        let Some(confidences) = confidences else {
            return no_bet(vec![NoBetReason::EnsembleAbsent], stages, false);
        };
        let Some(rule_box) = rule_top_box else {
            return no_bet(vec![NoBetReason::NoEntrants], stages, true);
        };

        stages.push(HybridStage::EnsembleEvaluated);
        let ensemble_top_box = ensemble_top(confidences).map(|(b, _)| b);
        let top_pick_confidence = confidences
            .iter()
            .find(|(b, _)| *b == rule_box)
            .map(|(_, c)| *c);

        stages.push(HybridStage::AgreementChecked);
        let mut reasons = Vec::new();
        if !classification.tier.is_bet() || classification.tier < self.settings.min_rule_tier {
            reasons.push(NoBetReason::RuleTierTooLow);
        }
        if top_pick_confidence.unwrap_or(0.0) < self.settings.min_ensemble_confidence {
            reasons.push(NoBetReason::ConfidenceTooLow);
        }
        if ensemble_top_box != Some(rule_box) {
            reasons.push(NoBetReason::PicksDisagree);
        }

        stages.push(HybridStage::Decided);
        let verdict = if reasons.is_empty() {
            HybridVerdict::HybridBet {
                recommended_box: rule_box,
                trigger_tier: hybrid_tier_name(classification.tier),
            }
        } else {
            HybridVerdict::NoBet { reasons }
        };

        HybridDecision {
            verdict,
            ensemble_present: true,
            rule_top_box,
            ensemble_top_box,
            top_pick_confidence,
            stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tiers::TopPick;

    fn classification(tier: Tier, top_box: u8) -> RaceClassification {
        RaceClassification {
            tier,
            top: Some(TopPick {
                name: "Top".to_string(),
                box_no: top_box,
                rule_score: 55.0,
            }),
            second_score: Some(44.0),
            margin_percent: Some(20.0),
            margin_absolute: Some(11.0),
            degenerate: false,
        }
    }

    #[test]
    fn test_agreement_triggers_hybrid_bet() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::Tier1, 2), Some(&[(1, 10.0), (2, 78.0), (3, 12.0)]));

        assert_eq!(decision.recommended_box(), Some(2));
        assert_eq!(decision.trigger_tier(), Some("HYBRID_TIER1"));
        assert_eq!(decision.stages.last(), Some(&HybridStage::Decided));
        assert!(decision.stages.contains(&HybridStage::AgreementChecked));
    }

    #[test]
    fn test_absent_ensemble_never_bets() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings).decide(&classification(Tier::Lock, 1), None);

        assert_eq!(decision.recommended_box(), None);
        assert!(!decision.ensemble_present);
        assert_eq!(decision.no_bet_reasons(), &[NoBetReason::EnsembleAbsent]);
        assert!(!decision.stages.contains(&HybridStage::EnsembleEvaluated));
    }

    #[test]
    fn test_disagreement_blocks_bet() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::Lock, 1), Some(&[(1, 88.0), (4, 95.0)]));

        assert_eq!(decision.recommended_box(), None);
        assert!(decision.no_bet_reasons().contains(&NoBetReason::PicksDisagree));
        assert_eq!(decision.ensemble_top_box, Some(4));
    }

    #[test]
    fn test_low_confidence_blocks_bet() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::Lock, 1), Some(&[(1, 60.0), (4, 40.0)]));
        assert_eq!(decision.no_bet_reasons(), &[NoBetReason::ConfidenceTooLow]);
    }

    #[test]
    fn test_low_rule_tier_blocks_bet() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::Tier2, 1), Some(&[(1, 90.0), (4, 10.0)]));
        assert_eq!(decision.no_bet_reasons(), &[NoBetReason::RuleTierTooLow]);

        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::NoBet, 1), Some(&[(1, 90.0), (4, 10.0)]));
        assert_eq!(decision.no_bet_reasons(), &[NoBetReason::RuleTierTooLow]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let settings = HybridSettings::default();
        let decision = HybridDecisionMaker::new(&settings)
            .decide(&classification(Tier::Tier1, 1), Some(&[(1, 70.0), (4, 30.0)]));
        assert_eq!(decision.recommended_box(), Some(1));
    }

    #[test]
    fn test_ensemble_top_tie_goes_to_lower_box() {
        assert_eq!(ensemble_top(&[(5, 40.0), (2, 40.0), (7, 20.0)]), Some((2, 40.0)));
        assert_eq!(ensemble_top(&[]), None);
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = HybridVerdict::NoBet {
            reasons: vec![NoBetReason::EnsembleAbsent],
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"verdict\":\"NO_BET\""));
        assert!(json.contains("ensemble_absent"));
    }

    #[test]
    fn test_validate_threshold() {
        let mut settings = HybridSettings::default();
        assert!(settings.validate().is_ok());
        settings.min_ensemble_confidence = 120.0;
        assert!(settings.validate().is_err());
    }
}
