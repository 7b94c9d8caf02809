//! Scoring, tiering and decision logic

pub mod aggregator;
pub mod blend;
pub mod hybrid;
pub mod tiers;
pub mod track;
pub mod weights;

// Re-export commonly used types
pub use aggregator::{RaceScoring, ScoreAggregator, ScoredEntrant, ScoringSettings};
pub use blend::{EnsembleBlender, EnsembleSettings, EnsembleSignal, EnsembleStatus};
pub use hybrid::{HybridDecision, HybridDecisionMaker, HybridSettings, HybridVerdict, NoBetReason};
pub use tiers::{BetCall, RaceClassification, Tier, TierClassifier, TierRule, TierSettings};
pub use track::{BoxAdjustment, TrackAdjustment, TrackAdjustmentTable};
pub use weights::{BoxPattern, DistanceCategory, Multiplier, WeightProfile, WeightProfileSelector};
