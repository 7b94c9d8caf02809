//! Evaluation of tier calls against actual race results

pub mod evaluator;
pub mod metrics;

pub use evaluator::{evaluate, EvaluationResult, PickRecord};
pub use metrics::{calculate_metrics, DimensionAnalysis, HitMetrics};
