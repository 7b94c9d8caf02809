//! Greyhound - Race scoring and confidence-tiering engine
//!
//! This library provides:
//! - Normalized factor values per entrant (static tables and race-relative percentiles)
//! - Distance-aware weight profiles and per-track adjustments
//! - Rule-based scores, confidence tiers and bet calls
//! - Ensemble blending of external probability sources and a hybrid bet decision
//! - Evaluation of tier calls against race results
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use greyhound::config::EngineConfig;
//! use greyhound::engine::TieringEngine;
//! use greyhound::models::{EntrantRecord, RaceCard};
//!
//! let engine = TieringEngine::new(Arc::new(EngineConfig::default()));
//! let race = RaceCard::new("Sandown Park", 4, 515)
//!     .with_entrant(EntrantRecord::new("Bolt", 1))
//!     .with_entrant(EntrantRecord::new("Blur", 2));
//!
//! let assessment = engine.assess(&race).unwrap();
//! println!("Tier: {}", assessment.tier());
//! ```

pub mod backtesting;
pub mod config;
pub mod core;
pub mod data;
pub mod engine;
pub mod error;
pub mod models;
pub mod predictor;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::{BetCall, DistanceCategory, Tier};
pub use engine::{EntrantAssessment, RaceAssessment, TieringEngine};
pub use error::{ConfigError, EngineError};
pub use models::{EntrantRecord, EntryRow, RaceCard, RaceResult};
pub use predictor::{Capability, HeuristicSource, ProbabilitySource, TableSource};
