//! Engine configuration
//!
//! One versioned JSON document holds every tunable: weight profiles,
//! factor tables, track adjustments, tier rules, ensemble weights and hybrid
//! thresholds. Omitted sections fall back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::core::aggregator::ScoringSettings;
use crate::core::blend::EnsembleSettings;
use crate::core::hybrid::HybridSettings;
use crate::core::tiers::TierSettings;
use crate::core::track::TrackAdjustmentTable;
use crate::error::ConfigError;

pub const DEFAULT_CONFIG_VERSION: &str = "baseline-1";

fn default_version() -> String {
    DEFAULT_CONFIG_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub scoring: ScoringSettings,
    #[serde(default)]
    pub tracks: TrackAdjustmentTable,
    #[serde(default)]
    pub tiers: TierSettings,
    #[serde(default)]
    pub ensemble: EnsembleSettings,
    #[serde(default)]
    pub hybrid: HybridSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            description: None,
            scoring: ScoringSettings::default(),
            tracks: TrackAdjustmentTable::default(),
            tiers: TierSettings::default(),
            ensemble: EnsembleSettings::default(),
            hybrid: HybridSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a configuration document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        info!(
            version = %config.version,
            tracks = config.tracks.len(),
            "Loaded engine config from {:?}",
            path
        );
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every section; the first problem found is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.tracks.validate()?;
        self.tiers.validate()?;
        self.ensemble.validate()?;
        self.hybrid.validate()?;
        Ok(())
    }
}
