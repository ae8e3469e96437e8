// Run settings and the tuning tables used by the consensus pipeline

use crate::candidate::Source;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// A known recognition confusion: `misread` shows up where `correct` was printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionPair {
    pub misread: String,
    pub correct: String,
}

impl ConfusionPair {
    pub fn new(misread: &str, correct: &str) -> Self {
        Self {
            misread: misread.to_string(),
            correct: correct.to_string(),
        }
    }
}

/// Weights, ratios and fixed confidences used by aggregation, correction
/// and cross-engine reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub aggressive_weight: u32,
    pub default_weight: u32,
    /// Combined weight a group of identical reads needs to win outright.
    pub consensus_weight: u32,
    /// A merged read must keep this share of the winner's confidence.
    pub segment_merge_ratio: f32,
    pub dot_min_ratio: f32,
    pub confusion_min_ratio: f32,
    pub confusion_max_distance: usize,
    pub agreement_bonus: f32,
    pub agreement_cap: f32,
    pub dot_secondary_confidence: f32,
    pub dot_primary_confidence: f32,
    pub confusion_confidence: f32,
    pub minor_edit_distance: usize,
    /// Confidence gap that makes a major disagreement "decided".
    pub disagreement_gap: f32,
    pub disagreement_penalty: f32,
    pub ambiguous_penalty: f32,
    pub secondary_rescue_confidence: f32,
    pub confusions: Vec<ConfusionPair>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            aggressive_weight: 2,
            default_weight: 1,
            consensus_weight: 3,
            segment_merge_ratio: 0.85,
            dot_min_ratio: 0.70,
            confusion_min_ratio: 0.55,
            confusion_max_distance: 3,
            agreement_bonus: 0.05,
            agreement_cap: 0.95,
            dot_secondary_confidence: 0.90,
            dot_primary_confidence: 0.88,
            confusion_confidence: 0.88,
            minor_edit_distance: 2,
            disagreement_gap: 0.10,
            disagreement_penalty: 0.10,
            ambiguous_penalty: 0.15,
            secondary_rescue_confidence: 0.80,
            confusions: default_confusions(),
        }
    }
}

impl ConsensusConfig {
    /// Voting weight of a read coming from `source`.
    pub fn weight(&self, source: Source) -> u32 {
        match source {
            Source::Aggressive => self.aggressive_weight,
            _ => self.default_weight,
        }
    }
}

fn default_confusions() -> Vec<ConfusionPair> {
    [
        ("tf", "ff"),
        ("a", "4"),
        ("x", "d"),
        ("cl", "d"),
        ("rn", "m"),
        ("vv", "w"),
        ("ii", "u"),
        ("l", "1"),
        ("0", "o"),
        ("5", "s"),
        ("8", "b"),
    ]
    .iter()
    .map(|(misread, correct)| ConfusionPair::new(misread, correct))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub high: f32,
    pub medium: f32,
    pub near_duplicate_distance: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            high: 0.95,
            medium: 0.85,
            near_duplicate_distance: crate::consts::NEAR_DUPLICATE_DISTANCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub floor: f32,
    pub max_penalty: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            floor: crate::consts::QUALITY_FLOOR,
            max_penalty: 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub workers: usize,
    pub secondary_enabled: bool,
    pub output_dir: PathBuf,
    pub profile_url_base: String,
    pub diagnostics: bool,
    /// Images slower than this are logged as warnings.
    pub slow_image_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            workers: cores.saturating_sub(1).clamp(1, 6),
            secondary_enabled: true,
            output_dir: PathBuf::from("leads"),
            profile_url_base: "https://www.instagram.com/".to_string(),
            diagnostics: false,
            slow_image_ms: 2000,
        }
    }
}

/// Everything a run needs, as read from the TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub consensus: ConsensusConfig,
    pub tiers: TierConfig,
    pub quality: QualityConfig,
    pub run: RunConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_values = [
            ("tiers.high", self.tiers.high),
            ("tiers.medium", self.tiers.medium),
            ("quality.floor", self.quality.floor),
            ("quality.max_penalty", self.quality.max_penalty),
            ("consensus.segment_merge_ratio", self.consensus.segment_merge_ratio),
            ("consensus.dot_min_ratio", self.consensus.dot_min_ratio),
            ("consensus.confusion_min_ratio", self.consensus.confusion_min_ratio),
            ("consensus.agreement_bonus", self.consensus.agreement_bonus),
            ("consensus.agreement_cap", self.consensus.agreement_cap),
            ("consensus.dot_secondary_confidence", self.consensus.dot_secondary_confidence),
            ("consensus.dot_primary_confidence", self.consensus.dot_primary_confidence),
            ("consensus.confusion_confidence", self.consensus.confusion_confidence),
            ("consensus.disagreement_gap", self.consensus.disagreement_gap),
            ("consensus.disagreement_penalty", self.consensus.disagreement_penalty),
            ("consensus.ambiguous_penalty", self.consensus.ambiguous_penalty),
            ("consensus.secondary_rescue_confidence", self.consensus.secondary_rescue_confidence),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { name, value });
            }
        }
        if self.tiers.high <= self.tiers.medium {
            return Err(ConfigError::TierOrder {
                high: self.tiers.high,
                medium: self.tiers.medium,
            });
        }
        if self.consensus.consensus_weight == 0 {
            return Err(ConfigError::NoConsensusWeight);
        }
        if self.consensus.minor_edit_distance > self.consensus.confusion_max_distance {
            return Err(ConfigError::DistanceOrder {
                minor: self.consensus.minor_edit_distance,
                confusion: self.consensus.confusion_max_distance,
            });
        }
        if self.run.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }
}
