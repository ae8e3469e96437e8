use thiserror::Error;

/// Per-image failure conditions. None of them aborts a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no text detected in any variant")]
    NoDetection,

    #[error("'{0}' is not a valid handle")]
    FormatInvalid(String),

    #[error("secondary engine unavailable: {0}")]
    SecondaryEngineUnavailable(String),

    #[error("'{0}' was already emitted earlier in this run")]
    DuplicateIndexConflict(String),

    #[error("neither engine produced a result")]
    ExtractionFailed,
}

/// Invalid settings, reported once at start-up.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("high tier threshold ({high}) must be above medium ({medium})")]
    TierOrder { high: f32, medium: f32 },

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f32 },

    #[error("consensus weight must be at least 1")]
    NoConsensusWeight,

    #[error("minor edit distance ({minor}) must not exceed the confusion distance ({confusion})")]
    DistanceOrder { minor: usize, confusion: usize },

    #[error("worker count must be at least 1")]
    NoWorkers,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
