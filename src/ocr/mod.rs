// Recognition engine traits and the shared secondary-engine gate

use crate::candidate::{Candidate, Fragment, Source};
use crate::error::ExtractError;
use crate::text;
use anyhow::Result;
use log::{debug, warn};
use std::path::PathBuf;

pub mod recorded;

/// Words a descriptive engine uses when it is unsure of its answer.
const HEDGING_WORDS: [&str; 6] = ["appears", "seems", "might", "possibly", "unclear", "likely"];

/// The image a worker hands to the engines.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub name: String,
    pub path: Option<PathBuf>,
    /// Quality score measured ahead of time, if any.
    pub quality: Option<f32>,
}

impl ImageInput {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            quality: None,
        }
    }
}

/// Trait for the fast engine that reads each preprocessing variant
///
/// Engines keep per-instance state, so each worker owns its own.
pub trait PrimaryEngine {
    /// Read one preprocessing variant of the handle region
    ///
    /// # Arguments
    ///
    /// * `image` - The image being processed
    /// * `variant` - Which preprocessing variant to read
    ///
    /// # Returns
    ///
    /// Every fragment detected in that variant, possibly none
    fn recognize_variant(&mut self, image: &ImageInput, variant: Source) -> Result<Vec<Fragment>>;
}

/// Trait for the slower engine consulted once per image.
///
/// `Ok(None)` means the engine answered but saw no handle; an error means
/// it could not be reached.
pub trait SecondaryEngine {
    fn recognize(&mut self, image: &ImageInput) -> Result<Option<Candidate>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryOutcome {
    Read(Candidate),
    NoResult,
    Unavailable(ExtractError),
    Disabled,
}

impl SecondaryOutcome {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            SecondaryOutcome::Read(candidate) => Some(candidate),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ExtractError> {
        match self {
            SecondaryOutcome::Unavailable(err) => Some(err),
            _ => None,
        }
    }
}

/// Serializes calls into the single secondary engine instance shared by
/// all workers.
pub struct SecondaryGate<S> {
    engine: Option<tokio::sync::Mutex<S>>,
}

impl<S: SecondaryEngine> SecondaryGate<S> {
    pub fn new(engine: S) -> Self {
        Self {
            engine: Some(tokio::sync::Mutex::new(engine)),
        }
    }

    pub fn disabled() -> Self {
        Self { engine: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// Ask the secondary engine about `image`, waiting for exclusive access.
    ///
    /// Must be called from a blocking context such as a worker thread.
    pub fn recognize(&self, image: &ImageInput) -> SecondaryOutcome {
        let Some(engine) = &self.engine else {
            return SecondaryOutcome::Disabled;
        };
        let mut engine = engine.blocking_lock();
        match engine.recognize(image) {
            Ok(Some(mut candidate)) => {
                candidate.source = Source::Secondary;
                debug!(
                    "{}: secondary read '{}' ({:.2})",
                    image.name, candidate.text, candidate.confidence
                );
                SecondaryOutcome::Read(candidate)
            }
            Ok(None) => SecondaryOutcome::NoResult,
            Err(err) => {
                warn!("{}: secondary engine unavailable: {:#}", image.name, err);
                SecondaryOutcome::Unavailable(ExtractError::SecondaryEngineUnavailable(err.to_string()))
            }
        }
    }
}

/// Turn a free-text answer from a descriptive engine into a scored read.
///
/// Confidence starts at 0.85, loses 0.15 for hedging language, gains 0.10
/// for a well-formed handle and loses 0.10 for an unusual shape. The
/// result stays within [0.60, 1.0].
pub fn score_secondary_read(raw: &str) -> Option<Candidate> {
    let trimmed = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())?
        .trim_matches(|c: char| matches!(c, '`' | '"' | '\'' | '*'));
    let handle = text::clean(trimmed)?;

    let lowered = raw.to_lowercase();
    let mut confidence: f32 = 0.85;
    if HEDGING_WORDS.iter().any(|word| lowered.contains(word)) {
        confidence -= 0.15;
    }
    if text::is_valid_handle(&handle) {
        confidence += 0.10;
    }
    if text::has_unusual_pattern(&handle) {
        confidence -= 0.10;
    }

    Some(Candidate::new(handle, confidence.clamp(0.60, 1.0), Source::Secondary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Fixed(Option<&'static str>);

    impl SecondaryEngine for Fixed {
        fn recognize(&mut self, _image: &ImageInput) -> Result<Option<Candidate>> {
            match self.0 {
                Some(text) => Ok(Some(Candidate::new(text, 0.9, Source::Balanced))),
                None => bail!("connection refused"),
            }
        }
    }

    #[test]
    fn gate_tags_reads_as_secondary() {
        let gate = SecondaryGate::new(Fixed(Some("someone")));
        let outcome = gate.recognize(&ImageInput::named("a.png"));
        assert_eq!(outcome.candidate().unwrap().source, Source::Secondary);
    }

    #[test]
    fn unreachable_engine_is_not_fatal() {
        let gate = SecondaryGate::new(Fixed(None));
        let outcome = gate.recognize(&ImageInput::named("a.png"));
        assert!(outcome.candidate().is_none());
        assert!(matches!(
            outcome.error(),
            Some(ExtractError::SecondaryEngineUnavailable(_))
        ));
        let disabled: SecondaryGate<Fixed> = SecondaryGate::disabled();
        assert_eq!(disabled.recognize(&ImageInput::named("a.png")), SecondaryOutcome::Disabled);
    }

    #[test]
    fn scoring_rewards_clean_answers() {
        let clean = score_secondary_read("`@john.doe`").unwrap();
        assert_eq!(clean.text, "john.doe");
        assert!((clean.confidence - 0.95).abs() < 1e-5);

        let hedged = score_secondary_read("john.doe\nbut the dot might be noise").unwrap();
        assert!((hedged.confidence - 0.80).abs() < 1e-5);

        assert!(score_secondary_read("   \n").is_none());
    }
}
