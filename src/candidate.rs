// Raw detections and their provenance

use crate::text;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a read came from: one of the primary engine's preprocessing
/// variants, or the secondary engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Balanced,
    Aggressive,
    Minimal,
    Secondary,
}

impl Source {
    pub const VARIANTS: [Source; 3] = [Source::Balanced, Source::Aggressive, Source::Minimal];

    pub fn is_variant(self) -> bool {
        self != Source::Secondary
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Balanced => "variant_balanced",
            Source::Aggressive => "variant_aggressive",
            Source::Minimal => "variant_minimal",
            Source::Secondary => "secondary_engine",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One text detection with a confidence in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub confidence: f32,
    pub source: Source,
    /// Built by joining several fragments of one variant.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub merged: bool,
}

impl Candidate {
    pub fn new(text: impl Into<String>, confidence: f32, source: Source) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            merged: false,
        }
    }

    pub fn normalized(&self) -> String {
        text::normalize(&self.text)
    }
}

/// One positioned detection inside a variant's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub text: String,
    pub confidence: f32,
    /// Horizontal centre of the detection box.
    #[serde(default)]
    pub x: f32,
}

impl Fragment {
    pub fn new(text: impl Into<String>, confidence: f32, x: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            x,
        }
    }
}

/// Everything the primary engine read from one preprocessing variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantRead {
    pub source: Source,
    pub fragments: Vec<Fragment>,
}

impl VariantRead {
    pub fn new(source: Source, fragments: Vec<Fragment>) -> Self {
        Self { source, fragments }
    }

    /// Convenience for a variant that produced a single detection.
    pub fn single(source: Source, text: &str, confidence: f32) -> Self {
        Self::new(source, vec![Fragment::new(text, confidence, 0.0)])
    }

    /// The variant's best single read: highest confidence, then longer text.
    pub fn best_candidate(&self) -> Option<Candidate> {
        self.fragments
            .iter()
            .filter_map(|f| text::clean(&f.text).map(|t| Candidate::new(t, f.confidence, self.source)))
            .max_by(|a, b| {
                a.confidence
                    .total_cmp(&b.confidence)
                    .then(a.text.len().cmp(&b.text.len()))
            })
    }

    /// Fragments joined left to right, for handles the engine split at a
    /// separator. Confidence is the weakest fragment's.
    pub fn merged_candidate(&self) -> Option<Candidate> {
        if self.fragments.len() < 2 {
            return None;
        }
        let mut ordered: Vec<&Fragment> = self.fragments.iter().collect();
        ordered.sort_by(|a, b| a.x.total_cmp(&b.x));

        let joined: String = ordered.iter().map(|f| f.text.as_str()).collect();
        let confidence = ordered
            .iter()
            .map(|f| f.confidence)
            .fold(f32::INFINITY, f32::min);
        let text = text::clean(&joined)?;

        let mut candidate = Candidate::new(text, confidence, self.source);
        candidate.merged = true;
        Some(candidate)
    }
}
