// Cross-engine reconciliation of the primary vote with the secondary read

use crate::aggregate::AggregatedResult;
use crate::candidate::Candidate;
use crate::config::ConsensusConfig;
use crate::text;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Slack for comparing confidence gaps computed in `f32`.
const GAP_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    ExactAgreement,
    DotReconciled,
    ConfusionCorrected,
    MinorEditPreferred,
    MajorDisagreement,
    PrimaryOnly,
    SecondaryOnly,
    Failed,
}

impl ConsensusMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsensusMethod::ExactAgreement => "exact_agreement",
            ConsensusMethod::DotReconciled => "dot_reconciled",
            ConsensusMethod::ConfusionCorrected => "confusion_corrected",
            ConsensusMethod::MinorEditPreferred => "minor_edit_preferred",
            ConsensusMethod::MajorDisagreement => "major_disagreement",
            ConsensusMethod::PrimaryOnly => "primary_only",
            ConsensusMethod::SecondaryOnly => "secondary_only",
            ConsensusMethod::Failed => "failed",
        }
    }
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One engine's input to the reconciliation, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRead {
    pub text: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResult {
    pub text: String,
    pub confidence: f32,
    pub method: ConsensusMethod,
    pub flagged_for_review: bool,
    pub primary: Option<EngineRead>,
    pub secondary: Option<EngineRead>,
    /// Distance between the two reads, when both engines answered.
    pub edit_distance: Option<usize>,
}

impl FinalResult {
    pub fn failed() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            method: ConsensusMethod::Failed,
            flagged_for_review: false,
            primary: None,
            secondary: None,
            edit_distance: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.method == ConsensusMethod::Failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Primary,
    Secondary,
}

struct Decision {
    pick: Pick,
    confidence: f32,
    method: ConsensusMethod,
    flagged: bool,
}

/// Merge the primary vote and the secondary read into one final result.
///
/// Strategies are tried in order and the first that applies decides:
/// exact agreement, separator-only divergence, a known confusion pattern,
/// minor divergence, then major divergence (always flagged).
///
/// A missing secondary read (disabled, unavailable, or empty) leaves the
/// primary vote unchanged; a missing primary vote falls back to the
/// secondary read at a capped confidence.
pub fn reconcile(
    primary: Option<&AggregatedResult>,
    secondary: Option<&Candidate>,
    config: &ConsensusConfig,
) -> FinalResult {
    let primary = primary.map(|p| EngineRead {
        text: text::normalize(&p.text),
        confidence: p.confidence,
    });
    let secondary = secondary.map(|s| EngineRead {
        text: text::normalize(&s.text),
        confidence: s.confidence,
    });

    match (primary, secondary) {
        (None, None) => FinalResult::failed(),
        (Some(p), None) => FinalResult {
            text: p.text.clone(),
            confidence: p.confidence,
            method: ConsensusMethod::PrimaryOnly,
            flagged_for_review: false,
            primary: Some(p),
            secondary: None,
            edit_distance: None,
        },
        (None, Some(s)) => FinalResult {
            text: s.text.clone(),
            confidence: s.confidence.min(config.secondary_rescue_confidence),
            method: ConsensusMethod::SecondaryOnly,
            flagged_for_review: false,
            primary: None,
            secondary: Some(s),
            edit_distance: None,
        },
        (Some(p), Some(s)) => {
            let distance = text::edit_distance(&p.text, &s.text);
            let decision = decide(&p, &s, distance, config);
            let chosen = match decision.pick {
                Pick::Primary => &p,
                Pick::Secondary => &s,
            };
            debug!(
                "Consensus {} between '{}' ({:.2}) and '{}' ({:.2}): '{}'",
                decision.method, p.text, p.confidence, s.text, s.confidence, chosen.text
            );
            FinalResult {
                text: chosen.text.clone(),
                confidence: decision.confidence.clamp(0.0, 1.0),
                method: decision.method,
                // large divergence stays flagged whichever strategy resolved it
                flagged_for_review: decision.flagged || distance > config.minor_edit_distance,
                edit_distance: Some(distance),
                primary: Some(p),
                secondary: Some(s),
            }
        }
    }
}

fn decide(p: &EngineRead, s: &EngineRead, distance: usize, config: &ConsensusConfig) -> Decision {
    let fixed = |pick, confidence, method| Decision {
        pick,
        confidence,
        method,
        flagged: false,
    };

    if distance == 0 {
        let confidence = (p.confidence + config.agreement_bonus).min(config.agreement_cap);
        return fixed(Pick::Primary, confidence, ConsensusMethod::ExactAgreement);
    }

    if text::is_dotted_sibling(&s.text, &p.text) {
        return fixed(Pick::Secondary, config.dot_secondary_confidence, ConsensusMethod::DotReconciled);
    }
    if text::is_dotted_sibling(&p.text, &s.text) {
        return fixed(Pick::Primary, config.dot_primary_confidence, ConsensusMethod::DotReconciled);
    }

    if distance <= config.confusion_max_distance {
        if text::confusion_substitution(&p.text, &s.text, &config.confusions).is_some() {
            return fixed(Pick::Secondary, config.confusion_confidence, ConsensusMethod::ConfusionCorrected);
        }
        if text::confusion_substitution(&s.text, &p.text, &config.confusions).is_some() {
            return fixed(Pick::Primary, config.confusion_confidence, ConsensusMethod::ConfusionCorrected);
        }
    }

    let more_confident = if p.confidence > s.confidence {
        Pick::Primary
    } else {
        Pick::Secondary
    };

    if distance <= config.minor_edit_distance {
        let (p_len, s_len) = (p.text.chars().count(), s.text.chars().count());
        let pick = match p_len.cmp(&s_len) {
            std::cmp::Ordering::Greater => Pick::Primary,
            std::cmp::Ordering::Less => Pick::Secondary,
            std::cmp::Ordering::Equal => more_confident,
        };
        return fixed(
            pick,
            p.confidence.max(s.confidence),
            ConsensusMethod::MinorEditPreferred,
        );
    }

    let gap = (p.confidence - s.confidence).abs();
    let penalty = if gap + GAP_EPSILON >= config.disagreement_gap {
        config.disagreement_penalty
    } else {
        config.ambiguous_penalty
    };
    Decision {
        pick: more_confident,
        confidence: (p.confidence.max(s.confidence) - penalty).max(0.0),
        method: ConsensusMethod::MajorDisagreement,
        flagged: true,
    }
}
