// Rewrites of a disputed variant vote using known misread patterns

use crate::aggregate::{AggregatedResult, AggregationMethod, sources_of};
use crate::candidate::Candidate;
use crate::config::ConsensusConfig;
use crate::text;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    DotReconciled,
    ConfusionCorrected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub kind: CorrectionKind,
    /// Text the vote produced before the rewrite.
    pub from: String,
}

/// Apply the dot and confusion passes to a vote that had no consensus.
///
/// The first pass that finds a better sibling among `candidates` wins; a
/// consensus vote, or one with no applicable sibling, is returned as is.
pub fn correct(
    result: AggregatedResult,
    candidates: &[Candidate],
    config: &ConsensusConfig,
) -> AggregatedResult {
    if result.method == AggregationMethod::WeightedConsensus {
        return result;
    }

    if let Some(dotted) = find_dotted_sibling(&result, candidates, config) {
        return rewrite(result, dotted, CorrectionKind::DotReconciled, candidates);
    }
    if let Some(fixed) = find_confusion_fix(&result, candidates, config) {
        return rewrite(result, fixed, CorrectionKind::ConfusionCorrected, candidates);
    }
    result
}

fn rewrite(
    result: AggregatedResult,
    adopted: &Candidate,
    kind: CorrectionKind,
    candidates: &[Candidate],
) -> AggregatedResult {
    let text = adopted.normalized();
    debug!("Correction {:?}: '{}' -> '{}'", kind, result.text, text);
    AggregatedResult {
        contributing_sources: sources_of(candidates, &text),
        text,
        confidence: adopted.confidence,
        method: result.method,
        correction: Some(Correction {
            kind,
            from: result.text,
        }),
    }
}

/// A read that keeps a dot the winner lost or misread as a letter.
fn find_dotted_sibling<'a>(
    result: &AggregatedResult,
    candidates: &'a [Candidate],
    config: &ConsensusConfig,
) -> Option<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| text::is_dotted_sibling(&c.normalized(), &result.text))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .filter(|c| c.confidence >= result.confidence * config.dot_min_ratio)
}

/// A read that equals the winner with one known confusion undone.
fn find_confusion_fix<'a>(
    result: &AggregatedResult,
    candidates: &'a [Candidate],
    config: &ConsensusConfig,
) -> Option<&'a Candidate> {
    candidates.iter().find(|c| {
        let candidate = c.normalized();
        let distance = text::edit_distance(&candidate, &result.text);
        (1..=config.confusion_max_distance).contains(&distance)
            && c.confidence >= result.confidence * config.confusion_min_ratio
            && text::confusion_substitution(&result.text, &candidate, &config.confusions).is_some()
    })
}
