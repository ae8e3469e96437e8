// Variant voting over the primary engine's preprocessing reads

use crate::candidate::{Candidate, Source, VariantRead};
use crate::config::ConsensusConfig;
use crate::correction::Correction;
use crate::error::ExtractError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    WeightedConsensus,
    HighestConfidence,
    SegmentMerge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub text: String,
    pub confidence: f32,
    pub method: AggregationMethod,
    pub contributing_sources: BTreeSet<Source>,
    /// Set when the correction pass rewrote the voted text.
    pub correction: Option<Correction>,
}

/// The aggregated read together with every candidate that took part.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub result: AggregatedResult,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug)]
struct VoteGroup {
    text: String,
    weight: u32,
    sources: BTreeSet<Source>,
    confidence: f32,
}

fn by_confidence_then_length(a: &Candidate, b: &Candidate) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then(a.text.len().cmp(&b.text.len()))
}

/// Build the voting candidates from the variants' raw fragments.
pub fn collect_candidates(reads: &[VariantRead]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for read in reads.iter().filter(|r| r.source.is_variant()) {
        let best = read.best_candidate();
        let merged = read
            .merged_candidate()
            .filter(|m| best.as_ref().is_none_or(|b| m.text.len() > b.text.len()));
        candidates.extend(best);
        candidates.extend(merged);
    }
    candidates
}

/// Group identical reads across variants and sum their weights. A group
/// reaching the consensus weight wins outright; otherwise the most
/// confident single read wins unless a merged read recovers a longer
/// handle around it.
pub fn aggregate(reads: &[VariantRead], config: &ConsensusConfig) -> Result<Aggregation, ExtractError> {
    let candidates = collect_candidates(reads);
    if candidates.is_empty() {
        return Err(ExtractError::NoDetection);
    }

    let mut groups: Vec<VoteGroup> = Vec::new();
    for candidate in &candidates {
        let key = candidate.normalized();
        let index = match groups.iter().position(|g| g.text == key) {
            Some(index) => index,
            None => {
                groups.push(VoteGroup {
                    text: key,
                    weight: 0,
                    sources: BTreeSet::new(),
                    confidence: 0.0,
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[index];
        // one vote per variant, even if its single and merged reads agree
        if group.sources.insert(candidate.source) {
            group.weight += config.weight(candidate.source);
        }
        group.confidence = group.confidence.max(candidate.confidence);
    }

    let consensus = groups
        .iter()
        .filter(|g| g.weight >= config.consensus_weight)
        .max_by(|a, b| {
            a.weight
                .cmp(&b.weight)
                .then(a.confidence.total_cmp(&b.confidence))
                .then(a.text.len().cmp(&b.text.len()))
        });

    let result = match consensus {
        Some(group) => {
            debug!(
                "Variant consensus on '{}' (weight {}, confidence {:.2})",
                group.text, group.weight, group.confidence
            );
            AggregatedResult {
                text: group.text.clone(),
                confidence: group.confidence,
                method: AggregationMethod::WeightedConsensus,
                contributing_sources: group.sources.clone(),
                correction: None,
            }
        }
        None => fallback(&candidates, config).ok_or(ExtractError::NoDetection)?,
    };

    Ok(Aggregation { result, candidates })
}

fn fallback(candidates: &[Candidate], config: &ConsensusConfig) -> Option<AggregatedResult> {
    let best = candidates
        .iter()
        .filter(|c| !c.merged)
        .max_by(|a, b| by_confidence_then_length(a, b))
        .or_else(|| candidates.iter().max_by(|a, b| by_confidence_then_length(a, b)))?;

    let recovered = candidates
        .iter()
        .filter(|c| {
            c.merged
                && c.text.len() > best.text.len()
                && c.text.contains(best.text.as_str())
                && c.confidence >= best.confidence * config.segment_merge_ratio
        })
        .max_by(|a, b| by_confidence_then_length(a, b));

    let (winner, method) = match recovered {
        Some(merged) => {
            debug!("Segment merge recovered '{}' around '{}'", merged.text, best.text);
            (merged, AggregationMethod::SegmentMerge)
        }
        None => (best, AggregationMethod::HighestConfidence),
    };

    let text = winner.normalized();
    Some(AggregatedResult {
        contributing_sources: sources_of(candidates, &text),
        text,
        confidence: winner.confidence,
        method,
        correction: None,
    })
}

/// Sources whose read matches `text`.
pub fn sources_of(candidates: &[Candidate], text: &str) -> BTreeSet<Source> {
    candidates
        .iter()
        .filter(|c| c.normalized() == text)
        .map(|c| c.source)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Fragment;

    fn reads(items: &[(Source, &str, f32)]) -> Vec<VariantRead> {
        items
            .iter()
            .map(|(source, text, conf)| VariantRead::single(*source, text, *conf))
            .collect()
    }

    #[test]
    fn three_light_variants_reach_consensus() {
        let config = ConsensusConfig {
            aggressive_weight: 1,
            ..Default::default()
        };
        let agg = aggregate(
            &reads(&[
                (Source::Balanced, "abc", 0.5),
                (Source::Aggressive, "abc", 0.6),
                (Source::Minimal, "abc", 0.7),
            ]),
            &config,
        )
        .unwrap();
        assert_eq!(agg.result.method, AggregationMethod::WeightedConsensus);
        assert_eq!(agg.result.confidence, 0.7);
    }

    #[test]
    fn two_non_aggressive_variants_are_not_enough() {
        let agg = aggregate(
            &reads(&[
                (Source::Balanced, "abc", 0.5),
                (Source::Aggressive, "abd", 0.9),
                (Source::Minimal, "abc", 0.7),
            ]),
            &ConsensusConfig::default(),
        )
        .unwrap();
        assert_eq!(agg.result.method, AggregationMethod::HighestConfidence);
        assert_eq!(agg.result.text, "abd");
    }

    #[test]
    fn merged_fragments_join_by_position() {
        let read = VariantRead::new(
            Source::Balanced,
            vec![Fragment::new("name", 0.8, 40.0), Fragment::new("user_", 0.9, 10.0)],
        );
        let merged = read.merged_candidate().unwrap();
        assert_eq!(merged.text, "user_name");
        assert_eq!(merged.confidence, 0.8);
        assert!(merged.merged);
    }

    fn split_read(tail_confidence: f32) -> Vec<VariantRead> {
        vec![
            VariantRead::new(
                Source::Balanced,
                vec![
                    Fragment::new("user_", 0.9, 10.0),
                    Fragment::new("name", tail_confidence, 60.0),
                ],
            ),
            VariantRead::single(Source::Aggressive, "abc", 0.5),
        ]
    }

    #[test]
    fn merged_read_recovers_split_handle() {
        let agg = aggregate(&split_read(0.88), &ConsensusConfig::default()).unwrap();
        assert_eq!(agg.result.method, AggregationMethod::SegmentMerge);
        assert_eq!(agg.result.text, "user_name");
        assert_eq!(agg.result.confidence, 0.88);
        assert_eq!(agg.result.contributing_sources, BTreeSet::from([Source::Balanced]));
    }

    #[test]
    fn weak_merged_read_is_not_adopted() {
        // 0.7 is below 0.85 of the winning 0.9
        let agg = aggregate(&split_read(0.7), &ConsensusConfig::default()).unwrap();
        assert_eq!(agg.result.method, AggregationMethod::HighestConfidence);
        assert_eq!(agg.result.text, "user_");
        assert_eq!(agg.result.confidence, 0.9);
    }
}
