// Final accept/review decision and cross-run duplicate protection

use crate::config::TierConfig;
use crate::consensus::FinalResult;
use crate::error::ExtractError;
use crate::text;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    VerifiedHigh,
    VerifiedMedium,
    Review,
    Duplicate,
    Failed,
}

impl Classification {
    pub fn as_str(self) -> &'static str {
        match self {
            Classification::VerifiedHigh => "verified_high",
            Classification::VerifiedMedium => "verified_medium",
            Classification::Review => "review",
            Classification::Duplicate => "duplicate",
            Classification::Failed => "failed",
        }
    }

    pub fn is_verified(self) -> bool {
        matches!(self, Classification::VerifiedHigh | Classification::VerifiedMedium)
    }

    /// Classifications whose handle is written to the long-lived index.
    pub fn is_emitted(self) -> bool {
        self.is_verified() || self == Classification::Review
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An existing handle close enough to be the same account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NearDuplicate {
    pub existing: String,
    pub distance: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub handle: String,
    pub classification: Classification,
    pub near_duplicate: Option<NearDuplicate>,
    /// The caller should persist `handle` to the long-lived index.
    pub persist: bool,
    pub error: Option<ExtractError>,
}

impl Verdict {
    fn failed(handle: String, error: ExtractError) -> Self {
        Self {
            handle,
            classification: Classification::Failed,
            near_duplicate: None,
            persist: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    persisted: HashSet<String>,
    seen: HashSet<String>,
}

impl IndexState {
    /// Closest known handle within `max_distance`; ties go to the
    /// alphabetically first one.
    fn nearest(&self, handle: &str, max_distance: usize) -> Option<NearDuplicate> {
        let len = handle.chars().count();
        self.persisted
            .iter()
            .chain(self.seen.iter())
            .filter(|existing| existing.chars().count().abs_diff(len) <= max_distance)
            .map(|existing| (existing, strsim::levenshtein(handle, existing)))
            .filter(|(_, distance)| (1..=max_distance).contains(distance))
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)))
            .map(|(existing, distance)| NearDuplicate {
                existing: existing.clone(),
                distance,
            })
    }
}

/// Handles accepted by earlier runs plus those emitted by this one.
/// Duplicate checks and the insertion of an accepted handle happen under
/// one lock, so two workers can never both accept the same handle.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    state: Mutex<IndexState>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the index with handles accepted by earlier runs.
    pub fn from_existing<I, S>(handles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let persisted = handles
            .into_iter()
            .map(|h| text::normalize(h.as_ref()))
            .filter(|h| !h.is_empty())
            .collect();
        Self {
            state: Mutex::new(IndexState {
                persisted,
                seen: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, handle: &str) -> bool {
        let handle = text::normalize(handle);
        let state = self.lock();
        state.persisted.contains(&handle) || state.seen.contains(&handle)
    }

    pub fn persisted_len(&self) -> usize {
        self.lock().persisted.len()
    }

    /// Handles emitted by the current run, sorted.
    pub fn seen_this_run(&self) -> Vec<String> {
        let mut seen: Vec<String> = self.lock().seen.iter().cloned().collect();
        seen.sort();
        seen
    }

    /// Check `handle` against the index and, when `decide` accepts it,
    /// record it as emitted by this run. Runs under a single lock.
    fn admit(
        &self,
        handle: String,
        max_distance: usize,
        decide: impl FnOnce(Option<&NearDuplicate>) -> Classification,
    ) -> Verdict {
        let mut state = self.lock();

        if state.persisted.contains(&handle) || state.seen.contains(&handle) {
            let error = state
                .seen
                .contains(&handle)
                .then(|| ExtractError::DuplicateIndexConflict(handle.clone()));
            return Verdict {
                handle,
                classification: Classification::Duplicate,
                near_duplicate: None,
                persist: false,
                error,
            };
        }

        let near_duplicate = state.nearest(&handle, max_distance);
        let classification = decide(near_duplicate.as_ref());
        let persist = classification.is_emitted();
        if persist {
            state.seen.insert(handle.clone());
        }
        Verdict {
            handle,
            classification,
            near_duplicate,
            persist,
            error: None,
        }
    }
}

/// Maps a quality-adjusted result to its tier, consulting the index.
#[derive(Debug, Clone)]
pub struct Classifier {
    tiers: TierConfig,
}

impl Classifier {
    pub fn new(tiers: TierConfig) -> Self {
        Self { tiers }
    }

    pub fn classify(&self, result: &FinalResult, index: &DuplicateIndex) -> Verdict {
        let handle = text::normalize(&result.text);
        if result.is_failed() {
            return Verdict::failed(handle, ExtractError::ExtractionFailed);
        }
        if let Err(violation) = text::validate_handle(&handle) {
            debug!("Rejecting '{}': {:?}", handle, violation);
            return Verdict::failed(handle.clone(), ExtractError::FormatInvalid(handle));
        }

        index.admit(handle, self.tiers.near_duplicate_distance, |near| {
            self.tier(result, near)
        })
    }

    fn tier(&self, result: &FinalResult, near: Option<&NearDuplicate>) -> Classification {
        if near.is_some() || result.flagged_for_review {
            Classification::Review
        } else if result.confidence >= self.tiers.high {
            Classification::VerifiedHigh
        } else if result.confidence >= self.tiers.medium {
            Classification::VerifiedMedium
        } else {
            Classification::Review
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusMethod;

    fn result(text: &str, confidence: f32) -> FinalResult {
        FinalResult {
            text: text.into(),
            confidence,
            method: ConsensusMethod::ExactAgreement,
            ..FinalResult::failed()
        }
    }

    #[test]
    fn nearest_prefers_smallest_distance_then_name() {
        let index = DuplicateIndex::from_existing(["abcdx", "abcde", "abxyz"]);
        let near = index.lock().nearest("abcdf", 2).unwrap();
        assert_eq!(near.existing, "abcde");
        assert_eq!(near.distance, 1);
    }

    #[test]
    fn rejected_handles_are_not_recorded() {
        let index = DuplicateIndex::new();
        let classifier = Classifier::new(TierConfig::default());
        let verdict = classifier.classify(&result("ab..cd", 0.99), &index);
        assert_eq!(verdict.classification, Classification::Failed);
        assert!(!verdict.persist);
        assert!(index.seen_this_run().is_empty());
    }

    #[test]
    fn flagged_results_go_to_review() {
        let index = DuplicateIndex::new();
        let classifier = Classifier::new(TierConfig::default());
        let mut flagged = result("someone", 0.97);
        flagged.flagged_for_review = true;
        let verdict = classifier.classify(&flagged, &index);
        assert_eq!(verdict.classification, Classification::Review);
        assert!(verdict.persist);
    }
}
