use anyhow::Result;
use handle_extract::{
    classify::{Classification, Classifier, DuplicateIndex},
    config::TierConfig,
    consensus::{ConsensusMethod, FinalResult},
    error::ExtractError,
};
use std::sync::Barrier;

fn result(text: &str, confidence: f32) -> FinalResult {
    FinalResult {
        text: text.to_string(),
        confidence,
        method: ConsensusMethod::ExactAgreement,
        ..FinalResult::failed()
    }
}

fn classifier() -> Classifier {
    Classifier::new(TierConfig::default())
}

#[test]
fn test_tiers() -> Result<()> {
    let index = DuplicateIndex::new();
    let cases = [
        ("alpha.one", 0.95, Classification::VerifiedHigh),
        ("bravo.two", 0.90, Classification::VerifiedMedium),
        ("charlie.three", 0.85, Classification::VerifiedMedium),
        ("delta.four", 0.84, Classification::Review),
    ];
    for (handle, confidence, expected) in cases {
        let verdict = classifier().classify(&result(handle, confidence), &index);
        println!("{} {:.2} -> {}", handle, confidence, verdict.classification);
        assert_eq!(verdict.classification, expected);
        assert!(verdict.persist);
    }
    assert_eq!(index.seen_this_run().len(), 4);
    Ok(())
}

#[test]
fn test_malformed_handles_are_rejected() -> Result<()> {
    let index = DuplicateIndex::new();
    for bad in ["_abc.", "ab..cd", "abc.", ".abc", "way_too_long_for_any_platform_handle", "with space!"] {
        let verdict = classifier().classify(&result(bad, 0.99), &index);
        assert_eq!(verdict.classification, Classification::Failed, "{}", bad);
        assert!(matches!(verdict.error, Some(ExtractError::FormatInvalid(_))));
        assert!(!verdict.persist);
    }

    // trailing underscore is fine
    let verdict = classifier().classify(&result("trailing_", 0.99), &index);
    assert_eq!(verdict.classification, Classification::VerifiedHigh);

    let failed = classifier().classify(&FinalResult::failed(), &index);
    assert_eq!(failed.error, Some(ExtractError::ExtractionFailed));
    Ok(())
}

#[test]
fn test_exact_duplicates() -> Result<()> {
    let index = DuplicateIndex::from_existing(["Old.Handle"]);
    let verdict = classifier().classify(&result("old.handle", 0.99), &index);
    assert_eq!(verdict.classification, Classification::Duplicate);
    assert!(verdict.error.is_none());

    let first = classifier().classify(&result("new.handle", 0.99), &index);
    let second = classifier().classify(&result("new.handle", 0.99), &index);
    assert_eq!(first.classification, Classification::VerifiedHigh);
    assert_eq!(second.classification, Classification::Duplicate);
    assert_eq!(
        second.error,
        Some(ExtractError::DuplicateIndexConflict("new.handle".into()))
    );
    Ok(())
}

#[test]
fn test_near_duplicates_are_symmetric() -> Result<()> {
    let pairs = [("coffee.shop", "coffe.shop"), ("brand_x", "brandx"), ("abcdef", "abcdxy")];
    for (a, b) in pairs {
        let index = DuplicateIndex::from_existing([a]);
        let ab = classifier().classify(&result(b, 0.99), &index);

        let index = DuplicateIndex::from_existing([b]);
        let ba = classifier().classify(&result(a, 0.99), &index);

        assert_eq!(ab.classification, Classification::Review);
        assert_eq!(ba.classification, Classification::Review);
        assert_eq!(ab.near_duplicate.as_ref().unwrap().existing, a);
        assert_eq!(ba.near_duplicate.as_ref().unwrap().existing, b);
        assert_eq!(
            ab.near_duplicate.unwrap().distance,
            ba.near_duplicate.unwrap().distance
        );
    }

    let index = DuplicateIndex::from_existing(["abcdef"]);
    let far = classifier().classify(&result("abcxyz", 0.99), &index);
    assert_eq!(far.classification, Classification::VerifiedHigh);
    assert!(far.near_duplicate.is_none());
    Ok(())
}

#[test]
fn test_concurrent_claims_accept_once() -> Result<()> {
    const WORKERS: usize = 8;
    let index = DuplicateIndex::new();
    let barrier = Barrier::new(WORKERS);

    let verdicts: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    classifier().classify(&result("contested", 0.97), &index)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted = verdicts.iter().filter(|v| v.persist).count();
    let duplicates = verdicts
        .iter()
        .filter(|v| v.classification == Classification::Duplicate)
        .count();
    println!("accepted={} duplicates={}", accepted, duplicates);
    assert_eq!(accepted, 1);
    assert_eq!(duplicates, WORKERS - 1);
    assert_eq!(index.seen_this_run(), vec!["contested".to_string()]);
    Ok(())
}
