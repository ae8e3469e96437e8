use anyhow::Result;
use handle_extract::{
    classify::{Classification, NearDuplicate},
    consensus::ConsensusMethod,
    consts::{DIAGNOSTICS_FILE, REPORT_FILE, REVIEW_FILE, VERIFIED_FILE},
    pipeline::{BatchSummary, ImageRecord},
    store::HandleStore,
};
use std::fs;

fn record(handle: &str, classification: Classification, confidence: f32) -> ImageRecord {
    ImageRecord {
        image: format!("{}.png", handle),
        path: None,
        classification,
        handle: handle.to_string(),
        confidence,
        method: ConsensusMethod::ExactAgreement,
        flagged_for_review: false,
        near_duplicate: None,
        quality: 0.8,
        primary: None,
        secondary: None,
        secondary_unavailable: false,
        edit_distance: Some(0),
        persist: classification.is_emitted(),
        error: None,
        elapsed_ms: 12,
    }
}

#[test]
fn test_append_continues_numbering() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = HandleStore::open(dir.path(), "https://www.instagram.com")?;

    let mut similar = record("coffe.shop", Classification::Review, 0.9);
    similar.near_duplicate = Some(NearDuplicate {
        existing: "coffee.shop".into(),
        distance: 1,
    });
    let first = store.append(&[
        record("coffee.shop", Classification::VerifiedHigh, 0.97),
        similar,
        record("gone", Classification::Duplicate, 0.99),
        record("", Classification::Failed, 0.0),
    ])?;
    assert_eq!(first.verified, 1);
    assert_eq!(first.review, 1);

    let second = store.append(&[record("tea.house", Classification::VerifiedMedium, 0.88)])?;
    assert_eq!(second.verified, 1);

    let verified = fs::read_to_string(dir.path().join(VERIFIED_FILE))?;
    println!("{}", verified);
    assert!(verified.contains("**Total:** 2"));
    assert!(verified.contains("1. coffee.shop - https://www.instagram.com/coffee.shop/ [HIGH 97%]"));
    assert!(verified.contains("2. tea.house - https://www.instagram.com/tea.house/ [MEDIUM 88%]"));

    let review = fs::read_to_string(dir.path().join(REVIEW_FILE))?;
    println!("{}", review);
    assert!(review.contains("1. **coffe.shop** - https://www.instagram.com/coffe.shop/"));
    assert!(review.contains("Similar to: coffee.shop (distance 1)"));

    let mut existing = store.load_existing()?;
    existing.sort();
    assert_eq!(existing, ["coffe.shop", "coffee.shop", "tea.house"]);
    Ok(())
}

#[test]
fn test_report_and_diagnostics() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = HandleStore::open(dir.path().join("leads"), "https://www.instagram.com/")?;
    let records = vec![
        record("one.handle", Classification::VerifiedHigh, 0.95),
        record("two.handle", Classification::Review, 0.7),
    ];
    let summary = BatchSummary::from_records(&records, 3, 1, 1500);
    assert_eq!(summary.processed, 2);
    assert!((summary.average_confidence - 0.825).abs() < 1e-5);

    let report = fs::read_to_string(store.write_report(&summary)?)?;
    println!("{}", report);
    assert!(report.contains("- Dropped (cancelled): 1"));
    assert!(report.contains("| verified_high | 1 | 50.0% |"));
    assert!(report.contains("| exact_agreement | 2 | 100.0% |"));
    assert!(dir.path().join("leads").join(REPORT_FILE).exists());

    let path = store.write_diagnostics(&summary, &records)?;
    assert!(path.ends_with(DIAGNOSTICS_FILE));
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    assert_eq!(json["records"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["records"][1]["classification"], "review");
    assert_eq!(json["summary"]["counts"]["verified_high"], 1);
    Ok(())
}
