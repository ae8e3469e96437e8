// Per-image processing and the parallel batch driver

use crate::aggregate::{AggregatedResult, aggregate};
use crate::candidate::{Candidate, Source, VariantRead};
use crate::classify::{Classification, Classifier, DuplicateIndex, NearDuplicate};
use crate::config::Settings;
use crate::consensus::{ConsensusMethod, FinalResult, reconcile};
use crate::correction::correct;
use crate::error::ExtractError;
use crate::ocr::{ImageInput, PrimaryEngine, SecondaryEngine, SecondaryGate};
use crate::quality;
use anyhow::Result;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Everything known about one processed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image: String,
    pub path: Option<PathBuf>,
    pub classification: Classification,
    pub handle: String,
    pub confidence: f32,
    pub method: ConsensusMethod,
    pub flagged_for_review: bool,
    pub near_duplicate: Option<NearDuplicate>,
    pub quality: f32,
    /// Variant vote after correction, before consensus.
    pub primary: Option<AggregatedResult>,
    pub secondary: Option<Candidate>,
    pub secondary_unavailable: bool,
    pub edit_distance: Option<usize>,
    /// The handle should be added to the long-lived lists.
    pub persist: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl ImageRecord {
    fn engine_failure(image: &ImageInput, err: &anyhow::Error) -> Self {
        Self {
            image: image.name.clone(),
            path: image.path.clone(),
            classification: Classification::Failed,
            handle: String::new(),
            confidence: 0.0,
            method: ConsensusMethod::Failed,
            flagged_for_review: false,
            near_duplicate: None,
            quality: 0.0,
            primary: None,
            secondary: None,
            secondary_unavailable: false,
            edit_distance: None,
            persist: false,
            error: Some(format!("engine could not be started: {:#}", err)),
            elapsed_ms: 0,
        }
    }
}

pub struct Pipeline {
    settings: Settings,
    classifier: Classifier,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let classifier = Classifier::new(settings.tiers.clone());
        Self { settings, classifier }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Read every preprocessing variant. A variant whose read fails is
    /// left out; the others still vote.
    pub fn read_variants<P: PrimaryEngine>(&self, engine: &mut P, image: &ImageInput) -> Vec<VariantRead> {
        Source::VARIANTS
            .iter()
            .filter_map(|&variant| match engine.recognize_variant(image, variant) {
                Ok(fragments) => Some(VariantRead::new(variant, fragments)),
                Err(err) => {
                    warn!("{}: {} read failed: {:#}", image.name, variant, err);
                    None
                }
            })
            .collect()
    }

    /// Run one image through variant reads, aggregation, correction, the
    /// secondary read, consensus, quality adjustment and classification.
    /// Always yields one record.
    pub fn process_image<P, S>(
        &self,
        engine: &mut P,
        gate: &SecondaryGate<S>,
        index: &DuplicateIndex,
        image: &ImageInput,
    ) -> ImageRecord
    where
        P: PrimaryEngine,
        S: SecondaryEngine,
    {
        let start = Instant::now();
        let consensus = &self.settings.consensus;

        let reads = self.read_variants(engine, image);
        let (primary, primary_error) = match aggregate(&reads, consensus) {
            Ok(aggregation) => (
                Some(correct(aggregation.result, &aggregation.candidates, consensus)),
                None,
            ),
            Err(err) => {
                debug!("{}: {}", image.name, err);
                (None, Some(err))
            }
        };

        let secondary = gate.recognize(image);
        let reconciled = reconcile(primary.as_ref(), secondary.candidate(), consensus);
        let quality = self.resolve_quality(image);
        let adjusted = quality::adjust(reconciled, quality, &self.settings.quality);
        let verdict = self.classifier.classify(&adjusted, index);

        let error = match (&verdict.error, verdict.classification) {
            (Some(err), _) => Some(err.clone()),
            (None, Classification::Failed) => Some(primary_error.unwrap_or(ExtractError::ExtractionFailed)),
            (None, _) => None,
        };

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed_ms > self.settings.run.slow_image_ms {
            warn!("{}: slow image, took {:?}", image.name, elapsed);
        }
        log_outcome(image, &adjusted, verdict.classification, verdict.near_duplicate.as_ref());

        ImageRecord {
            image: image.name.clone(),
            path: image.path.clone(),
            classification: verdict.classification,
            handle: verdict.handle,
            confidence: adjusted.confidence,
            method: adjusted.method,
            flagged_for_review: adjusted.flagged_for_review,
            near_duplicate: verdict.near_duplicate,
            quality,
            primary,
            secondary: secondary.candidate().cloned(),
            secondary_unavailable: secondary.error().is_some(),
            edit_distance: adjusted.edit_distance,
            persist: verdict.persist,
            error: error.map(|e| e.to_string()),
            elapsed_ms,
        }
    }

    /// Recorded score first, then a measurement of the image file, else 1.0.
    fn resolve_quality(&self, image: &ImageInput) -> f32 {
        if let Some(q) = image.quality {
            return q;
        }
        let Some(path) = &image.path else {
            return 1.0;
        };
        match quality::measure_path(path) {
            Ok(measured) => measured.score(),
            Err(err) => {
                warn!("{}: could not measure quality of {}: {:#}", image.name, path.display(), err);
                1.0
            }
        }
    }
}

fn log_outcome(
    image: &ImageInput,
    result: &FinalResult,
    classification: Classification,
    near: Option<&NearDuplicate>,
) {
    match (classification, near) {
        (Classification::Failed, _) => info!("{}: no handle extracted", image.name),
        (_, Some(near)) => info!(
            "{}: '{}' {} ({:.0}%), similar to '{}'",
            image.name,
            result.text,
            classification,
            result.confidence * 100.0,
            near.existing
        ),
        _ => info!(
            "{}: '{}' {} ({:.0}%, {})",
            image.name,
            result.text,
            classification,
            result.confidence * 100.0,
            result.method
        ),
    }
}

/// Aggregate statistics for a finished (or cancelled) batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub dropped: usize,
    pub counts: BTreeMap<Classification, usize>,
    pub near_duplicates: usize,
    pub secondary_unavailable: usize,
    pub methods: BTreeMap<ConsensusMethod, usize>,
    /// Mean final confidence over images that produced a handle.
    pub average_confidence: f32,
    pub average_quality: f32,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    pub fn from_records(records: &[ImageRecord], total: usize, dropped: usize, elapsed_ms: u64) -> Self {
        let mut summary = Self {
            total,
            processed: records.len(),
            dropped,
            elapsed_ms,
            ..Self::default()
        };

        let mut confidence_sum = 0.0;
        let mut with_handle = 0;
        let mut quality_sum = 0.0;
        for record in records {
            *summary.counts.entry(record.classification).or_default() += 1;
            *summary.methods.entry(record.method).or_default() += 1;
            if record.near_duplicate.is_some() {
                summary.near_duplicates += 1;
            }
            if record.secondary_unavailable {
                summary.secondary_unavailable += 1;
            }
            if record.method != ConsensusMethod::Failed {
                confidence_sum += record.confidence;
                with_handle += 1;
            }
            quality_sum += record.quality;
        }
        if with_handle > 0 {
            summary.average_confidence = confidence_sum / with_handle as f32;
        }
        if !records.is_empty() {
            summary.average_quality = quality_sum / records.len() as f32;
        }
        summary
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    pub fn verified(&self) -> usize {
        self.count(Classification::VerifiedHigh) + self.count(Classification::VerifiedMedium)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    /// One record per processed image, in input order.
    pub records: Vec<ImageRecord>,
    pub summary: BatchSummary,
}

/// Process `images` on a fixed-size worker pool.
///
/// Each worker thread builds its own primary engine through `make_engine`
/// the first time it picks up an image, and keeps it for the rest of the
/// batch. The secondary engine is shared through `gate`. Once `quit` is
/// set, images not yet started are counted as dropped and skipped.
pub fn run_batch<P, F, S>(
    pipeline: &Pipeline,
    images: &[ImageInput],
    make_engine: F,
    gate: &SecondaryGate<S>,
    index: &DuplicateIndex,
    quit: &AtomicBool,
) -> Result<BatchOutput>
where
    P: PrimaryEngine + Send,
    F: Fn() -> Result<P> + Sync + Send,
    S: SecondaryEngine + Send,
{
    let workers = pipeline.settings.run.workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("extract-worker-{}", i))
        .build()?;

    info!(
        "Processing {} images with {} workers (secondary engine {})",
        images.len(),
        workers,
        if gate.is_enabled() { "enabled" } else { "disabled" }
    );

    let start = Instant::now();
    let dropped = AtomicUsize::new(0);
    // one lazily built engine per pool thread, indexed by thread
    let engines: Vec<Mutex<Option<Result<P>>>> = (0..workers).map(|_| Mutex::new(None)).collect();
    let results: Vec<Option<ImageRecord>> = pool.install(|| {
        images
            .par_iter()
            .map(|image| {
                if quit.load(Ordering::Relaxed) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                let slot = rayon::current_thread_index().and_then(|i| engines.get(i));
                let mut local = None;
                let mut guard = slot.map(|m| m.lock().unwrap_or_else(PoisonError::into_inner));
                let engine = match guard.as_deref_mut() {
                    Some(slot) => slot.get_or_insert_with(&make_engine),
                    None => local.insert(make_engine()),
                };
                Some(match engine {
                    Ok(engine) => pipeline.process_image(engine, gate, index, image),
                    Err(err) => {
                        warn!("{}: {:#}", image.name, err);
                        ImageRecord::engine_failure(image, err)
                    }
                })
            })
            .collect()
    });

    let records: Vec<ImageRecord> = results.into_iter().flatten().collect();
    let dropped = dropped.into_inner();
    if dropped > 0 {
        warn!("Cancelled: {} images were not processed", dropped);
    }

    let summary = BatchSummary::from_records(
        &records,
        images.len(),
        dropped,
        start.elapsed().as_millis() as u64,
    );
    info!(
        "Processed {} of {} images in {:.1}s: {} verified, {} review, {} duplicate, {} failed",
        summary.processed,
        summary.total,
        summary.elapsed_ms as f64 / 1000.0,
        summary.verified(),
        summary.count(Classification::Review),
        summary.count(Classification::Duplicate),
        summary.count(Classification::Failed),
    );

    Ok(BatchOutput { records, summary })
}
