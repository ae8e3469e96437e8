// Markdown handle lists, run report and diagnostics

use crate::classify::Classification;
use crate::consts::{DIAGNOSTICS_FILE, REPORT_FILE, REVIEW_FILE, VERIFIED_FILE};
use crate::pipeline::{BatchSummary, ImageRecord};
use anyhow::{Context, Result};
use chrono::Local;
use log::{debug, info};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendStats {
    pub verified: usize,
    pub review: usize,
}

#[derive(Debug, Clone)]
pub struct HandleStore {
    dir: PathBuf,
    profile_url_base: String,
}

impl HandleStore {
    pub fn open(dir: impl Into<PathBuf>, profile_url_base: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            profile_url_base: profile_url_base.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn profile_url(&self, handle: &str) -> String {
        format!("{}/{}/", self.profile_url_base.trim_end_matches('/'), handle)
    }

    /// Every handle already present in either list.
    pub fn load_existing(&self) -> Result<Vec<String>> {
        let mut handles = Vec::new();
        for file in [VERIFIED_FILE, REVIEW_FILE] {
            let path = self.dir.join(file);
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            handles.extend(content.lines().filter_map(entry_handle));
        }
        info!("Loaded {} existing handles from {}", handles.len(), self.dir.display());
        Ok(handles)
    }

    /// Append this run's accepted handles to the two lists, continuing
    /// their numbering.
    pub fn append(&self, records: &[ImageRecord]) -> Result<AppendStats> {
        let verified: Vec<&ImageRecord> = records
            .iter()
            .filter(|r| r.persist && r.classification.is_verified())
            .collect();
        let review: Vec<&ImageRecord> = records
            .iter()
            .filter(|r| r.persist && r.classification == Classification::Review)
            .collect();

        self.append_entries(VERIFIED_FILE, "Verified Handles", &verified, |n, r| {
            format!(
                "{}. {} - {} [{} {:.0}%]\n",
                n,
                r.handle,
                self.profile_url(&r.handle),
                tier_label(r.classification),
                r.confidence * 100.0
            )
        })?;
        self.append_entries(REVIEW_FILE, "Needs Review", &review, |n, r| self.review_entry(n, r))?;

        Ok(AppendStats {
            verified: verified.len(),
            review: review.len(),
        })
    }

    fn review_entry(&self, n: usize, record: &ImageRecord) -> String {
        let mut entry = format!("{}. **{}** - {}\n", n, record.handle, self.profile_url(&record.handle));
        let _ = writeln!(entry, "   - Image: {}", record.image);
        let _ = writeln!(
            entry,
            "   - Confidence: {:.0}% ({})",
            record.confidence * 100.0,
            record.method
        );
        let _ = writeln!(entry, "   - Quality: {:.2}", record.quality);
        if let Some(near) = &record.near_duplicate {
            let _ = writeln!(
                entry,
                "   - Similar to: {} (distance {})",
                near.existing, near.distance
            );
        }
        entry
    }

    fn append_entries(
        &self,
        file: &str,
        title: &str,
        records: &[&ImageRecord],
        render: impl Fn(usize, &ImageRecord) -> String,
    ) -> Result<()> {
        let path = self.dir.join(file);
        let existing = if path.exists() {
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?
        } else {
            String::new()
        };
        if records.is_empty() && !existing.is_empty() {
            return Ok(());
        }

        // entries start at the first numbered line; the header above is rebuilt
        let body_start = existing
            .lines()
            .position(|line| entry_number(line).is_some())
            .unwrap_or(usize::MAX);
        let body: Vec<&str> = existing.lines().skip(body_start).collect();
        let count = body.iter().filter(|line| entry_number(line).is_some()).count();

        let mut out = format!(
            "# {}\n\n**Last Updated:** {}\n**Total:** {}\n\n",
            title,
            Local::now().format(TIMESTAMP_FORMAT),
            count + records.len()
        );
        let body = body.join("\n");
        let body = body.trim_end();
        if !body.is_empty() {
            out.push_str(body);
            out.push('\n');
        }
        for (i, record) in records.iter().enumerate() {
            out.push_str(&render(count + i + 1, record));
        }

        fs::write(&path, out).with_context(|| format!("failed to write {}", path.display()))?;
        debug!("Appended {} entries to {}", records.len(), path.display());
        Ok(())
    }

    pub fn write_report(&self, summary: &BatchSummary) -> Result<PathBuf> {
        let path = self.dir.join(REPORT_FILE);
        fs::write(&path, render_report(summary))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn write_diagnostics(&self, summary: &BatchSummary, records: &[ImageRecord]) -> Result<PathBuf> {
        #[derive(Serialize)]
        struct Diagnostics<'a> {
            generated: String,
            summary: &'a BatchSummary,
            records: &'a [ImageRecord],
        }

        let path = self.dir.join(DIAGNOSTICS_FILE);
        let json = serde_json::to_string_pretty(&Diagnostics {
            generated: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            summary,
            records,
        })?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

fn tier_label(classification: Classification) -> &'static str {
    match classification {
        Classification::VerifiedHigh => "HIGH",
        Classification::VerifiedMedium => "MEDIUM",
        _ => "REVIEW",
    }
}

/// `Some(n)` for lines of the form `n. ...`.
fn entry_number(line: &str) -> Option<usize> {
    let (number, _) = line.split_once(". ")?;
    number.parse().ok()
}

/// The handle of a list entry, in either list format.
fn entry_handle(line: &str) -> Option<String> {
    entry_number(line)?;
    let (_, rest) = line.split_once(". ")?;
    let handle = rest.split(" - ").next()?.trim().trim_matches('*');
    (!handle.is_empty()).then(|| handle.to_string())
}

fn render_report(summary: &BatchSummary) -> String {
    let mut out = String::new();
    let percent = |n: usize| {
        if summary.processed == 0 {
            0.0
        } else {
            n as f64 * 100.0 / summary.processed as f64
        }
    };

    let _ = writeln!(out, "# Extraction Report\n");
    let _ = writeln!(out, "**Generated:** {}\n", Local::now().format(TIMESTAMP_FORMAT));

    let _ = writeln!(out, "## Summary\n");
    let _ = writeln!(out, "- Images: {}", summary.total);
    let _ = writeln!(out, "- Processed: {}", summary.processed);
    if summary.dropped > 0 {
        let _ = writeln!(out, "- Dropped (cancelled): {}", summary.dropped);
    }
    let _ = writeln!(out, "- Elapsed: {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    if summary.processed > 0 {
        let _ = writeln!(
            out,
            "- Average time per image: {:.0}ms",
            summary.elapsed_ms as f64 / summary.processed as f64
        );
    }
    let _ = writeln!(out, "- Average confidence: {:.1}%", summary.average_confidence * 100.0);
    let _ = writeln!(out, "- Average quality: {:.2}", summary.average_quality);
    let _ = writeln!(out, "- Near duplicates: {}", summary.near_duplicates);
    let _ = writeln!(out, "- Secondary engine unavailable: {}\n", summary.secondary_unavailable);

    let _ = writeln!(out, "## Classification\n");
    let _ = writeln!(out, "| Classification | Count | Share |");
    let _ = writeln!(out, "|---|---|---|");
    for classification in [
        Classification::VerifiedHigh,
        Classification::VerifiedMedium,
        Classification::Review,
        Classification::Duplicate,
        Classification::Failed,
    ] {
        let n = summary.count(classification);
        let _ = writeln!(out, "| {} | {} | {:.1}% |", classification, n, percent(n));
    }

    let _ = writeln!(out, "\n## Consensus Methods\n");
    let _ = writeln!(out, "| Method | Count | Share |");
    let _ = writeln!(out, "|---|---|---|");
    for (method, &n) in &summary.methods {
        let _ = writeln!(out, "| {} | {} | {:.1}% |", method, n, percent(n));
    }
    out
}
