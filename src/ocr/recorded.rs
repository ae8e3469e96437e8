// Engines that replay reads recorded in a JSON manifest

use super::{ImageInput, PrimaryEngine, SecondaryEngine, score_secondary_read};
use crate::candidate::{Candidate, Fragment, Source};
use crate::text;
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSecondary {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestImage {
    pub name: String,
    #[serde(default)]
    pub path: Option<std::path::PathBuf>,
    #[serde(default)]
    pub quality: Option<f32>,
    #[serde(default)]
    pub variants: BTreeMap<Source, Vec<Fragment>>,
    #[serde(default)]
    pub secondary: Option<RecordedSecondary>,
    /// The secondary engine could not be reached for this image.
    #[serde(default)]
    pub secondary_unavailable: bool,
}

/// Reads captured ahead of time, one entry per image:
///
/// ```json
/// {
///   "images": [
///     {
///       "name": "a.png",
///       "path": "crops/a.png",
///       "variants": { "balanced": [{ "text": "user", "confidence": 0.9, "x": 1 }] },
///       "secondary": { "text": "user", "confidence": 0.95 }
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    pub images: Vec<ManifestImage>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl Manifest {
    pub fn new(images: Vec<ManifestImage>) -> Self {
        let mut manifest = Self {
            images,
            by_name: HashMap::new(),
        };
        manifest.reindex();
        manifest
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let mut manifest: Manifest = serde_json::from_str(raw)?;
        manifest.reindex();
        Ok(manifest)
    }

    /// Load a manifest, resolving relative image paths against its folder.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        let mut manifest = Self::from_json(&raw)
            .with_context(|| format!("failed to parse manifest {}", path.display()))?;

        if let Some(base) = path.parent() {
            for image in &mut manifest.images {
                if let Some(p) = &image.path {
                    if p.is_relative() {
                        image.path = Some(base.join(p));
                    }
                }
            }
        }
        Ok(manifest)
    }

    fn reindex(&mut self) {
        self.by_name = self
            .images
            .iter()
            .enumerate()
            .map(|(i, image)| (image.name.clone(), i))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&ManifestImage> {
        self.by_name.get(name).map(|&i| &self.images[i])
    }

    /// Work items in manifest order.
    pub fn inputs(&self) -> Vec<ImageInput> {
        self.images
            .iter()
            .map(|image| ImageInput {
                name: image.name.clone(),
                path: image.path.clone(),
                quality: image.quality,
            })
            .collect()
    }
}

/// Replays the variant reads of a manifest. Cheap to clone per worker.
#[derive(Debug, Clone)]
pub struct RecordedPrimaryEngine {
    manifest: Arc<Manifest>,
}

impl RecordedPrimaryEngine {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self { manifest }
    }
}

impl PrimaryEngine for RecordedPrimaryEngine {
    fn recognize_variant(&mut self, image: &ImageInput, variant: Source) -> Result<Vec<Fragment>> {
        let recorded = self
            .manifest
            .get(&image.name)
            .ok_or_else(|| anyhow!("no recorded reads for '{}'", image.name))?;
        Ok(recorded.variants.get(&variant).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedSecondaryEngine {
    manifest: Arc<Manifest>,
}

impl RecordedSecondaryEngine {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self { manifest }
    }
}

impl SecondaryEngine for RecordedSecondaryEngine {
    fn recognize(&mut self, image: &ImageInput) -> Result<Option<Candidate>> {
        let Some(recorded) = self.manifest.get(&image.name) else {
            return Ok(None);
        };
        if recorded.secondary_unavailable {
            bail!("engine did not respond for '{}'", image.name);
        }
        let Some(secondary) = &recorded.secondary else {
            return Ok(None);
        };

        Ok(match secondary.confidence {
            Some(confidence) => {
                text::clean(&secondary.text).map(|t| Candidate::new(t, confidence, Source::Secondary))
            }
            None => score_secondary_read(&secondary.text),
        })
    }
}
