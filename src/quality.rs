// Image quality scoring and the confidence penalty derived from it

use crate::config::QualityConfig;
use crate::consensus::FinalResult;
use anyhow::Result;
use image::GrayImage;
use log::debug;
use std::path::Path;

/// Pull confidence down for results read from a poor image.
///
/// Quality at or above the floor never changes the result; below it the
/// penalty grows linearly with the deficit up to `max_penalty`.
pub fn adjust(mut result: FinalResult, quality: f32, config: &QualityConfig) -> FinalResult {
    let quality = if quality.is_nan() { 1.0 } else { quality.clamp(0.0, 1.0) };
    if quality >= config.floor || config.floor <= 0.0 {
        return result;
    }

    let deficit = (config.floor - quality) / config.floor;
    let penalty = (deficit * config.max_penalty).min(config.max_penalty);
    let original = result.confidence;
    result.confidence = (original - penalty).clamp(0.0, original);
    debug!(
        "Quality {:.2} lowered confidence of '{}' from {:.2} to {:.2}",
        quality, result.text, original, result.confidence
    );
    result
}

/// Sharpness, contrast and brightness of a grayscale crop, combined into
/// one score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageQuality {
    pub sharpness: f32,
    pub contrast: f32,
    pub brightness: f32,
}

impl ImageQuality {
    pub fn score(&self) -> f32 {
        (self.sharpness * 0.4 + self.contrast * 0.4 + self.brightness * 0.2).clamp(0.0, 1.0)
    }
}

pub fn measure(img: &GrayImage) -> ImageQuality {
    let (width, height) = img.dimensions();
    let pixel_count = (width as f64) * (height as f64);
    if pixel_count == 0.0 {
        return ImageQuality {
            sharpness: 0.0,
            contrast: 0.0,
            brightness: 0.0,
        };
    }

    let (sum, sum_sq) = img.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p.0[0] as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / pixel_count;
    let std_dev = (sum_sq / pixel_count - mean * mean).max(0.0).sqrt();

    ImageQuality {
        sharpness: (laplacian_variance(img) / 500.0).min(1.0) as f32,
        contrast: (std_dev / 60.0).min(1.0) as f32,
        brightness: (1.0 - (mean - 128.0).abs() / 128.0) as f32,
    }
}

pub fn measure_path(path: &Path) -> Result<ImageQuality> {
    let img = image::open(path)?.to_luma8();
    Ok(measure(&img))
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
fn laplacian_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let at = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;

    let mut count = 0.0;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            count += 1.0;
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusMethod;
    use image::Luma;

    fn result(confidence: f32) -> FinalResult {
        FinalResult {
            text: "handle".into(),
            confidence,
            method: ConsensusMethod::PrimaryOnly,
            ..FinalResult::failed()
        }
    }

    #[test]
    fn good_quality_never_raises_confidence() {
        let config = QualityConfig::default();
        for q in [0.5, 0.7, 1.0, 3.0] {
            assert_eq!(adjust(result(0.6), q, &config).confidence, 0.6);
        }
    }

    #[test]
    fn penalty_is_linear_and_capped() {
        let config = QualityConfig::default();
        let half = adjust(result(0.9), 0.25, &config).confidence;
        assert!((half - 0.8).abs() < 1e-5);
        let worst = adjust(result(0.9), 0.0, &config).confidence;
        assert!((worst - 0.7).abs() < 1e-5);
        assert_eq!(adjust(result(0.1), 0.0, &config).confidence, 0.0);
    }

    #[test]
    fn flat_image_scores_low_and_checkerboard_high() {
        let flat = GrayImage::from_pixel(32, 16, Luma([128]));
        let q = measure(&flat);
        assert_eq!(q.sharpness, 0.0);
        assert_eq!(q.contrast, 0.0);
        assert!((q.score() - 0.2).abs() < 1e-5);

        let checker = GrayImage::from_fn(32, 16, |x, y| {
            if (x + y) % 2 == 0 { Luma([0]) } else { Luma([255]) }
        });
        assert!(measure(&checker).score() > 0.75);
    }
}
