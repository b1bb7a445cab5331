//! Smile gating.
//!
//! Smile-shaped detections have a low false-positive rate, so a single hit
//! short-circuits classification to a confident "happy". This is an
//! override, not a blend with the threshold classifier.

use moodlens_common::{DetectorConfig, ScanParams};
use moodlens_emotion_model::{ClassificationResult, Emotion};

use crate::cascade::{HaarCascade, ObjectDetector};
use crate::normalize::NormalizedRegion;

/// Confidence a smile verdict starts from.
pub const SMILE_BASE_CONFIDENCE: f64 = 0.85;

/// Bonus added on top of the base; the sum is clamped to 1.0.
pub const SMILE_BONUS: f64 = 0.35;

/// Runs a smile cascade over a normalized face region.
pub struct SmileDetector {
    detector: Option<Box<dyn ObjectDetector>>,
    params: ScanParams,
}

impl SmileDetector {
    pub fn new(detector: Box<dyn ObjectDetector>, params: ScanParams) -> Self {
        Self {
            detector: Some(detector),
            params,
        }
    }

    pub fn disabled() -> Self {
        Self {
            detector: None,
            params: ScanParams::smile_defaults(),
        }
    }

    /// Build from config; a missing or broken cascade disables smile gating.
    pub fn from_config(config: &DetectorConfig) -> Self {
        match config.smile_cascade.as_deref().map(HaarCascade::load) {
            Some(Ok(cascade)) => {
                tracing::info!(stages = cascade.stage_count(), "Smile cascade loaded");
                Self::new(Box::new(cascade), config.smile_scan)
            }
            Some(Err(e)) => {
                tracing::warn!("Smile gating disabled: {e}");
                Self::disabled()
            }
            None => Self::disabled(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    /// Whether at least one smile candidate is present.
    pub fn detect(&self, region: &NormalizedRegion) -> bool {
        let Some(detector) = self.detector.as_ref() else {
            return false;
        };
        if region.is_empty() {
            return false;
        }
        let smiles = detector.detect(region.pixels(), &self.params);
        tracing::debug!(candidates = smiles.len(), "Smile scan");
        !smiles.is_empty()
    }

    /// The short-circuit verdict when [`SmileDetector::detect`] fires.
    pub fn verdict(face_found: bool) -> ClassificationResult {
        ClassificationResult::new(
            Emotion::Happy,
            (SMILE_BASE_CONFIDENCE + SMILE_BONUS).min(1.0),
            face_found,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{Rect, EDGE_CASCADE_XML};
    use image::{GrayImage, Luma};

    #[test]
    fn test_verdict_is_clamped_happy() {
        let v = SmileDetector::verdict(true);
        assert_eq!(v.label, Emotion::Happy);
        assert_eq!(v.confidence, 1.0);
        assert!(v.face_found);
    }

    #[test]
    fn test_disabled_detects_nothing() {
        let region = NormalizedRegion::from_gray(GrayImage::from_pixel(40, 40, Luma([200])));
        assert!(!SmileDetector::disabled().detect(&region));
    }

    #[test]
    fn test_cascade_backed_detection() {
        let cascade = HaarCascade::from_xml(EDGE_CASCADE_XML).unwrap();
        let params = ScanParams {
            scale_factor: 1.1,
            min_neighbors: 0,
            min_size: None,
        };
        let detector = SmileDetector::new(Box::new(cascade), params);

        let edge = GrayImage::from_fn(40, 7, |x, _| Luma([if x < 20 { 0 } else { 255 }]));
        assert!(detector.detect(&NormalizedRegion::from_gray(edge)));

        let flat = GrayImage::from_pixel(40, 7, Luma([128]));
        assert!(!detector.detect(&NormalizedRegion::from_gray(flat)));
    }

    #[test]
    fn test_empty_region_never_smiles() {
        struct Always;
        impl ObjectDetector for Always {
            fn detect(&self, _: &GrayImage, _: &ScanParams) -> Vec<Rect> {
                vec![Rect::new(0, 0, 1, 1)]
            }
        }
        let detector = SmileDetector::new(Box::new(Always), ScanParams::smile_defaults());
        assert!(!detector.detect(&NormalizedRegion::from_gray(GrayImage::new(0, 0))));
    }
}
