//! Face localization and padded cropping.

use image::GrayImage;
use moodlens_common::{DetectorConfig, ScanParams};

use crate::cascade::{HaarCascade, ObjectDetector, Rect};

/// A detected face and the margin-padded crop derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaceRegion {
    /// Rectangle reported by the detector.
    pub face: Rect,
    /// `face` grown by the margin on every side, clamped to the image.
    pub crop: Rect,
}

/// Margin policy: `max(min_px, floor(ratio * max(width, height)))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMargin {
    pub ratio: f64,
    pub min_px: u32,
}

impl Default for FaceMargin {
    fn default() -> Self {
        Self {
            ratio: 0.15,
            min_px: 10,
        }
    }
}

impl FaceMargin {
    pub fn pixels(&self, face: &Rect) -> u32 {
        let scaled = (self.ratio * face.width.max(face.height) as f64).floor() as u32;
        scaled.max(self.min_px)
    }
}

/// Grow `face` by the margin and clamp it to a `width` x `height` image.
///
/// The result always lies within `[0, width) x [0, height)`.
pub fn padded_crop(face: &Rect, margin: &FaceMargin, width: u32, height: u32) -> Rect {
    let pad = margin.pixels(face);
    let x0 = face.x.saturating_sub(pad).min(width);
    let y0 = face.y.saturating_sub(pad).min(height);
    let x1 = face.right().saturating_add(pad).min(width);
    let y1 = face.bottom().saturating_add(pad).min(height);
    Rect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
}

/// Largest rectangle by area; ties go to the earliest.
pub fn largest(rects: &[Rect]) -> Option<Rect> {
    rects
        .iter()
        .copied()
        .fold(None, |best: Option<Rect>, r| match best {
            Some(b) if b.area() >= r.area() => Some(b),
            _ => Some(r),
        })
}

/// Finds the most prominent frontal face in a luma image.
pub struct FaceLocator {
    detector: Option<Box<dyn ObjectDetector>>,
    params: ScanParams,
    margin: FaceMargin,
}

impl FaceLocator {
    pub fn new(detector: Box<dyn ObjectDetector>, params: ScanParams, margin: FaceMargin) -> Self {
        Self {
            detector: Some(detector),
            params,
            margin,
        }
    }

    /// A locator that never finds a face; the pipeline then uses the whole frame.
    pub fn disabled() -> Self {
        Self {
            detector: None,
            params: ScanParams::face_defaults(),
            margin: FaceMargin::default(),
        }
    }

    /// Build from config, degrading to [`FaceLocator::disabled`] when the cascade
    /// cannot be loaded. The failure is logged once here, never per frame.
    pub fn from_config(config: &DetectorConfig) -> Self {
        let margin = FaceMargin {
            ratio: config.face_margin_ratio,
            min_px: config.face_margin_min_px,
        };
        match config.face_cascade.as_deref().map(HaarCascade::load) {
            Some(Ok(cascade)) => {
                tracing::info!(stages = cascade.stage_count(), "Face cascade loaded");
                Self::new(Box::new(cascade), config.face_scan, margin)
            }
            Some(Err(e)) => {
                tracing::warn!("Face detection disabled: {e}");
                Self {
                    margin,
                    ..Self::disabled()
                }
            }
            None => {
                tracing::info!("Face detection disabled: no cascade configured");
                Self {
                    margin,
                    ..Self::disabled()
                }
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    /// Locate the largest face, or `None` when there is none or no detector.
    pub fn locate(&self, gray: &GrayImage) -> Option<FaceRegion> {
        let detector = self.detector.as_ref()?;
        let candidates = detector.detect(gray, &self.params);
        let face = largest(&candidates)?;
        let crop = padded_crop(&face, &self.margin, gray.width(), gray.height());
        if crop.width == 0 || crop.height == 0 {
            return None;
        }
        tracing::debug!(
            candidates = candidates.len(),
            ?face,
            ?crop,
            "Face located"
        );
        Some(FaceRegion { face, crop })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    struct Fixed(Vec<Rect>);

    impl ObjectDetector for Fixed {
        fn detect(&self, _gray: &GrayImage, _params: &ScanParams) -> Vec<Rect> {
            self.0.clone()
        }
    }

    fn locator(rects: Vec<Rect>) -> FaceLocator {
        FaceLocator::new(
            Box::new(Fixed(rects)),
            ScanParams::face_defaults(),
            FaceMargin::default(),
        )
    }

    #[test]
    fn test_margin_minimum_applies_to_small_faces() {
        let m = FaceMargin::default();
        assert_eq!(m.pixels(&Rect::new(0, 0, 40, 30)), 10);
        assert_eq!(m.pixels(&Rect::new(0, 0, 100, 120)), 18);
    }

    #[test]
    fn test_padded_crop_interior() {
        let crop = padded_crop(&Rect::new(100, 100, 100, 100), &FaceMargin::default(), 640, 480);
        assert_eq!(crop, Rect::new(85, 85, 130, 130));
    }

    #[test]
    fn test_padded_crop_clamps_at_edges() {
        let (w, h) = (320, 240);
        let faces = [
            Rect::new(0, 0, 50, 50),
            Rect::new(300, 220, 20, 20),
            Rect::new(5, 230, 100, 10),
            Rect::new(0, 0, 320, 240),
        ];
        for face in faces {
            let crop = padded_crop(&face, &FaceMargin::default(), w, h);
            assert!(crop.right() <= w && crop.bottom() <= h, "{crop:?}");
            assert!(crop.x <= face.x && crop.y <= face.y);
        }
        let corner = padded_crop(&faces[1], &FaceMargin::default(), w, h);
        assert_eq!(corner, Rect::new(290, 210, 30, 30));
    }

    #[test]
    fn test_largest_prefers_area_then_order() {
        let rects = [
            Rect::new(0, 0, 10, 40),
            Rect::new(5, 5, 20, 20),
            Rect::new(9, 9, 40, 10),
        ];
        assert_eq!(largest(&rects), Some(Rect::new(0, 0, 10, 40)));
        assert_eq!(largest(&[]), None);
    }

    #[test]
    fn test_locate_picks_largest_face() {
        let gray = GrayImage::from_pixel(200, 200, Luma([90]));
        let loc = locator(vec![Rect::new(10, 10, 20, 20), Rect::new(60, 60, 50, 50)]);
        let region = loc.locate(&gray).unwrap();
        assert_eq!(region.face, Rect::new(60, 60, 50, 50));
        assert_eq!(region.crop, Rect::new(50, 50, 70, 70));
    }

    #[test]
    fn test_disabled_locator_finds_nothing() {
        let gray = GrayImage::from_pixel(50, 50, Luma([90]));
        let loc = FaceLocator::disabled();
        assert!(!loc.is_available());
        assert_eq!(loc.locate(&gray), None);
    }

    #[test]
    fn test_missing_cascade_degrades_to_disabled() {
        let config = DetectorConfig {
            face_cascade: Some("/nonexistent/face.xml".into()),
            ..DetectorConfig::default()
        };
        assert!(!FaceLocator::from_config(&config).is_available());
    }
}
