//! Emotion classification strategies.
//!
//! The pipeline holds exactly one [`EmotionClassifier`], chosen at startup.
//! [`HeuristicClassifier`] is always available; a learned model can be
//! swapped in through the same trait (see [`crate::linear_model`]).

use moodlens_common::{MoodlensError, MoodlensResult};
use moodlens_emotion_model::{ClassificationResult, Emotion};

use crate::normalize::NormalizedRegion;

/// A strategy turning a normalized region into a raw classification.
///
/// Implementations report `face_found = false`; the pipeline sets the flag.
pub trait EmotionClassifier: Send + Sync {
    /// Short name for logs and diagnostics.
    fn name(&self) -> &'static str;

    fn classify(&self, region: &NormalizedRegion) -> MoodlensResult<ClassificationResult>;
}

/// Brightness and contrast of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStats {
    /// Arithmetic mean intensity.
    pub mean: f64,
    /// Population standard deviation of intensity.
    pub std_dev: f64,
}

impl RegionStats {
    pub fn compute(region: &NormalizedRegion) -> MoodlensResult<Self> {
        if region.is_empty() {
            return Err(MoodlensError::computation(
                "cannot compute statistics over an empty region",
            ));
        }
        let pixels = region.pixels();
        let n = pixels.len() as f64;

        let (sum, sum_sq) = pixels.iter().fold((0.0_f64, 0.0_f64), |(s, sq), &v| {
            let v = v as f64;
            (s + v, sq + v * v)
        });
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);

        let stats = Self {
            mean,
            std_dev: variance.sqrt(),
        };
        if !stats.mean.is_finite() || !stats.std_dev.is_finite() {
            return Err(MoodlensError::computation("non-finite region statistics"));
        }
        Ok(stats)
    }
}

/// Ordered threshold policy over [`RegionStats`].
///
/// The bands were tuned empirically and overlap; the first matching rule
/// wins and the constants are kept as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    /// The decision list. Pure function of `(mean, std_dev)`.
    pub fn decide(stats: RegionStats) -> (Emotion, f64) {
        let RegionStats { mean, std_dev: std } = stats;

        let (label, confidence): (Emotion, f64) = if mean >= 142.0 && std >= 18.0 {
            (Emotion::Happy, 0.72)
        } else if mean < 108.0 && std < 28.0 {
            (Emotion::Sad, 0.66)
        } else if std > 50.0 || (mean < 95.0 && std >= 24.0) {
            (Emotion::Frustrated, 0.64)
        } else if std < 9.5 || ((110.0..=145.0).contains(&mean) && std <= 24.0) {
            (Emotion::Neutral, 0.56)
        } else {
            (Emotion::Neutral, 0.5)
        };

        (label, confidence.clamp(0.0, 1.0))
    }
}

impl EmotionClassifier for HeuristicClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify(&self, region: &NormalizedRegion) -> MoodlensResult<ClassificationResult> {
        let stats = RegionStats::compute(region)?;
        let (label, confidence) = Self::decide(stats);
        tracing::debug!(
            mean = stats.mean,
            std_dev = stats.std_dev,
            %label,
            confidence,
            "Heuristic decision"
        );
        Ok(ClassificationResult::new(label, confidence, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use proptest::prelude::*;

    /// Half the pixels at `mean - spread`, half at `mean + spread`:
    /// mean and population std are exactly `mean` and `spread`.
    fn two_tone(mean: u8, spread: u8) -> NormalizedRegion {
        let (lo, hi) = (mean - spread, mean + spread);
        NormalizedRegion::from_gray(GrayImage::from_fn(20, 10, |x, _| {
            Luma([if x % 2 == 0 { lo } else { hi }])
        }))
    }

    fn stats(mean: f64, std_dev: f64) -> RegionStats {
        RegionStats { mean, std_dev }
    }

    #[test]
    fn test_two_tone_statistics_are_exact() {
        let s = RegionStats::compute(&two_tone(200, 40)).unwrap();
        assert!((s.mean - 200.0).abs() < 1e-9);
        assert!((s.std_dev - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_each_rule_fires() {
        let cases = [
            (stats(200.0, 40.0), Emotion::Happy, 0.72),
            (stats(142.0, 18.0), Emotion::Happy, 0.72),
            (stats(80.0, 10.0), Emotion::Sad, 0.66),
            (stats(130.0, 60.0), Emotion::Frustrated, 0.64),
            (stats(90.0, 30.0), Emotion::Frustrated, 0.64),
            (stats(200.0, 5.0), Emotion::Neutral, 0.56),
            (stats(120.0, 20.0), Emotion::Neutral, 0.56),
            (stats(100.0, 40.0), Emotion::Neutral, 0.5),
        ];
        for (s, label, conf) in cases {
            assert_eq!(HeuristicClassifier::decide(s), (label, conf), "{s:?}");
        }
    }

    #[test]
    fn test_rule_order_resolves_overlaps() {
        // Matches both the sad and the low-variance neutral bands.
        assert_eq!(HeuristicClassifier::decide(stats(60.0, 5.0)).0, Emotion::Sad);
        // Matches both happy and the mid-range neutral band.
        assert_eq!(HeuristicClassifier::decide(stats(144.0, 20.0)).0, Emotion::Happy);
        // Matches both sad and the dark-textured frustrated band.
        assert_eq!(HeuristicClassifier::decide(stats(90.0, 25.0)).0, Emotion::Sad);
    }

    #[test]
    fn test_gap_falls_to_default_neutral() {
        // 108 <= mean < 110 with moderate std matches no rule.
        assert_eq!(
            HeuristicClassifier::decide(stats(109.0, 20.0)),
            (Emotion::Neutral, 0.5)
        );
    }

    #[test]
    fn test_empty_region_is_computation_error() {
        let err = HeuristicClassifier
            .classify(&NormalizedRegion::from_gray(GrayImage::new(0, 0)))
            .unwrap_err();
        assert!(matches!(err, MoodlensError::Computation { .. }));
    }

    #[test]
    fn test_classify_reports_no_face() {
        let r = HeuristicClassifier.classify(&two_tone(200, 40)).unwrap();
        assert_eq!((r.label, r.confidence, r.face_found), (Emotion::Happy, 0.72, false));
    }

    proptest! {
        #[test]
        fn prop_decision_is_pure_function_of_stats(mean in 0.0f64..=255.0, std in 0.0f64..=128.0) {
            let s = stats(mean, std);
            let first = HeuristicClassifier::decide(s);
            prop_assert_eq!(first, HeuristicClassifier::decide(s));
            prop_assert!((0.0..=1.0).contains(&first.1));
        }

        #[test]
        fn prop_region_classification_matches_decision(
            (mean, spread) in (0u8..=64).prop_flat_map(|s| (s..=(255 - s), Just(s)))
        ) {
            let region = two_tone(mean, spread);
            let result = HeuristicClassifier.classify(&region).unwrap();
            let expected = HeuristicClassifier::decide(stats(mean as f64, spread as f64));
            prop_assert_eq!((result.label, result.confidence), expected);
        }

        #[test]
        fn prop_bright_textured_regions_are_happy(mean in 142u8..=191, spread in 18u8..=50) {
            prop_assume!(mean as u16 + spread as u16 <= 255);
            prop_assume!(mean >= spread);
            let result = HeuristicClassifier.classify(&two_tone(mean, spread)).unwrap();
            prop_assert_eq!(result.label, Emotion::Happy);
            prop_assert_eq!(result.confidence, 0.72);
        }
    }
}
