//! Learned-model classifier hook.
//!
//! A softmax-linear model over a downscaled region, stored as JSON:
//!
//! ```json
//! { "input_size": 48, "labels": ["angry", "happy", ...],
//!   "weights": [[...], ...], "bias": [...] }
//! ```
//!
//! `weights` has one row per label, each `input_size * input_size` long.
//! Labels may use any vocabulary; they are mapped onto the four canonical
//! emotions with [`Emotion::from_label`].

use std::path::Path;

use image::imageops::{self, FilterType};
use moodlens_common::{MoodlensError, MoodlensResult};
use moodlens_emotion_model::{ClassificationResult, Emotion};
use serde::{Deserialize, Serialize};

use crate::classify::EmotionClassifier;
use crate::normalize::NormalizedRegion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    /// Side length the region is resized to before flattening.
    pub input_size: u32,
    pub labels: Vec<String>,
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// Classifier backed by a [`LinearModel`] loaded once at startup.
#[derive(Debug, Clone)]
pub struct LinearModelClassifier {
    model: LinearModel,
    emotions: Vec<Emotion>,
}

impl LinearModelClassifier {
    pub fn load(path: &Path) -> MoodlensResult<Self> {
        if !path.exists() {
            return Err(MoodlensError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let model: LinearModel = serde_json::from_str(&content)
            .map_err(|e| MoodlensError::model(format!("{}: {e}", path.display())))?;
        Self::from_model(model)
    }

    /// Validate shapes and precompute the label mapping.
    pub fn from_model(model: LinearModel) -> MoodlensResult<Self> {
        let inputs = (model.input_size as usize).pow(2);
        if inputs == 0 {
            return Err(MoodlensError::model("input_size must be positive"));
        }
        if model.labels.is_empty() {
            return Err(MoodlensError::model("model has no labels"));
        }
        if model.weights.len() != model.labels.len() || model.bias.len() != model.labels.len() {
            return Err(MoodlensError::model(format!(
                "expected {} weight rows and biases, got {} and {}",
                model.labels.len(),
                model.weights.len(),
                model.bias.len()
            )));
        }
        if let Some(i) = model.weights.iter().position(|row| row.len() != inputs) {
            return Err(MoodlensError::model(format!(
                "weight row {i} has {} values, expected {inputs}",
                model.weights[i].len()
            )));
        }
        if model
            .weights
            .iter()
            .flatten()
            .chain(&model.bias)
            .any(|v| !v.is_finite())
        {
            return Err(MoodlensError::model("model contains non-finite parameters"));
        }

        let emotions = model.labels.iter().map(|l| Emotion::from_label(l)).collect();
        Ok(Self { model, emotions })
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }

    /// Class probabilities in label order.
    pub fn predict(&self, region: &NormalizedRegion) -> MoodlensResult<Vec<f64>> {
        if region.is_empty() {
            return Err(MoodlensError::computation("cannot classify an empty region"));
        }
        let size = self.model.input_size;
        let resized = imageops::resize(region.pixels(), size, size, FilterType::Triangle);
        let input: Vec<f64> = resized.iter().map(|&v| v as f64 / 255.0).collect();

        let logits: Vec<f64> = self
            .model
            .weights
            .iter()
            .zip(&self.model.bias)
            .map(|(row, b)| row.iter().zip(&input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        Ok(softmax(&logits))
    }
}

impl EmotionClassifier for LinearModelClassifier {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn classify(&self, region: &NormalizedRegion) -> MoodlensResult<ClassificationResult> {
        let probs = self.predict(region)?;
        let (idx, &p) = probs
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, &f64)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| MoodlensError::computation("model produced no scores"))?;

        tracing::debug!(
            label = %self.model.labels[idx],
            probability = p,
            "Linear model decision"
        );
        Ok(ClassificationResult::new(self.emotions[idx], p, false))
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    /// Bright regions score "joy", dark ones "anger".
    fn brightness_model() -> LinearModel {
        LinearModel {
            input_size: 2,
            labels: vec!["joy".into(), "anger".into()],
            weights: vec![vec![1.0; 4], vec![-1.0; 4]],
            bias: vec![-2.0, 2.0],
        }
    }

    fn region(value: u8) -> NormalizedRegion {
        NormalizedRegion::from_gray(GrayImage::from_pixel(30, 30, Luma([value])))
    }

    #[test]
    fn test_bright_region_maps_to_happy() {
        let clf = LinearModelClassifier::from_model(brightness_model()).unwrap();
        let r = clf.classify(&region(255)).unwrap();
        assert_eq!(r.label, Emotion::Happy);
        assert!(r.confidence > 0.95);
    }

    #[test]
    fn test_dark_region_maps_to_frustrated() {
        let clf = LinearModelClassifier::from_model(brightness_model()).unwrap();
        let r = clf.classify(&region(0)).unwrap();
        assert_eq!(r.label, Emotion::Frustrated);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let clf = LinearModelClassifier::from_model(brightness_model()).unwrap();
        let probs = clf.predict(&region(128)).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_numeric_labels_fall_back_to_neutral() {
        let mut model = brightness_model();
        model.labels = vec!["0".into(), "1".into()];
        let clf = LinearModelClassifier::from_model(model).unwrap();
        assert_eq!(clf.classify(&region(255)).unwrap().label, Emotion::Neutral);
    }

    #[test]
    fn test_rejects_mismatched_shapes() {
        let mut model = brightness_model();
        model.weights[1].pop();
        assert!(matches!(
            LinearModelClassifier::from_model(model),
            Err(MoodlensError::Model { .. })
        ));

        let mut model = brightness_model();
        model.bias.push(0.0);
        assert!(LinearModelClassifier::from_model(model).is_err());

        let mut model = brightness_model();
        model.input_size = 0;
        assert!(LinearModelClassifier::from_model(model).is_err());
    }

    #[test]
    fn test_model_json_round_trip_shape() {
        let json = serde_json::to_string(&brightness_model()).unwrap();
        let parsed: LinearModel = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, brightness_model());
    }

    #[test]
    fn test_missing_model_file() {
        let err = LinearModelClassifier::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, MoodlensError::FileNotFound { .. }));
    }
}
