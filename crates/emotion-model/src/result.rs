//! Per-frame classification results and the externally visible output.

use serde::{Deserialize, Serialize};

use crate::emotion::Emotion;

/// Unix epoch seconds.
pub type EpochSecs = i64;

/// Raw verdict for a single frame, before temporal smoothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub label: Emotion,

    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,

    /// Whether a face region drove the statistics.
    pub face_found: bool,
}

impl ClassificationResult {
    /// Build a result, clamping `confidence` into `[0.0, 1.0]`.
    ///
    /// NaN confidence becomes `0.0`.
    pub fn new(label: Emotion, confidence: f64, face_found: bool) -> Self {
        Self {
            label,
            confidence: clamp_confidence(confidence),
            face_found,
        }
    }

    /// Same result with a different `face_found` flag.
    pub fn with_face_found(self, face_found: bool) -> Self {
        Self { face_found, ..self }
    }
}

/// The result returned to callers after smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceOutput {
    pub emotion: Emotion,
    pub confidence: f64,
    pub timestamp: EpochSecs,
    pub face_found: bool,
}

impl InferenceOutput {
    /// The degraded output used whenever any stage fails.
    pub fn fallback(timestamp: EpochSecs) -> Self {
        Self {
            emotion: Emotion::Neutral,
            confidence: 0.0,
            timestamp,
            face_found: false,
        }
    }

    /// Combine a smoothed label with the confidence and face flag of the raw result.
    pub fn from_smoothed(label: Emotion, raw: &ClassificationResult, timestamp: EpochSecs) -> Self {
        Self {
            emotion: label,
            confidence: clamp_confidence(raw.confidence),
            timestamp,
            face_found: raw.face_found,
        }
    }
}

/// Clamp into `[0.0, 1.0]`, mapping NaN to `0.0`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
