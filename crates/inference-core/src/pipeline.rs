//! The per-request inference pipeline.
//!
//! ```text
//! payload -> decode -> luma -> face? -> crop -> normalize -> smile? -> classify -> smooth
//! ```
//!
//! Every stage before smoothing is invocation-local. The smoother is the only
//! shared state, so one [`EmotionPipeline`] can be wrapped in an `Arc` and
//! served from many threads.

use image::{imageops, RgbImage};
use moodlens_common::{
    unix_timestamp_secs, AppConfig, ClassifierConfig, ClassifierKind, MoodlensError,
    MoodlensResult,
};
use moodlens_emotion_model::{ClassificationResult, InferenceOutput, InferenceRequest, SmoothingKey};
use serde::Serialize;

use crate::classify::{EmotionClassifier, HeuristicClassifier};
use crate::decode::{luma_bt601, FrameDecoder};
use crate::face::FaceLocator;
use crate::linear_model::LinearModelClassifier;
use crate::normalize::RegionNormalizer;
use crate::smile::SmileDetector;
use crate::smoother::TemporalSmoother;

/// Which optional stages are live, as reported by `moodlens check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub face_detection: bool,
    pub smile_detection: bool,
    pub classifier: &'static str,
    pub smoothing_window: usize,
}

pub struct EmotionPipeline {
    decoder: FrameDecoder,
    faces: FaceLocator,
    normalizer: RegionNormalizer,
    smiles: SmileDetector,
    classifier: Box<dyn EmotionClassifier>,
    smoother: TemporalSmoother,
}

impl EmotionPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Construct every stage from configuration.
    ///
    /// Missing detector or model files disable the affected stage with one
    /// warning each; construction itself never fails.
    pub fn from_config(config: &AppConfig) -> Self {
        let pipeline = Self {
            decoder: FrameDecoder::new(),
            faces: FaceLocator::from_config(&config.detector),
            normalizer: RegionNormalizer::from_config(&config.normalization),
            smiles: SmileDetector::from_config(&config.detector),
            classifier: build_classifier(&config.classifier),
            smoother: TemporalSmoother::from_config(&config.smoothing),
        };
        tracing::info!(capabilities = ?pipeline.capabilities(), "Emotion pipeline ready");
        pipeline
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            face_detection: self.faces.is_available(),
            smile_detection: self.smiles.is_available(),
            classifier: self.classifier.name(),
            smoothing_window: self.smoother.window(),
        }
    }

    pub fn smoother(&self) -> &TemporalSmoother {
        &self.smoother
    }

    /// Drop the smoothing history of a finished session.
    pub fn end_session(&self, key: &SmoothingKey) -> bool {
        self.smoother.end_session(key)
    }

    /// Classify one decoded frame without touching the smoother.
    pub fn classify_frame(&self, frame: &RgbImage) -> MoodlensResult<ClassificationResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(MoodlensError::computation("frame has zero size"));
        }
        let gray = luma_bt601(frame);

        let face = self.faces.locate(&gray);
        let face_found = face.is_some();
        let pixels = match face {
            Some(region) => {
                let c = region.crop;
                imageops::crop_imm(&gray, c.x, c.y, c.width, c.height).to_image()
            }
            None => gray,
        };
        let region = self.normalizer.normalize(pixels);

        if face_found && self.smiles.detect(&region) {
            tracing::debug!("Smile detected, short-circuiting to happy");
            return Ok(SmileDetector::verdict(true));
        }

        let raw = self.classifier.classify(&region)?;
        Ok(raw.with_face_found(face_found))
    }

    /// Serve one request. Never fails: any stage error yields
    /// [`InferenceOutput::fallback`], which is not fed to the smoother.
    pub fn infer(&self, request: &InferenceRequest) -> InferenceOutput {
        self.infer_frame(&request.image, &request.smoothing_key())
    }

    /// Like [`EmotionPipeline::infer`] with the payload and key given directly.
    pub fn infer_frame(&self, image: &str, key: &SmoothingKey) -> InferenceOutput {
        let raw = self
            .decoder
            .decode(image)
            .and_then(|frame| self.classify_frame(&frame));
        self.finish(raw, key)
    }

    /// Like [`EmotionPipeline::infer_frame`] for encoded image bytes, e.g. a
    /// file read from disk.
    pub fn infer_bytes(&self, bytes: &[u8], key: &SmoothingKey) -> InferenceOutput {
        let raw = self
            .decoder
            .decode_bytes(bytes)
            .and_then(|frame| self.classify_frame(&frame));
        self.finish(raw, key)
    }

    fn finish(
        &self,
        raw: MoodlensResult<ClassificationResult>,
        key: &SmoothingKey,
    ) -> InferenceOutput {
        let timestamp = unix_timestamp_secs();
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Inference failed, returning neutral");
                return InferenceOutput::fallback(timestamp);
            }
        };

        let label = self.smoother.observe(key, raw.label);
        let output = InferenceOutput::from_smoothed(label, &raw, timestamp);
        tracing::info!(
            key = %key,
            raw = %raw.label,
            emotion = %output.emotion,
            confidence = output.confidence,
            face_found = output.face_found,
            "Inference complete"
        );
        output
    }
}

fn build_classifier(config: &ClassifierConfig) -> Box<dyn EmotionClassifier> {
    match (config.kind, config.model_path.as_deref()) {
        (ClassifierKind::Heuristic, _) => Box::new(HeuristicClassifier),
        (ClassifierKind::Linear, Some(path)) => match LinearModelClassifier::load(path) {
            Ok(model) => {
                tracing::info!(
                    path = %path.display(),
                    labels = model.model().labels.len(),
                    "Linear model loaded"
                );
                Box::new(model)
            }
            Err(e) => {
                tracing::warn!("Linear model unavailable, using heuristic classifier: {e}");
                Box::new(HeuristicClassifier)
            }
        },
        (ClassifierKind::Linear, None) => {
            tracing::warn!("No model path configured, using heuristic classifier");
            Box::new(HeuristicClassifier)
        }
    }
}

/// Assembles a pipeline stage by stage. Unset stages default to: no face
/// detector, default normalization, no smile detector, heuristic classifier,
/// default smoothing.
#[derive(Default)]
pub struct PipelineBuilder {
    faces: Option<FaceLocator>,
    normalizer: Option<RegionNormalizer>,
    smiles: Option<SmileDetector>,
    classifier: Option<Box<dyn EmotionClassifier>>,
    smoother: Option<TemporalSmoother>,
}

impl PipelineBuilder {
    pub fn face_locator(mut self, faces: FaceLocator) -> Self {
        self.faces = Some(faces);
        self
    }

    pub fn normalizer(mut self, normalizer: RegionNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn smile_detector(mut self, smiles: SmileDetector) -> Self {
        self.smiles = Some(smiles);
        self
    }

    pub fn classifier(mut self, classifier: Box<dyn EmotionClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn smoother(mut self, smoother: TemporalSmoother) -> Self {
        self.smoother = Some(smoother);
        self
    }

    pub fn build(self) -> EmotionPipeline {
        EmotionPipeline {
            decoder: FrameDecoder::new(),
            faces: self.faces.unwrap_or_else(FaceLocator::disabled),
            normalizer: self.normalizer.unwrap_or_default(),
            smiles: self.smiles.unwrap_or_else(SmileDetector::disabled),
            classifier: self
                .classifier
                .unwrap_or_else(|| Box::new(HeuristicClassifier)),
            smoother: self.smoother.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::{ObjectDetector, Rect};
    use crate::face::FaceMargin;
    use image::{GrayImage, Rgb};
    use moodlens_common::{NormalizationConfig, ScanParams};
    use moodlens_emotion_model::Emotion;

    struct Fixed(Vec<Rect>);

    impl ObjectDetector for Fixed {
        fn detect(&self, _gray: &GrayImage, _params: &ScanParams) -> Vec<Rect> {
            self.0.clone()
        }
    }

    fn raw_normalizer() -> RegionNormalizer {
        RegionNormalizer::from_config(&NormalizationConfig {
            enabled: false,
            ..NormalizationConfig::default()
        })
    }

    fn two_tone(w: u32, h: u32, lo: u8, hi: u8) -> RgbImage {
        RgbImage::from_fn(w, h, |x, _| {
            let v = if x % 2 == 0 { lo } else { hi };
            Rgb([v, v, v])
        })
    }

    #[test]
    fn test_pipeline_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EmotionPipeline>();
    }

    #[test]
    fn test_whole_frame_when_no_face_detector() {
        let pipeline = EmotionPipeline::builder().normalizer(raw_normalizer()).build();
        let raw = pipeline.classify_frame(&two_tone(40, 30, 160, 240)).unwrap();
        assert_eq!((raw.label, raw.confidence, raw.face_found), (Emotion::Happy, 0.72, false));
    }

    #[test]
    fn test_colored_frame_statistics_use_bt601_luma() {
        // Luma 124/164 under BT.601; BT.709 would give a mean near 137.
        let frame = RgbImage::from_fn(64, 48, |x, _| {
            if x % 2 == 0 {
                Rgb([180, 100, 100])
            } else {
                Rgb([220, 140, 140])
            }
        });
        let pipeline = EmotionPipeline::builder().normalizer(raw_normalizer()).build();
        let raw = pipeline.classify_frame(&frame).unwrap();
        assert_eq!((raw.label, raw.confidence), (Emotion::Happy, 0.72));
    }

    #[test]
    fn test_face_crop_drives_statistics() {
        // Dark textured face in a bright frame.
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([230, 230, 230]));
        for y in 20..80 {
            for x in 20..80 {
                let v = if x % 2 == 0 { 70 } else { 90 };
                frame.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        let faces = FaceLocator::new(
            Box::new(Fixed(vec![Rect::new(20, 20, 60, 60)])),
            ScanParams::face_defaults(),
            FaceMargin {
                ratio: 0.0,
                min_px: 0,
            },
        );
        let pipeline = EmotionPipeline::builder()
            .face_locator(faces)
            .normalizer(raw_normalizer())
            .build();

        let raw = pipeline.classify_frame(&frame).unwrap();
        assert_eq!((raw.label, raw.face_found), (Emotion::Sad, true));
    }

    #[test]
    fn test_smile_ignored_without_face() {
        let always = SmileDetector::new(
            Box::new(Fixed(vec![Rect::new(0, 0, 2, 2)])),
            ScanParams::smile_defaults(),
        );
        let pipeline = EmotionPipeline::builder()
            .normalizer(raw_normalizer())
            .smile_detector(always)
            .build();
        let raw = pipeline.classify_frame(&two_tone(40, 30, 70, 90)).unwrap();
        assert_eq!(raw.label, Emotion::Sad);
    }

    #[test]
    fn test_failed_decode_is_not_smoothed() {
        let pipeline = EmotionPipeline::builder().build();
        let key = SmoothingKey::new("u", "m", "a");
        let out = pipeline.infer_frame("not an image", &key);
        assert_eq!(out.emotion, Emotion::Neutral);
        assert_eq!(out.confidence, 0.0);
        assert!(pipeline.smoother().history(&key).is_none());
    }

    #[test]
    fn test_linear_without_model_falls_back() {
        let classifier = build_classifier(&ClassifierConfig {
            kind: ClassifierKind::Linear,
            model_path: Some("/nonexistent/model.json".into()),
        });
        assert_eq!(classifier.name(), "heuristic");
    }

    #[test]
    fn test_capabilities_of_bare_pipeline() {
        let caps = EmotionPipeline::builder().build().capabilities();
        assert_eq!(
            caps,
            Capabilities {
                face_detection: false,
                smile_detection: false,
                classifier: "heuristic",
                smoothing_window: 3,
            }
        );
    }
}
