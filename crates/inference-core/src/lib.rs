//! MoodLens Inference Core
//!
//! Turns a single webcam frame into an emotion label:
//! - **Face localization:** Haar cascade scan, largest face, padded crop
//! - **Normalization:** CLAHE with a global-equalization fallback
//! - **Classification:** smile short-circuit, then a pluggable classifier
//! - **Temporal smoothing:** majority vote over recent labels per session
//!
//! Apart from loading cascade and model files once at construction, this
//! crate is pure computation over in-memory images.

pub mod cascade;
pub mod classify;
pub mod decode;
pub mod face;
pub mod linear_model;
pub mod normalize;
pub mod pipeline;
pub mod smile;
pub mod smoother;

pub use cascade::{HaarCascade, ObjectDetector, Rect};
pub use classify::{EmotionClassifier, HeuristicClassifier, RegionStats};
pub use decode::{luma_bt601, FrameDecoder};
pub use face::{FaceLocator, FaceMargin, FaceRegion};
pub use linear_model::{LinearModel, LinearModelClassifier};
pub use normalize::{NormalizationMethod, NormalizedRegion, RegionNormalizer};
pub use pipeline::{Capabilities, EmotionPipeline, PipelineBuilder};
pub use smile::SmileDetector;
pub use smoother::TemporalSmoother;
