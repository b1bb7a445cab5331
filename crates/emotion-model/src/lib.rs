//! MoodLens Emotion Model
//!
//! Defines the data contracts exchanged with the inference core:
//! - **Emotion:** The four canonical labels and mapping from foreign labels
//! - **Results:** Raw per-frame classifications and the smoothed output
//! - **Requests:** The boundary tuple handed over by the web layer
//!
//! Confidence values are always clamped to `[0.0, 1.0]`.

pub mod emotion;
pub mod request;
pub mod result;

pub use emotion::*;
pub use request::*;
pub use result::*;
