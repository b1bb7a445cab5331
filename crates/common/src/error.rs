//! Error types shared across MoodLens crates.

use std::path::PathBuf;

/// Top-level error type for MoodLens operations.
///
/// "No face found" is deliberately absent: it is a normal outcome and is
/// represented as `None` by the face locator.
#[derive(Debug, thiserror::Error)]
pub enum MoodlensError {
    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Detector unavailable: {message}")]
    DetectorUnavailable { message: String },

    #[error("Computation error: {message}")]
    Computation { message: String },

    #[error("Model error: {message}")]
    Model { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MoodlensError.
pub type MoodlensResult<T> = Result<T, MoodlensError>;

impl MoodlensError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn detector_unavailable(msg: impl Into<String>) -> Self {
        Self::DetectorUnavailable {
            message: msg.into(),
        }
    }

    pub fn computation(msg: impl Into<String>) -> Self {
        Self::Computation {
            message: msg.into(),
        }
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether the failure happened while turning the payload into pixels.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_message() {
        let err = MoodlensError::decode("bad base64");
        assert_eq!(err.to_string(), "Decode error: bad base64");
    }

    #[test]
    fn test_is_decode() {
        assert!(MoodlensError::decode("x").is_decode());
        assert!(!MoodlensError::computation("x").is_decode());
    }
}
