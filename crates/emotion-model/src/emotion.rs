//! Canonical emotion labels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four emotional states the system reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Happy,
    #[default]
    Neutral,
    Sad,
    Frustrated,
}

/// Error returned by [`Emotion::from_str`] for non-canonical names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown emotion label: {0}")]
pub struct UnknownEmotion(pub String);

impl Emotion {
    pub const ALL: [Emotion; 4] = [
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Sad,
        Emotion::Frustrated,
    ];

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Sad => "sad",
            Emotion::Frustrated => "frustrated",
        }
    }

    /// Map a label produced by some other model onto the four canonical values.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Unknown labels map to [`Emotion::Neutral`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "happy" | "joy" | "smile" => Emotion::Happy,
            "neutral" | "surprise" | "calm" => Emotion::Neutral,
            "sad" | "down" => Emotion::Sad,
            "angry" | "anger" | "fear" | "disgust" | "contempt" | "frustrated"
            | "frustration" => Emotion::Frustrated,
            _ => Emotion::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    /// Strict parse: only the four canonical names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Emotion::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEmotion(s.to_string()))
    }
}
