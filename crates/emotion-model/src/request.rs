//! The boundary contract with the web layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// User name used when the caller does not identify one.
pub const GUEST_USER: &str = "guest";

/// Identity of one continuous interaction: whose frames are smoothed together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmoothingKey {
    pub user: String,
    pub module: String,
    pub activity: String,
}

impl SmoothingKey {
    pub fn new(
        user: impl Into<String>,
        module: impl Into<String>,
        activity: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            module: module.into(),
            activity: activity.into(),
        }
    }
}

impl fmt::Display for SmoothingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.user, self.module, self.activity)
    }
}

/// One inference call as handed over by the request layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Base64 image, optionally prefixed with a `data:` URI header.
    #[serde(alias = "image_b64", alias = "image_base64")]
    pub image: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub activity: Option<String>,

    /// Recorded by the storage layer; not part of the smoothing key.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InferenceRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            user: None,
            module: None,
            activity: None,
            session_id: None,
        }
    }

    /// The key whose history this frame joins.
    ///
    /// Missing or empty users become [`GUEST_USER`]; missing module or
    /// activity become empty strings.
    pub fn smoothing_key(&self) -> SmoothingKey {
        let user = self
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(GUEST_USER);
        SmoothingKey::new(
            user,
            self.module.as_deref().unwrap_or_default(),
            self.activity.as_deref().unwrap_or_default(),
        )
    }
}
