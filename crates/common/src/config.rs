//! Application configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MoodlensError, MoodlensResult};

/// Environment variable overriding the default cascade directory.
pub const CASCADE_DIR_ENV: &str = "MOODLENS_CASCADE_DIR";

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Face and smile cascade detectors.
    pub detector: DetectorConfig,

    /// Contrast normalization applied before statistics.
    pub normalization: NormalizationConfig,

    /// Which classifier strategy the pipeline uses.
    pub classifier: ClassifierConfig,

    /// Temporal smoothing of emitted labels.
    pub smoothing: SmoothingConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Parameters for one multi-scale cascade scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    /// Window growth per pyramid step (must be > 1.0).
    pub scale_factor: f64,

    /// Raw hits a grouped rectangle needs to survive.
    pub min_neighbors: u32,

    /// Smallest window considered, in pixels. `None` uses the cascade's own size.
    pub min_size: Option<(u32, u32)>,
}

/// Cascade detector locations and scan parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// OpenCV XML cascade for frontal faces.
    pub face_cascade: Option<PathBuf>,

    /// OpenCV XML cascade for smiles.
    pub smile_cascade: Option<PathBuf>,

    /// Missing fields fall back to [`ScanParams::face_defaults`].
    #[serde(deserialize_with = "face_scan_over_defaults")]
    pub face_scan: ScanParams,

    /// Missing fields fall back to [`ScanParams::smile_defaults`].
    #[serde(deserialize_with = "smile_scan_over_defaults")]
    pub smile_scan: ScanParams,

    /// Margin ratio applied around a detected face (of its longer side).
    pub face_margin_ratio: f64,

    /// Minimum margin in pixels around a detected face.
    pub face_margin_min_px: u32,
}

/// Contrast normalization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Equalize at all. When false, statistics see the raw luma.
    pub enabled: bool,

    /// Use contrast-limited adaptive equalization when the region allows it.
    pub clahe: bool,

    /// Histogram clip limit, relative to a uniform histogram.
    pub clip_limit: f64,

    /// Tiles per axis.
    pub tile_grid: u32,
}

/// Classifier strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    /// Threshold decision list over brightness and contrast.
    #[default]
    Heuristic,
    /// Softmax-linear model loaded from JSON.
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,

    /// Model weights for [`ClassifierKind::Linear`].
    pub model_path: Option<PathBuf>,
}

/// Temporal smoothing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Raw labels retained per session.
    pub window: usize,

    /// Sessions tracked before the least recently used one is dropped.
    pub max_sessions: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "moodlens=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            normalization: NormalizationConfig::default(),
            classifier: ClassifierConfig::default(),
            smoothing: SmoothingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ScanParams {
    pub fn face_defaults() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: None,
        }
    }

    pub fn smile_defaults() -> Self {
        Self {
            scale_factor: 1.15,
            min_neighbors: 16,
            min_size: None,
        }
    }
}

/// A scan section as written in the config file, before defaults apply.
#[derive(Deserialize)]
struct PartialScanParams {
    scale_factor: Option<f64>,
    min_neighbors: Option<u32>,
    #[serde(default)]
    min_size: Option<(u32, u32)>,
}

impl PartialScanParams {
    fn over(self, base: ScanParams) -> ScanParams {
        ScanParams {
            scale_factor: self.scale_factor.unwrap_or(base.scale_factor),
            min_neighbors: self.min_neighbors.unwrap_or(base.min_neighbors),
            min_size: self.min_size.or(base.min_size),
        }
    }
}

fn face_scan_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<ScanParams, D::Error> {
    Ok(PartialScanParams::deserialize(d)?.over(ScanParams::face_defaults()))
}

fn smile_scan_over_defaults<'de, D: Deserializer<'de>>(d: D) -> Result<ScanParams, D::Error> {
    Ok(PartialScanParams::deserialize(d)?.over(ScanParams::smile_defaults()))
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let dir = default_cascade_dir();
        Self {
            face_cascade: Some(dir.join("haarcascade_frontalface_default.xml")),
            smile_cascade: Some(dir.join("haarcascade_smile.xml")),
            face_scan: ScanParams::face_defaults(),
            smile_scan: ScanParams::smile_defaults(),
            face_margin_ratio: 0.15,
            face_margin_min_px: 10,
        }
    }
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clahe: true,
            clip_limit: 2.0,
            tile_grid: 8,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            window: 3,
            max_sessions: 4096,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path. Missing fields take their defaults.
    pub fn load_from(path: &Path) -> MoodlensResult<Self> {
        if !path.exists() {
            return Err(MoodlensError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> MoodlensResult<()> {
        for (name, scan) in [
            ("face_scan", &self.detector.face_scan),
            ("smile_scan", &self.detector.smile_scan),
        ] {
            if scan.scale_factor <= 1.0 || !scan.scale_factor.is_finite() {
                return Err(MoodlensError::config(format!(
                    "detector.{name}.scale_factor must be > 1.0, got {}",
                    scan.scale_factor
                )));
            }
        }
        if self.normalization.tile_grid == 0 {
            return Err(MoodlensError::config("normalization.tile_grid must be >= 1"));
        }
        if self.smoothing.window == 0 {
            return Err(MoodlensError::config("smoothing.window must be >= 1"));
        }
        if self.smoothing.max_sessions == 0 {
            return Err(MoodlensError::config("smoothing.max_sessions must be >= 1"));
        }
        if self.classifier.kind == ClassifierKind::Linear && self.classifier.model_path.is_none()
        {
            return Err(MoodlensError::config(
                "classifier.model_path is required for the linear classifier",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("moodlens").join("config.json")
}

/// Directory holding the stock OpenCV Haar cascades.
fn default_cascade_dir() -> PathBuf {
    std::env::var(CASCADE_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/share/opencv4/haarcascades"))
}
