use crate::alignment::CanonicalLayout;
use crate::decoder::DEFAULT_SCORE_THRESHOLD;
use crate::nms::DEFAULT_IOU_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("bad config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },
    #[error("canonical layout size must be > 0")]
    ZeroCanonicalSize,
    #[error("canonical point {0} is not finite")]
    NonFiniteCanonicalPoint(usize),
}

/// Thresholds for turning raw detector output into faces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum anchor score kept by the decoder (inclusive).
    pub score_threshold: f32,
    /// IoU above which a lower-scoring candidate is suppressed.
    pub iou_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

/// Pipeline configuration, loaded from TOML with `FACEALIGN_*` environment overrides.
///
/// ```toml
/// [detection]
/// score_threshold = 0.5
/// iou_threshold = 0.4
///
/// [canonical]
/// size = 112
/// points = [
///     { x = 38.2946, y = 51.6963 },
///     # ...
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub canonical: CanonicalLayout,
}

impl PipelineConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&src)?;
        config.apply_overrides(lookup);
        config.validate()?;
        tracing::debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override thresholds from `FACEALIGN_SCORE_THRESHOLD` / `FACEALIGN_IOU_THRESHOLD`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let d = &mut self.detection;
        d.score_threshold = env_f32(&lookup, "FACEALIGN_SCORE_THRESHOLD", d.score_threshold);
        d.iou_threshold = env_f32(&lookup, "FACEALIGN_IOU_THRESHOLD", d.iou_threshold);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        for (name, value) in [
            ("score_threshold", d.score_threshold),
            ("iou_threshold", d.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.canonical.size == 0 {
            return Err(ConfigError::ZeroCanonicalSize);
        }
        if let Some(i) = self.canonical.points.iter().position(|p| !p.is_finite()) {
            return Err(ConfigError::NonFiniteCanonicalPoint(i));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn env_f32(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    match lookup(key) {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable override");
            default
        }),
        None => default,
    }
}
