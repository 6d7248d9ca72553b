// SPDX-License-Identifier: GPL-3.0-only

//! Renderer configuration
//!
//! Stored as JSON under the platform config directory
//! (`~/.config/facefilter/config.json` on Linux). Missing fields take their
//! defaults, so older files keep loading as options are added.

use crate::constants;
use crate::errors::ConfigError;
use crate::filters::KalmanConfig;
use crate::pipeline::{SmoothingPass, SmoothingPassTable};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory name under the platform config dir
const CONFIG_DIR_NAME: &str = "facefilter";
/// Config file name
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Initial viewport width in pixels
    pub viewport_width: u32,
    /// Initial viewport height in pixels
    pub viewport_height: u32,
    /// Blend strength of smoothed skin (0..=1)
    pub smoothing_factor: f32,
    /// Smoothing target scales relative to the viewport
    pub smoothing_pass_sizes: [f32; constants::smoothing::TARGET_COUNT],
    /// Smoothing pass table, executed in order
    pub smoothing_passes: Vec<SmoothingPass>,
    /// Gaze filter noise parameters
    pub kalman: KalmanConfig,
    /// Eye-opening distance below which an eye is closed
    pub eye_openness_threshold: f32,
    /// Padding added around each eye box before cropping, in pixels (x, y)
    pub eye_padding: [f32; 2],
    /// World lookup table strength (0..=1)
    pub lut_intensity: f32,
    /// Live output buffers the pool may hold
    pub output_pool_threshold: usize,
    /// Content fade length when tracking changes, in milliseconds
    pub fade_duration_ms: u64,
    /// Optional grayscale image used as the skin mask (face UV space)
    pub face_mask_path: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            viewport_width: 720,
            viewport_height: 1280,
            smoothing_factor: constants::smoothing::DEFAULT_FACTOR,
            smoothing_pass_sizes: constants::smoothing::DEFAULT_PASS_SIZES,
            smoothing_passes: constants::smoothing::DEFAULT_PASSES
                .iter()
                .map(|&(target, clear)| SmoothingPass { target, clear })
                .collect(),
            kalman: KalmanConfig::default(),
            eye_openness_threshold: constants::eyes::OPENNESS_THRESHOLD,
            eye_padding: [
                constants::eyes::DEFAULT_PADDING.0,
                constants::eyes::DEFAULT_PADDING.1,
            ],
            lut_intensity: constants::color::DEFAULT_LUT_INTENSITY,
            output_pool_threshold: constants::output::DEFAULT_ALLOCATION_THRESHOLD,
            fade_duration_ms: constants::TRACKING_FADE.as_millis() as u64,
            face_mask_path: None,
        }
    }
}

impl RendererConfig {
    /// Default config file location, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a config file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), "Loaded renderer config");
        Ok(config)
    }

    /// Write the config as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Check every value is in range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.viewport_width == 0 || self.viewport_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "viewport must be non-empty, got {}x{}",
                self.viewport_width, self.viewport_height
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_factor) {
            return Err(ConfigError::Invalid(format!(
                "smoothing_factor {} outside 0..=1",
                self.smoothing_factor
            )));
        }
        if let Some(size) = self
            .smoothing_pass_sizes
            .iter()
            .find(|s| !(**s > 0.0 && **s <= 1.0))
        {
            return Err(ConfigError::Invalid(format!(
                "smoothing pass size {} outside (0, 1]",
                size
            )));
        }
        self.pass_table()?;
        if self.eye_openness_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "eye_openness_threshold must be positive".into(),
            ));
        }
        if self.eye_padding.iter().any(|p| *p < 0.0) {
            return Err(ConfigError::Invalid("eye_padding must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.lut_intensity) {
            return Err(ConfigError::Invalid(format!(
                "lut_intensity {} outside 0..=1",
                self.lut_intensity
            )));
        }
        if self.output_pool_threshold == 0 {
            return Err(ConfigError::Invalid(
                "output_pool_threshold must be at least 1".into(),
            ));
        }
        self.kalman.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Smoothing pass table built from the configured passes
    pub fn pass_table(&self) -> Result<SmoothingPassTable, ConfigError> {
        SmoothingPassTable::new(self.smoothing_passes.clone()).map_err(ConfigError::Invalid)
    }

    /// Eye padding as an (x, y) pair
    pub fn eye_padding(&self) -> (f32, f32) {
        (self.eye_padding[0], self.eye_padding[1])
    }

    /// Fade duration as a `Duration`
    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: RendererConfig =
            serde_json::from_str(r#"{ "smoothing_factor": 0.25 }"#).unwrap();
        assert_eq!(config.smoothing_factor, 0.25);
        assert_eq!(config.lut_intensity, constants::color::DEFAULT_LUT_INTENSITY);
        assert_eq!(config.smoothing_passes.len(), 7);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let config = RendererConfig {
            smoothing_factor: 1.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = RendererConfig {
            output_pool_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RendererConfig {
            smoothing_passes: vec![SmoothingPass {
                target: 2,
                clear: true,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
