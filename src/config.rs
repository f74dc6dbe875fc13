use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::blink::BlinkThreshold;
use crate::error::TrackerError;
use crate::types::ScreenGeometry;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub screen: ScreenConfig,
    pub calibration: CalibrationConfig,
    pub model: RegressorConfig,
    pub smoothing: SmoothingConfig,
    pub blink: BlinkConfig,
    pub scroll: ScrollConfig,
    pub modes: ModeSpeeds,
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Screen-fraction offsets the target grid is drawn from
    pub grid_fractions: Vec<f64>,
    /// Targets for the initial calibration
    pub target_count: usize,
    /// Targets for an incremental recalibration
    pub quick_target_count: usize,
    /// Targets for a from-scratch recalibration
    pub full_target_count: usize,
    pub settle_delay_secs: f64,
    pub sampling_duration_secs: f64,
    pub min_valid_frames: usize,
    pub outlier_keep_fraction: f64,
    pub min_samples_to_fit: usize,
}

/// Gradient-boosted tree settings, one ensemble per screen axis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressorConfig {
    pub n_estimators: usize,
    pub max_depth: u16,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// 0 = raw predictions, towards 1 = heavy smoothing at screen center
    pub smoothing_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Threshold used until a personal blink calibration is loaded
    pub threshold: BlinkThreshold,
    pub cooldown_secs: f64,
    /// Blinks shorter than this are clicks
    pub short_blink_secs: f64,
    /// Blinks at least this long switch mode
    pub long_blink_secs: f64,
    pub history_capacity: usize,
    pub min_history: usize,
    pub baseline_percentile: f64,
    pub reduction_scale: f64,
    pub relative_switch_margin: f64,
    pub baseline_duration_secs: f64,
    pub calibration_blinks: usize,
    pub min_marked_blinks: usize,
    pub min_baseline_samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Height fraction of the no-scroll band around mid-screen
    pub deadzone_fraction: f64,
    pub speed_factor: f64,
    /// Scroll steps per unit of normalized distance
    pub scale: f64,
}

/// Cursor move duration (seconds) for each interaction mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSpeeds {
    pub cursor: f64,
    pub scroll: f64,
    pub click: f64,
    pub drag: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    pub data_dir: String,
    pub name: String,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self { width: 1920, height: 1080 }
    }
}

impl ScreenConfig {
    pub fn geometry(&self) -> ScreenGeometry {
        ScreenGeometry::new(self.width as f64, self.height as f64)
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            grid_fractions: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95],
            target_count: 100,
            quick_target_count: 9,
            full_target_count: 16,
            settle_delay_secs: 3.0,
            sampling_duration_secs: 3.0,
            min_valid_frames: 10,
            outlier_keep_fraction: 0.8,
            min_samples_to_fit: 6,
        }
    }
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            n_estimators: 400,
            max_depth: 18,
            learning_rate: 0.1,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { smoothing_factor: 0.8 }
    }
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            threshold: BlinkThreshold::default(),
            cooldown_secs: 0.05,
            short_blink_secs: 0.3,
            long_blink_secs: 1.0,
            history_capacity: 30,
            min_history: 10,
            baseline_percentile: 80.0,
            reduction_scale: 0.8,
            relative_switch_margin: 0.05,
            baseline_duration_secs: 5.0,
            calibration_blinks: 5,
            min_marked_blinks: 3,
            min_baseline_samples: 10,
        }
    }
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            deadzone_fraction: 0.3,
            speed_factor: 0.5,
            scale: 20.0,
        }
    }
}

impl Default for ModeSpeeds {
    fn default() -> Self {
        Self {
            cursor: 0.05,
            scroll: 0.02,
            click: 0.04,
            drag: 0.03,
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            data_dir: "calibration_data".to_string(),
            name: "default".to_string(),
        }
    }
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "config.json";

    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, |_| {})
    }

    /// Loads the file, applies `overrides` (command-line values) and validates
    /// the result. Overrides are never written back.
    pub fn load_with(path: &Path, overrides: impl FnOnce(&mut Self)) -> Result<Self> {
        let (mut config, write_back) = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            // Missing fields fall back to Default via #[serde(default)]
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(c) => {
                    info!("Loaded configuration from {}", path.display());
                    (c, true)
                }
                Err(e) => {
                    warn!(
                        "Error parsing config: {}. Using defaults and leaving {} untouched.",
                        e,
                        path.display()
                    );
                    (Self::default(), false)
                }
            }
        } else {
            info!("Configuration file not found. Creating default at {}", path.display());
            (Self::default(), true)
        };

        // Save back so new fields are populated in the file
        if write_back {
            config.save(path)?;
        }

        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), TrackerError> {
        if self.screen.width == 0 || self.screen.height == 0 {
            return Err(TrackerError::InvalidConfig(format!(
                "screen size {}x{} must be positive",
                self.screen.width, self.screen.height
            )));
        }
        let keep = self.calibration.outlier_keep_fraction;
        if !(keep > 0.0 && keep <= 1.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "outlier_keep_fraction {} must be in (0, 1]",
                keep
            )));
        }
        if self.calibration.min_samples_to_fit == 0 {
            return Err(TrackerError::InvalidConfig(
                "min_samples_to_fit must be at least 1".to_string(),
            ));
        }
        if self.calibration.grid_fractions.is_empty() {
            return Err(TrackerError::InvalidConfig(
                "grid_fractions must not be empty".to_string(),
            ));
        }
        if self.blink.history_capacity == 0 {
            return Err(TrackerError::InvalidConfig(
                "blink history_capacity must be at least 1".to_string(),
            ));
        }
        if self.blink.history_capacity < self.blink.min_history {
            return Err(TrackerError::InvalidConfig(format!(
                "blink history_capacity {} is below min_history {}",
                self.blink.history_capacity, self.blink.min_history
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"screen": {"width": 1440}}"#).unwrap();
        assert_eq!(cfg.screen.width, 1440);
        assert_eq!(cfg.screen.height, 1080);
        assert_eq!(cfg.calibration.min_samples_to_fit, 6);
        assert!((cfg.blink.long_blink_secs - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_keep_fraction() {
        let mut cfg = AppConfig::default();
        cfg.calibration.outlier_keep_fraction = 0.0;
        assert!(matches!(cfg.validate(), Err(TrackerError::InvalidConfig(_))));
        cfg.calibration.outlier_keep_fraction = 1.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = AppConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.profile.name, "default");
    }

    #[test]
    fn test_load_garbage_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.scroll.scale, 20.0);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"screen": {"width": 0, "height": 900}}"#).unwrap();

        assert!(AppConfig::load(&path).is_err());
        let cfg = AppConfig::load_with(&path, |c| c.screen.width = 1600).unwrap();
        assert_eq!((cfg.screen.width, cfg.screen.height), (1600, 900));

        // the file keeps its own values
        let on_disk: AppConfig = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.screen.width, 0);
    }

    #[test]
    fn test_validate_rejects_empty_blink_history() {
        let mut cfg = AppConfig::default();
        cfg.blink.history_capacity = 0;
        cfg.blink.min_history = 0;
        assert!(matches!(cfg.validate(), Err(TrackerError::InvalidConfig(_))));
    }
}
