use std::fs;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::blink::BlinkThreshold;
use crate::calibration::{CalibrationMode, CalibrationQuality, CalibrationReport, CalibrationSample};
use crate::error::{Result, TrackerError};
use crate::regression::GazeModel;

const MODEL_FILE: &str = "gaze_model.bin";
const BLINK_FILE: &str = "blink_calibration.json";
const SAMPLES_FILE: &str = "calibration_samples.json";
const HISTORY_FILE: &str = "calibration_history.json";

/// One successful calibration, appended to the profile's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub run_id: String,
    pub timestamp: DateTime<Local>,
    pub mode: CalibrationMode,
    pub samples: usize,
    pub failed_points: usize,
    pub mae_x: f64,
    pub mae_y: f64,
    pub quality: CalibrationQuality,
}

impl CalibrationRun {
    pub fn from_report(report: &CalibrationReport) -> Self {
        let now = Local::now();
        Self {
            run_id: now.format("%Y%m%d_%H%M%S").to_string(),
            timestamp: now,
            mode: report.mode,
            samples: report.samples,
            failed_points: report.failed_points,
            mae_x: report.mae_x,
            mae_y: report.mae_y,
            quality: report.quality,
        }
    }
}

pub type CalibrationHistory = Vec<CalibrationRun>;

/// Everything needed to resume tracking for a user.
#[derive(Debug)]
pub struct Profile {
    pub model: GazeModel,
    pub blink: BlinkThreshold,
    pub samples: Vec<CalibrationSample>,
}

/// Directory-per-profile storage under a data root.
pub struct ProfileStore {
    root: PathBuf,
    fallback_blink: BlinkThreshold,
}

impl ProfileStore {
    pub fn new(root: impl Into<PathBuf>, fallback_blink: BlinkThreshold) -> Self {
        Self { root: root.into(), fallback_blink }
    }

    pub fn profile_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.profile_dir(name).join(MODEL_FILE).exists()
    }

    pub fn save(
        &self,
        name: &str,
        model: &GazeModel,
        blink: &BlinkThreshold,
        samples: &[CalibrationSample],
    ) -> Result<()> {
        let dir = self.profile_dir(name);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let model_bytes = bincode::serialize(model)?;
        // The model file marks a profile as present, so it lands last
        replace_file(&dir.join(BLINK_FILE), serde_json::to_string_pretty(blink)?.as_bytes())?;
        replace_file(&dir.join(SAMPLES_FILE), serde_json::to_string(samples)?.as_bytes())?;
        replace_file(&dir.join(MODEL_FILE), &model_bytes)?;
        info!("Saved profile '{}' to {}", name, dir.display());
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Profile> {
        let dir = self.profile_dir(name);
        let model_path = dir.join(MODEL_FILE);
        if !model_path.exists() {
            return Err(TrackerError::ProfileNotFound { profile: name.to_string(), path: model_path });
        }
        let bytes = fs::read(&model_path)?;
        let model: GazeModel = bincode::deserialize(&bytes).map_err(|e| corrupt(&model_path, e))?;
        if !model.is_feature_compatible() {
            return Err(corrupt(
                &model_path,
                format!("model expects {} features", model.feature_dim()),
            ));
        }

        let blink_path = dir.join(BLINK_FILE);
        let blink = if blink_path.exists() {
            let content = fs::read_to_string(&blink_path)?;
            serde_json::from_str(&content).map_err(|e| corrupt(&blink_path, e))?
        } else {
            warn!(
                "No blink calibration in profile '{}'; using {}",
                name, self.fallback_blink
            );
            self.fallback_blink
        };

        let samples_path = dir.join(SAMPLES_FILE);
        let samples = if samples_path.exists() {
            let content = fs::read_to_string(&samples_path)?;
            serde_json::from_str(&content).map_err(|e| corrupt(&samples_path, e))?
        } else {
            Vec::new()
        };

        info!("Loaded profile '{}' ({} samples)", name, model.n_samples());
        Ok(Profile { model, blink, samples })
    }

    pub fn save_blink(&self, name: &str, blink: &BlinkThreshold) -> Result<()> {
        let dir = self.profile_dir(name);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        replace_file(&dir.join(BLINK_FILE), serde_json::to_string_pretty(blink)?.as_bytes())?;
        Ok(())
    }

    pub fn load_history(&self, name: &str) -> Result<CalibrationHistory> {
        let path = self.profile_dir(name).join(HISTORY_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| corrupt(&path, e))
    }

    pub fn append_history(&self, name: &str, run: CalibrationRun) -> Result<()> {
        let dir = self.profile_dir(name);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let mut history = self.load_history(name).unwrap_or_else(|e| {
            warn!("Starting a fresh calibration history: {}", e);
            Vec::new()
        });
        history.push(run);
        replace_file(&dir.join(HISTORY_FILE), serde_json::to_string_pretty(&history)?.as_bytes())?;
        Ok(())
    }
}

/// Writes next to `path` and renames over it, so readers never see a partial file.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn corrupt(path: &Path, reason: impl ToString) -> TrackerError {
    TrackerError::CorruptProfile { path: path.to_path_buf(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressorConfig;
    use crate::features::{FeatureVector, FEATURE_DIM};
    use crate::types::ScreenPoint;

    fn profile() -> Profile {
        let samples: Vec<CalibrationSample> = (0..6)
            .map(|i| {
                let mut row = [0.0; FEATURE_DIM];
                row[2] = i as f64;
                CalibrationSample {
                    features: FeatureVector::from_array(&row),
                    target: ScreenPoint::new(i as f64 * 50.0, 10.0),
                }
            })
            .collect();
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.to_array().to_vec()).collect();
        let targets: Vec<ScreenPoint> = samples.iter().map(|s| s.target).collect();
        let cfg = RegressorConfig { n_estimators: 20, max_depth: 4, learning_rate: 0.5 };
        Profile {
            model: GazeModel::fit(&rows, &targets, &cfg).unwrap(),
            blink: BlinkThreshold::Relative { baseline: 0.31, reduction: 0.2 },
            samples,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path(), BlinkThreshold::default());
        let p = profile();
        store.save("alice", &p.model, &p.blink, &p.samples).unwrap();
        assert!(store.exists("alice"));

        let back = store.load("alice").unwrap();
        assert_eq!(back.blink, p.blink);
        assert_eq!(back.samples, p.samples);
        let probe = p.samples[3].features.to_array();
        assert_eq!(back.model.predict(&probe).unwrap(), p.model.predict(&probe).unwrap());
    }

    #[test]
    fn test_missing_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path(), BlinkThreshold::default());
        let err = store.load("nobody").unwrap_err();
        assert!(matches!(err, TrackerError::ProfileNotFound { ref profile, .. } if profile == "nobody"));
    }

    #[test]
    fn test_garbage_model_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path(), BlinkThreshold::default());
        fs::create_dir_all(store.profile_dir("bob")).unwrap();
        fs::write(store.profile_dir("bob").join(MODEL_FILE), b"not a model").unwrap();
        let err = store.load("bob").unwrap_err();
        assert!(matches!(err, TrackerError::CorruptProfile { .. }));
    }

    #[test]
    fn test_missing_blink_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let fallback = BlinkThreshold::Absolute { threshold: 0.18 };
        let store = ProfileStore::new(dir.path(), fallback);
        let p = profile();
        store.save("carol", &p.model, &p.blink, &p.samples).unwrap();
        fs::remove_file(store.profile_dir("carol").join(BLINK_FILE)).unwrap();
        assert_eq!(store.load("carol").unwrap().blink, fallback);
    }

    #[test]
    fn test_failed_save_leaves_no_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path(), BlinkThreshold::default());
        let p = profile();
        // a directory squatting on the temp path makes the samples write fail
        let blocker = store.profile_dir("erin").join(format!("{}.tmp", SAMPLES_FILE));
        fs::create_dir_all(&blocker).unwrap();

        assert!(store.save("erin", &p.model, &p.blink, &p.samples).is_err());
        assert!(!store.exists("erin"));
        assert!(matches!(store.load("erin"), Err(TrackerError::ProfileNotFound { .. })));

        fs::remove_dir(&blocker).unwrap();
        store.save("erin", &p.model, &p.blink, &p.samples).unwrap();
        let leftovers: Vec<_> = fs::read_dir(store.profile_dir("erin"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_history_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProfileStore::new(dir.path(), BlinkThreshold::default());
        let report = CalibrationReport {
            mode: CalibrationMode::Full,
            samples: 16,
            failed_points: 1,
            mae_x: 12.0,
            mae_y: 20.0,
            quality: CalibrationQuality::Excellent,
        };
        store.append_history("dave", CalibrationRun::from_report(&report)).unwrap();
        store.append_history("dave", CalibrationRun::from_report(&report)).unwrap();
        let h = store.load_history("dave").unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[1].failed_points, 1);
    }
}
