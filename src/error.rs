use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("degenerate geometry: {what} is {value:.2e}")]
    DegenerateGeometry { what: &'static str, value: f64 },

    #[error("landmark {index} missing (frame has {available} points)")]
    MissingLandmark { index: usize, available: usize },

    #[error("calibration point collected {collected} valid frames, need {required}")]
    InsufficientPointData { collected: usize, required: usize },

    #[error("calibration produced {collected} samples, need at least {required}")]
    InsufficientCalibrationData { collected: usize, required: usize },

    #[error("blink calibration needs more than {baseline_required} baseline frames and {blinks_required} blinks (got {baseline} and {blinks})")]
    InsufficientBlinkData {
        baseline: usize,
        baseline_required: usize,
        blinks: usize,
        blinks_required: usize,
    },

    #[error("gaze model has not been fit; calibrate first")]
    ModelNotFit,

    #[error("feature row has {got} dimensions, model expects {expected}")]
    FeatureDimension { expected: usize, got: usize },

    #[error("no saved profile '{profile}' at {}", path.display())]
    ProfileNotFound { profile: String, path: PathBuf },

    #[error("profile file {} is corrupt: {reason}", path.display())]
    CorruptProfile { path: PathBuf, reason: String },

    #[error("landmark source ended before calibration finished")]
    SourceExhausted,

    #[error("landmark source error: {0}")]
    Source(String),

    #[error("regression error: {0}")]
    Regression(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model encoding error: {0}")]
    Bincode(#[from] bincode::Error),
}

impl TrackerError {
    /// Faults that only invalidate the current frame.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            TrackerError::DegenerateGeometry { .. } | TrackerError::MissingLandmark { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
