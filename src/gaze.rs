use log::info;

use crate::error::{Result, TrackerError};
use crate::features::FeatureVector;
use crate::regression::GazeModel;
use crate::types::ScreenPoint;

#[derive(Debug, Default)]
pub enum GazeModelState {
    #[default]
    Uncalibrated,
    Calibrated(GazeModel),
}

/// Maps feature vectors to raw (unsmoothed, unclamped) screen positions.
#[derive(Debug, Default)]
pub struct GazeEstimator {
    state: GazeModelState,
}

impl GazeEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_calibrated(&self) -> bool {
        match self.state {
            GazeModelState::Uncalibrated => false,
            GazeModelState::Calibrated(_) => true,
        }
    }

    pub fn model(&self) -> Option<&GazeModel> {
        match &self.state {
            GazeModelState::Uncalibrated => None,
            GazeModelState::Calibrated(m) => Some(m),
        }
    }

    /// Swaps in a new model, returning the one it replaced.
    pub fn install(&mut self, model: GazeModel) -> Option<GazeModel> {
        info!("Installed gaze model fit on {} samples", model.n_samples());
        match std::mem::replace(&mut self.state, GazeModelState::Calibrated(model)) {
            GazeModelState::Uncalibrated => None,
            GazeModelState::Calibrated(old) => Some(old),
        }
    }

    pub fn estimate(&self, features: &FeatureVector) -> Result<ScreenPoint> {
        match &self.state {
            GazeModelState::Uncalibrated => Err(TrackerError::ModelNotFit),
            GazeModelState::Calibrated(model) => model.predict(&features.to_array()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegressorConfig;
    use crate::features::FEATURE_DIM;

    #[test]
    fn test_uncalibrated_estimate_fails() {
        let est = GazeEstimator::new();
        let err = est.estimate(&FeatureVector::default()).unwrap_err();
        assert!(matches!(err, TrackerError::ModelNotFit));
        assert!(!est.is_calibrated());
    }

    #[test]
    fn test_install_replaces_model() {
        let rows: Vec<Vec<f64>> = (0..6)
            .map(|i| {
                let mut r = vec![0.0; FEATURE_DIM];
                r[0] = i as f64;
                r
            })
            .collect();
        let targets: Vec<ScreenPoint> =
            (0..6).map(|i| ScreenPoint::new(i as f64 * 100.0, 200.0)).collect();
        let cfg = RegressorConfig { n_estimators: 50, max_depth: 4, learning_rate: 0.5 };

        let mut est = GazeEstimator::new();
        assert!(est.install(GazeModel::fit(&rows, &targets, &cfg).unwrap()).is_none());
        assert!(est.is_calibrated());

        let mut probe = [0.0; FEATURE_DIM];
        probe[0] = 3.0;
        let p = est.estimate(&FeatureVector::from_array(&probe)).unwrap();
        assert!((p.x - 300.0).abs() < 1.0);
        assert!((p.y - 200.0).abs() < 1e-6);

        assert!(est.install(GazeModel::fit(&rows, &targets, &cfg).unwrap()).is_some());
    }
}
