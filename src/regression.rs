use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use crate::config::RegressorConfig;
use crate::error::{Result, TrackerError};
use crate::features::FEATURE_DIM;
use crate::types::ScreenPoint;

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Residuals this small end boosting early.
const CONVERGED: f64 = 1e-9;

/// Per-dimension standardization fit on calibration features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self> {
        let first = rows.first().ok_or(TrackerError::InsufficientCalibrationData {
            collected: 0,
            required: 1,
        })?;
        let dim = first.len();
        for row in rows {
            if row.len() != dim {
                return Err(TrackerError::FeatureDimension { expected: dim, got: row.len() });
            }
        }

        let n = rows.len() as f64;
        let mut mean = vec![0.0; dim];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut std = vec![0.0; dim];
        for row in rows {
            for ((s, v), m) in std.iter_mut().zip(row).zip(&mean) {
                *s += (v - m).powi(2) / n;
            }
        }
        // Constant columns pass through centered but unscaled
        for s in std.iter_mut() {
            *s = s.sqrt();
            if *s < f64::EPSILON {
                *s = 1.0;
            }
        }
        Ok(Self { mean, std })
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>> {
        if row.len() != self.dim() {
            return Err(TrackerError::FeatureDimension { expected: self.dim(), got: row.len() });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.std))
            .map(|(v, (m, s))| (v - m) / s)
            .collect())
    }
}

/// Least-squares gradient boosting over smartcore regression trees.
#[derive(Serialize, Deserialize)]
pub struct BoostedTrees {
    base: f64,
    learning_rate: f64,
    stages: Vec<Tree>,
}

impl fmt::Debug for BoostedTrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoostedTrees")
            .field("base", &self.base)
            .field("learning_rate", &self.learning_rate)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl BoostedTrees {
    pub fn fit(rows: &[Vec<f64>], y: &[f64], cfg: &RegressorConfig) -> Result<Self> {
        if y.is_empty() || rows.len() != y.len() {
            return Err(TrackerError::Regression("no training targets".to_string()));
        }
        let x = DenseMatrix::from_2d_vec(&rows.to_vec());
        let base = y.iter().sum::<f64>() / y.len() as f64;
        let mut pred = vec![base; y.len()];
        let mut stages = Vec::new();

        for stage in 0..cfg.n_estimators {
            let residual: Vec<f64> = y.iter().zip(&pred).map(|(t, p)| t - p).collect();
            if residual.iter().all(|r| r.abs() < CONVERGED) {
                debug!("Boosting converged after {} stages", stage);
                break;
            }
            let params = DecisionTreeRegressorParameters::default().with_max_depth(cfg.max_depth);
            let tree = Tree::fit(&x, &residual, params)
                .map_err(|e| TrackerError::Regression(e.to_string()))?;
            let step = tree.predict(&x).map_err(|e| TrackerError::Regression(e.to_string()))?;
            for (p, s) in pred.iter_mut().zip(&step) {
                *p += cfg.learning_rate * s;
            }
            stages.push(tree);
        }

        Ok(Self { base, learning_rate: cfg.learning_rate, stages })
    }

    pub fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let mut out = vec![self.base; rows.len()];
        if self.stages.is_empty() {
            return Ok(out);
        }
        let x = DenseMatrix::from_2d_vec(&rows.to_vec());
        for tree in &self.stages {
            let step = tree.predict(&x).map_err(|e| TrackerError::Regression(e.to_string()))?;
            for (o, s) in out.iter_mut().zip(&step) {
                *o += self.learning_rate * s;
            }
        }
        Ok(out)
    }

    pub fn n_stages(&self) -> usize {
        self.stages.len()
    }
}

/// Screen-coordinate regressor: one boosted ensemble per axis sharing a
/// scaler fit on the same calibration snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct GazeModel {
    scaler: FeatureScaler,
    fx: BoostedTrees,
    fy: BoostedTrees,
    n_samples: usize,
}

impl GazeModel {
    pub fn fit(rows: &[Vec<f64>], targets: &[ScreenPoint], cfg: &RegressorConfig) -> Result<Self> {
        if rows.len() != targets.len() {
            return Err(TrackerError::Regression(format!(
                "{} feature rows for {} targets",
                rows.len(),
                targets.len()
            )));
        }
        let scaler = FeatureScaler::fit(rows)?;
        let scaled = rows
            .iter()
            .map(|r| scaler.transform(r))
            .collect::<Result<Vec<_>>>()?;
        let tx: Vec<f64> = targets.iter().map(|p| p.x).collect();
        let ty: Vec<f64> = targets.iter().map(|p| p.y).collect();
        let fx = BoostedTrees::fit(&scaled, &tx, cfg)?;
        let fy = BoostedTrees::fit(&scaled, &ty, cfg)?;

        Ok(Self { scaler, fx, fy, n_samples: rows.len() })
    }

    pub fn predict(&self, row: &[f64]) -> Result<ScreenPoint> {
        let scaled = self.scaler.transform(row)?;
        let batch = vec![scaled];
        let px = self.fx.predict(&batch)?;
        let py = self.fy.predict(&batch)?;
        match (px.first(), py.first()) {
            (Some(&x), Some(&y)) => Ok(ScreenPoint::new(x, y)),
            _ => Err(TrackerError::Regression("empty prediction".to_string())),
        }
    }

    /// Mean absolute error per axis over the given samples.
    pub fn mae(&self, rows: &[Vec<f64>], targets: &[ScreenPoint]) -> Result<(f64, f64)> {
        let n = rows.len().max(1) as f64;
        let (mut ex, mut ey) = (0.0, 0.0);
        for (row, t) in rows.iter().zip(targets) {
            let p = self.predict(row)?;
            ex += (p.x - t.x).abs();
            ey += (p.y - t.y).abs();
        }
        Ok((ex / n, ey / n))
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn feature_dim(&self) -> usize {
        self.scaler.dim()
    }

    pub fn n_stages(&self) -> (usize, usize) {
        (self.fx.n_stages(), self.fy.n_stages())
    }

    pub fn is_feature_compatible(&self) -> bool {
        self.feature_dim() == FEATURE_DIM
    }
}
