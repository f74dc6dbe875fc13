use std::fmt;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{CalibrationConfig, RegressorConfig};
use crate::error::{Result, TrackerError};
use crate::features::{FeatureExtractor, FeatureVector, FEATURE_DIM};
use crate::pipeline::{LandmarkSource, PointOutcome, TargetPresenter};
use crate::regression::GazeModel;
use crate::types::{ScreenGeometry, ScreenPoint};

/// One representative, outlier-filtered sample per calibration target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub features: FeatureVector,
    pub target: ScreenPoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    /// Fit over the existing set plus the new samples
    Incremental,
    /// Fit over the new samples only
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl CalibrationQuality {
    /// Classifies by the mean of the two per-axis errors, in pixels.
    pub fn from_error(mean_px: f64) -> Self {
        if mean_px < 50.0 {
            CalibrationQuality::Excellent
        } else if mean_px < 100.0 {
            CalibrationQuality::Good
        } else if mean_px < 150.0 {
            CalibrationQuality::Fair
        } else {
            CalibrationQuality::Poor
        }
    }
}

impl fmt::Display for CalibrationQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CalibrationQuality::Excellent => "excellent",
            CalibrationQuality::Good => "good",
            CalibrationQuality::Fair => "fair",
            CalibrationQuality::Poor => "poor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub mode: CalibrationMode,
    pub samples: usize,
    pub failed_points: usize,
    pub mae_x: f64,
    pub mae_y: f64,
    pub quality: CalibrationQuality,
}

/// Builds the target grid from the configured screen fractions.
pub struct CalibrationLayout<'a> {
    fractions: &'a [f64],
}

impl<'a> CalibrationLayout<'a> {
    pub fn new(fractions: &'a [f64]) -> Self {
        Self { fractions }
    }

    /// Row-major grid of side `ceil(sqrt(count))`, truncated to `count`.
    pub fn targets(&self, count: usize, screen: ScreenGeometry) -> Vec<ScreenPoint> {
        if count == 0 || self.fractions.is_empty() {
            return Vec::new();
        }
        let side = (count as f64).sqrt().ceil() as usize;
        let len = self.fractions.len();
        let picked: Vec<f64> = (0..side)
            .map(|i| {
                if side == 1 {
                    self.fractions[len / 2]
                } else {
                    self.fractions[i * (len - 1) / (side - 1)]
                }
            })
            .collect();

        let mut out = Vec::with_capacity(side * side);
        for &fy in &picked {
            for &fx in &picked {
                out.push(ScreenPoint::new(fx * screen.width, fy * screen.height));
            }
        }
        out.truncate(count);
        out
    }
}

/// Keeps the `keep` fraction of rows closest to the per-dimension median
/// and averages them. Returns the average and the number of rows kept.
pub fn filter_and_average(rows: &[[f64; FEATURE_DIM]], keep: f64) -> Option<([f64; FEATURE_DIM], usize)> {
    if rows.is_empty() {
        return None;
    }
    let mut median = [0.0; FEATURE_DIM];
    for (d, m) in median.iter_mut().enumerate() {
        let mut col: Vec<f64> = rows.iter().map(|r| r[d]).collect();
        col.sort_by(|a, b| a.total_cmp(b));
        let n = col.len();
        *m = if n % 2 == 1 { col[n / 2] } else { (col[n / 2 - 1] + col[n / 2]) / 2.0 };
    }

    let mut ranked: Vec<(f64, &[f64; FEATURE_DIM])> = rows
        .iter()
        .map(|r| {
            let d = r.iter().zip(&median).map(|(v, m)| (v - m).powi(2)).sum::<f64>();
            (d, r)
        })
        .collect();
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n_keep = ((rows.len() as f64 * keep).floor() as usize).max(1);
    let mut avg = [0.0; FEATURE_DIM];
    for (_, r) in ranked.iter().take(n_keep) {
        for (a, v) in avg.iter_mut().zip(r.iter()) {
            *a += v / n_keep as f64;
        }
    }
    Some((avg, n_keep))
}

/// A fitted model together with the report describing its fit.
#[derive(Debug)]
pub struct FittedCalibration {
    pub model: GazeModel,
    pub report: CalibrationReport,
}

/// Runs calibration sessions and owns the committed calibration set.
pub struct CalibrationController {
    cfg: CalibrationConfig,
    model_cfg: RegressorConfig,
    samples: Vec<CalibrationSample>,
}

impl CalibrationController {
    pub fn new(cfg: CalibrationConfig, model_cfg: RegressorConfig) -> Self {
        Self { cfg, model_cfg, samples: Vec::new() }
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    /// Replaces the committed set, e.g. with one loaded from a profile.
    pub fn restore(&mut self, samples: Vec<CalibrationSample>) {
        self.samples = samples;
    }

    pub fn targets(&self, count: usize, screen: ScreenGeometry) -> Vec<ScreenPoint> {
        CalibrationLayout::new(&self.cfg.grid_fractions).targets(count, screen)
    }

    /// Samples one target: settle, collect, filter, average.
    pub fn collect_point(
        &self,
        source: &mut dyn LandmarkSource,
        extractor: &FeatureExtractor,
        target: ScreenPoint,
    ) -> Result<(CalibrationSample, PointOutcome)> {
        let settle = self.cfg.settle_delay_secs;
        let end = settle + self.cfg.sampling_duration_secs;
        let mut t0: Option<f64> = None;
        let mut rows: Vec<[f64; FEATURE_DIM]> = Vec::new();

        loop {
            let obs = match source.next_observation() {
                Ok(Some(obs)) => obs,
                Ok(None) => return Err(TrackerError::SourceExhausted),
                Err(e) => {
                    warn!("Source error during calibration: {}", e);
                    continue;
                }
            };
            let start = *t0.get_or_insert(obs.timestamp);
            let elapsed = obs.timestamp - start;
            if elapsed < settle {
                continue;
            }
            if elapsed >= end {
                break;
            }
            let Some(landmarks) = obs.landmarks.as_ref() else {
                continue;
            };
            match extractor.extract(landmarks) {
                Ok(f) => rows.push(f.to_array()),
                Err(e) => debug!("Calibration frame skipped: {}", e),
            }
        }

        if rows.len() < self.cfg.min_valid_frames {
            return Err(TrackerError::InsufficientPointData {
                collected: rows.len(),
                required: self.cfg.min_valid_frames,
            });
        }
        let (avg, kept) = filter_and_average(&rows, self.cfg.outlier_keep_fraction).ok_or(
            TrackerError::InsufficientPointData { collected: 0, required: self.cfg.min_valid_frames },
        )?;
        let sample = CalibrationSample { features: FeatureVector::from_array(&avg), target };
        Ok((sample, PointOutcome::Accepted { frames: rows.len(), kept }))
    }

    /// Fits a model over `samples`, refusing sets below the minimum size.
    pub fn fit(&self, samples: &[CalibrationSample], mode: CalibrationMode) -> Result<FittedCalibration> {
        let required = self.cfg.min_samples_to_fit;
        if samples.len() < required {
            return Err(TrackerError::InsufficientCalibrationData { collected: samples.len(), required });
        }
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.to_array().to_vec()).collect();
        let targets: Vec<ScreenPoint> = samples.iter().map(|s| s.target).collect();
        let model = GazeModel::fit(&rows, &targets, &self.model_cfg)?;
        let (mae_x, mae_y) = model.mae(&rows, &targets)?;
        let quality = CalibrationQuality::from_error((mae_x + mae_y) / 2.0);
        Ok(FittedCalibration {
            model,
            report: CalibrationReport {
                mode,
                samples: samples.len(),
                failed_points: 0,
                mae_x,
                mae_y,
                quality,
            },
        })
    }

    /// Runs a full calibration session. The new set is committed only when
    /// the fit succeeds; on any error the previous set is untouched.
    pub fn run(
        &mut self,
        source: &mut dyn LandmarkSource,
        extractor: &FeatureExtractor,
        presenter: &mut dyn TargetPresenter,
        screen: ScreenGeometry,
        count: usize,
        mode: CalibrationMode,
    ) -> Result<FittedCalibration> {
        let targets = self.targets(count, screen);
        info!("Starting {:?} calibration with {} targets", mode, targets.len());

        let result = self.collect_all(source, extractor, presenter, &targets);
        presenter.calibration_finished();
        let (new_samples, failed_points) = result?;

        let mut candidate = match mode {
            CalibrationMode::Incremental => self.samples.clone(),
            CalibrationMode::Full => Vec::new(),
        };
        candidate.extend(new_samples);

        let mut fitted = self.fit(&candidate, mode)?;
        fitted.report.failed_points = failed_points;
        self.samples = candidate;

        info!(
            "Calibration finished: {} samples, {} failed points, MAE x={:.1}px y={:.1}px ({})",
            fitted.report.samples,
            failed_points,
            fitted.report.mae_x,
            fitted.report.mae_y,
            fitted.report.quality
        );
        Ok(fitted)
    }

    fn collect_all(
        &self,
        source: &mut dyn LandmarkSource,
        extractor: &FeatureExtractor,
        presenter: &mut dyn TargetPresenter,
        targets: &[ScreenPoint],
    ) -> Result<(Vec<CalibrationSample>, usize)> {
        let mut samples = Vec::with_capacity(targets.len());
        let mut failed = 0;
        for (i, &target) in targets.iter().enumerate() {
            presenter.show_target(i, targets.len(), target);
            match self.collect_point(source, extractor, target) {
                Ok((sample, outcome)) => {
                    presenter.point_finished(i, outcome);
                    samples.push(sample);
                }
                Err(TrackerError::InsufficientPointData { collected, required }) => {
                    presenter.point_finished(i, PointOutcome::Rejected { collected, required });
                    failed += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok((samples, failed))
    }
}
