use std::collections::VecDeque;
use std::fmt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::BlinkConfig;
use crate::error::{Result, TrackerError};
use crate::modes::{InteractionMode, ModeController};

/// How a frame's average EAR is judged closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlinkThreshold {
    /// Closed when EAR drops below a fixed value
    Absolute { threshold: f64 },
    /// Closed when EAR drops by `reduction` relative to the recent open-eye
    /// level. `baseline` records the calibrated open-eye EAR.
    Relative { baseline: f64, reduction: f64 },
}

impl Default for BlinkThreshold {
    fn default() -> Self {
        BlinkThreshold::Absolute { threshold: 0.2 }
    }
}

impl fmt::Display for BlinkThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlinkThreshold::Absolute { threshold } => write!(f, "absolute < {:.3}", threshold),
            BlinkThreshold::Relative { baseline, reduction } => {
                write!(f, "relative {:.0}% below baseline {:.3}", reduction * 100.0, baseline)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InteractionEvent {
    Click,
    RightClick,
    DragToggle { engaged: bool },
    ModeSwitch(InteractionMode),
}

impl InteractionEvent {
    pub fn name(&self) -> String {
        match self {
            InteractionEvent::Click => "click".to_string(),
            InteractionEvent::RightClick => "right_click".to_string(),
            InteractionEvent::DragToggle { .. } => "drag_toggle".to_string(),
            InteractionEvent::ModeSwitch(mode) => format!("mode_switch_{}", mode),
        }
    }
}

/// Linearly interpolated percentile (0..=100) of an unsorted slice.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Debounces the EAR signal into click, right-click, drag and mode events.
pub struct BlinkStateMachine {
    cfg: BlinkConfig,
    threshold: BlinkThreshold,
    history: VecDeque<f64>,
    blink_start: Option<f64>,
    last_accepted: Option<f64>,
    dragging: bool,
}

impl BlinkStateMachine {
    pub fn new(cfg: BlinkConfig) -> Self {
        let threshold = cfg.threshold;
        let capacity = cfg.history_capacity;
        Self {
            cfg,
            threshold,
            history: VecDeque::with_capacity(capacity),
            blink_start: None,
            last_accepted: None,
            dragging: false,
        }
    }

    pub fn threshold(&self) -> BlinkThreshold {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: BlinkThreshold) {
        info!("Blink threshold set to {}", threshold);
        self.threshold = threshold;
        self.history.clear();
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clears the drag flag, returning whether a drag was held.
    pub fn release_drag(&mut self) -> bool {
        std::mem::replace(&mut self.dragging, false)
    }

    fn push_history(&mut self, ear: f64) {
        let cap = self.cfg.history_capacity.max(1);
        while self.history.len() >= cap {
            self.history.pop_front();
        }
        self.history.push_back(ear);
    }

    fn is_closed(&self, ear: f64) -> bool {
        match self.threshold {
            BlinkThreshold::Absolute { threshold } => ear < threshold,
            BlinkThreshold::Relative { reduction, .. } => {
                if self.history.len() < self.cfg.min_history {
                    return false;
                }
                let samples: Vec<f64> = self.history.iter().copied().collect();
                match percentile(&samples, self.cfg.baseline_percentile) {
                    Some(baseline) => ear < baseline * (1.0 - reduction),
                    None => false,
                }
            }
        }
    }

    pub fn update(
        &mut self,
        left_ear: f64,
        right_ear: f64,
        now: f64,
        modes: &mut ModeController,
    ) -> Option<InteractionEvent> {
        let ear = (left_ear + right_ear) / 2.0;
        self.push_history(ear);
        let closed = self.is_closed(ear);

        match (self.blink_start, closed) {
            (None, true) => {
                debug!("Blink started at {:.3}s (ear {:.3})", now, ear);
                self.blink_start = Some(now);
                None
            }
            (Some(start), false) => {
                self.blink_start = None;
                let duration = now - start;
                if let Some(last) = self.last_accepted {
                    if now - last < self.cfg.cooldown_secs {
                        debug!("Blink of {:.3}s suppressed by cooldown", duration);
                        return None;
                    }
                }
                self.last_accepted = Some(now);
                self.classify(duration, modes)
            }
            _ => None,
        }
    }

    fn classify(&mut self, duration: f64, modes: &mut ModeController) -> Option<InteractionEvent> {
        let mode = modes.mode();
        let event = if duration >= self.cfg.long_blink_secs {
            Some(InteractionEvent::ModeSwitch(modes.switch()))
        } else if duration < self.cfg.short_blink_secs {
            match mode {
                InteractionMode::Cursor | InteractionMode::Click => Some(InteractionEvent::Click),
                InteractionMode::Drag => {
                    self.dragging = !self.dragging;
                    Some(InteractionEvent::DragToggle { engaged: self.dragging })
                }
                InteractionMode::Scroll => None,
            }
        } else {
            match mode {
                InteractionMode::Cursor | InteractionMode::Click => Some(InteractionEvent::RightClick),
                _ => None,
            }
        };
        debug!("Blink of {:.3}s in {} mode -> {:?}", duration, mode, event);
        event
    }
}

/// Phase of an interactive blink calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkCalibrationPhase {
    Baseline,
    Marking,
    Done,
}

/// Collects an open-eye baseline and user-marked blinks, then derives a
/// personal [`BlinkThreshold`].
pub struct BlinkCalibrator {
    cfg: BlinkConfig,
    started_at: Option<f64>,
    phase: BlinkCalibrationPhase,
    baseline: Vec<f64>,
    marking: bool,
    current_min: Option<f64>,
    blink_minima: Vec<f64>,
}

impl BlinkCalibrator {
    pub fn new(cfg: BlinkConfig) -> Self {
        Self {
            cfg,
            started_at: None,
            phase: BlinkCalibrationPhase::Baseline,
            baseline: Vec::new(),
            marking: false,
            current_min: None,
            blink_minima: Vec::new(),
        }
    }

    pub fn phase(&self) -> BlinkCalibrationPhase {
        self.phase
    }

    pub fn blinks_recorded(&self) -> usize {
        self.blink_minima.len()
    }

    pub fn observe(&mut self, now: f64, ear: f64) -> BlinkCalibrationPhase {
        let start = *self.started_at.get_or_insert(now);
        match self.phase {
            BlinkCalibrationPhase::Baseline => {
                if now - start >= self.cfg.baseline_duration_secs {
                    info!(
                        "Blink baseline collected ({} frames); mark {} blinks",
                        self.baseline.len(),
                        self.cfg.calibration_blinks
                    );
                    self.phase = BlinkCalibrationPhase::Marking;
                } else {
                    self.baseline.push(ear);
                }
            }
            BlinkCalibrationPhase::Marking => {
                if self.marking {
                    self.current_min = Some(self.current_min.map_or(ear, |m| m.min(ear)));
                }
            }
            BlinkCalibrationPhase::Done => {}
        }
        self.phase
    }

    /// Starts or ends a marked blink. Ignored outside the marking phase.
    pub fn toggle_marker(&mut self) {
        if self.phase != BlinkCalibrationPhase::Marking {
            return;
        }
        if self.marking {
            self.marking = false;
            if let Some(min) = self.current_min.take() {
                self.blink_minima.push(min);
                info!("Blink {} recorded (min ear {:.3})", self.blink_minima.len(), min);
            }
            if self.blink_minima.len() >= self.cfg.calibration_blinks {
                self.phase = BlinkCalibrationPhase::Done;
            }
        } else {
            self.marking = true;
        }
    }

    pub fn finish(self) -> Result<BlinkThreshold> {
        let baseline_required = self.cfg.min_baseline_samples;
        let blinks_required = self.cfg.min_marked_blinks;
        if self.baseline.len() <= baseline_required || self.blink_minima.len() < blinks_required {
            return Err(TrackerError::InsufficientBlinkData {
                baseline: self.baseline.len(),
                baseline_required,
                blinks: self.blink_minima.len(),
                blinks_required,
            });
        }

        let mut sorted = self.baseline;
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let trimmed = &sorted[n / 10..(n * 9) / 10];
        let baseline = trimmed.iter().sum::<f64>() / trimmed.len() as f64;
        let blink_min = self.blink_minima.iter().sum::<f64>() / self.blink_minima.len() as f64;

        let threshold = if (baseline - blink_min).abs() < self.cfg.relative_switch_margin {
            BlinkThreshold::Relative {
                baseline,
                reduction: (1.0 - blink_min / baseline) * self.cfg.reduction_scale,
            }
        } else {
            BlinkThreshold::Absolute { threshold: (baseline + blink_min) / 2.0 }
        };
        info!(
            "Blink calibration: baseline {:.3}, blink min {:.3} -> {}",
            baseline, blink_min, threshold
        );
        Ok(threshold)
    }
}
