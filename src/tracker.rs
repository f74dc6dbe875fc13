use log::{debug, info, trace, warn};

use crate::blink::{BlinkCalibrationPhase, BlinkCalibrator, BlinkStateMachine, BlinkThreshold, InteractionEvent};
use crate::calibration::{CalibrationController, CalibrationMode, CalibrationReport};
use crate::config::AppConfig;
use crate::error::{Result, TrackerError};
use crate::features::FeatureExtractor;
use crate::gaze::GazeEstimator;
use crate::modes::{InteractionMode, ModeController};
use crate::output::Actuator;
use crate::persistence::{CalibrationRun, ProfileStore};
use crate::pipeline::{ControlCommand, ControlInput, LandmarkSource, TargetPresenter};
use crate::scroll::ScrollController;
use crate::smoothing::MotionSmoother;
use crate::types::{Observation, ScreenGeometry, ScreenPoint};

/// The collaborators a tracking session talks to.
pub struct TrackerIo<'a> {
    pub source: &'a mut dyn LandmarkSource,
    pub presenter: &'a mut dyn TargetPresenter,
    pub input: &'a mut dyn ControlInput,
    pub actuator: &'a mut dyn Actuator,
}

#[derive(Debug)]
pub enum FrameOutcome {
    NoFace,
    Skipped(TrackerError),
    Tracked {
        cursor: ScreenPoint,
        event: Option<InteractionEvent>,
        scroll: Option<i32>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub tracked: u64,
    pub no_face: u64,
    pub skipped: u64,
    pub source_errors: u64,
    pub events: u64,
    /// Observation time covered by the run, in seconds
    pub duration_secs: f64,
    pub quit: bool,
}

impl RunSummary {
    pub fn fps(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.frames as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Owns all per-session tracking state.
pub struct TrackerContext {
    cfg: AppConfig,
    screen: ScreenGeometry,
    extractor: FeatureExtractor,
    calibration: CalibrationController,
    estimator: GazeEstimator,
    smoother: MotionSmoother,
    blink: BlinkStateMachine,
    modes: ModeController,
    scroll: ScrollController,
    store: Option<(ProfileStore, String)>,
}

impl TrackerContext {
    pub fn new(cfg: AppConfig) -> Self {
        let screen = cfg.screen.geometry();
        Self {
            screen,
            extractor: FeatureExtractor::default(),
            calibration: CalibrationController::new(cfg.calibration.clone(), cfg.model.clone()),
            estimator: GazeEstimator::new(),
            smoother: MotionSmoother::new(cfg.smoothing.smoothing_factor, screen),
            blink: BlinkStateMachine::new(cfg.blink.clone()),
            modes: ModeController::new(cfg.modes.clone()),
            scroll: ScrollController::new(cfg.scroll.clone(), screen),
            store: None,
            cfg,
        }
    }

    pub fn with_store(mut self, store: ProfileStore, profile: &str) -> Self {
        self.store = Some((store, profile.to_string()));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.cfg
    }

    pub fn screen(&self) -> ScreenGeometry {
        self.screen
    }

    pub fn mode(&self) -> InteractionMode {
        self.modes.mode()
    }

    /// Advances to the next mode, letting go of any held drag first.
    pub fn switch_mode(&mut self, actuator: &mut dyn Actuator) -> InteractionMode {
        self.release_held_drag(actuator);
        self.modes.switch()
    }

    fn release_held_drag(&mut self, actuator: &mut dyn Actuator) {
        if self.blink.release_drag() {
            info!("Releasing held drag");
            actuator.mouse_up();
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.estimator.is_calibrated()
    }

    pub fn is_dragging(&self) -> bool {
        self.blink.is_dragging()
    }

    pub fn blink_threshold(&self) -> BlinkThreshold {
        self.blink.threshold()
    }

    pub fn calibration_samples(&self) -> usize {
        self.calibration.samples().len()
    }

    pub fn estimator(&self) -> &GazeEstimator {
        &self.estimator
    }

    /// Processes one observation end to end.
    pub fn step(&mut self, obs: &Observation, actuator: &mut dyn Actuator) -> FrameOutcome {
        let Some(landmarks) = obs.landmarks.as_ref() else {
            return FrameOutcome::NoFace;
        };
        let features = match self.extractor.extract(landmarks) {
            Ok(f) => f,
            Err(e) => {
                debug!("Frame at {:.3}s skipped: {}", obs.timestamp, e);
                return FrameOutcome::Skipped(e);
            }
        };
        let raw = match self.estimator.estimate(&features) {
            Ok(p) => p,
            Err(e) => return FrameOutcome::Skipped(e),
        };

        let cursor = self.screen.clamp(self.smoother.filter(raw));
        actuator.move_cursor(cursor.x, cursor.y, self.modes.speed());

        let event = self.blink.update(
            features.left.ear,
            features.right.ear,
            obs.timestamp,
            &mut self.modes,
        );
        if let Some(ev) = event {
            Self::actuate(ev, actuator);
            if matches!(ev, InteractionEvent::ModeSwitch(_)) {
                self.release_held_drag(actuator);
            }
        }

        let scroll = self.scroll.steps(self.modes.mode(), cursor.y);
        if let Some(amount) = scroll {
            actuator.scroll(amount);
        }

        FrameOutcome::Tracked { cursor, event, scroll }
    }

    fn actuate(event: InteractionEvent, actuator: &mut dyn Actuator) {
        info!("Event: {}", event.name());
        match event {
            InteractionEvent::Click => actuator.click(),
            InteractionEvent::RightClick => actuator.right_click(),
            InteractionEvent::DragToggle { engaged: true } => actuator.mouse_down(),
            InteractionEvent::DragToggle { engaged: false } => actuator.mouse_up(),
            InteractionEvent::ModeSwitch(_) => {}
        }
    }

    /// Main loop. Runs until the source ends or the user quits.
    pub fn run(&mut self, io: &mut TrackerIo) -> Result<RunSummary> {
        if !self.estimator.is_calibrated() {
            return Err(TrackerError::ModelNotFit);
        }
        info!("Tracking from {} in {} mode", io.source.name(), self.modes.mode());
        self.smoother.reset();

        let mut summary = RunSummary::default();
        let mut first_ts: Option<f64> = None;
        let mut window: Option<(f64, u64)> = None;

        loop {
            match io.source.next_observation() {
                Ok(Some(obs)) => {
                    summary.frames += 1;
                    let start = *first_ts.get_or_insert(obs.timestamp);
                    summary.duration_secs = obs.timestamp - start;

                    match self.step(&obs, &mut *io.actuator) {
                        FrameOutcome::NoFace => summary.no_face += 1,
                        FrameOutcome::Skipped(_) => summary.skipped += 1,
                        FrameOutcome::Tracked { event, .. } => {
                            summary.tracked += 1;
                            if event.is_some() {
                                summary.events += 1;
                            }
                        }
                    }

                    let (w_start, w_frames) = *window.get_or_insert((obs.timestamp, summary.frames));
                    let elapsed = obs.timestamp - w_start;
                    if elapsed >= 1.0 {
                        trace!("{:.1} fps", (summary.frames - w_frames) as f64 / elapsed);
                        window = Some((obs.timestamp, summary.frames));
                    }
                }
                Ok(None) => {
                    info!("Landmark source finished");
                    break;
                }
                Err(e) => {
                    summary.source_errors += 1;
                    warn!("Source error: {}", e);
                }
            }

            let Some(cmd) = io.input.poll() else {
                continue;
            };
            match cmd {
                ControlCommand::Quit => {
                    summary.quit = true;
                    break;
                }
                ControlCommand::SwitchMode => {
                    self.switch_mode(&mut *io.actuator);
                }
                ControlCommand::Recalibrate => {
                    let count = self.cfg.calibration.quick_target_count;
                    if let Err(e) = self.calibrate(io, count, CalibrationMode::Incremental) {
                        warn!("Recalibration failed, keeping previous model: {}", e);
                    }
                }
                ControlCommand::FullRecalibrate => {
                    let count = self.cfg.calibration.full_target_count;
                    match self.calibrate(io, count, CalibrationMode::Full) {
                        Ok(_) if self.store.is_some() => {
                            if let Err(e) = self.save_profile() {
                                warn!("Could not save profile: {}", e);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Full calibration failed, keeping previous model: {}", e),
                    }
                }
                ControlCommand::CalibrateBlink => {
                    if let Err(e) = self.calibrate_blink(&mut *io.source, &mut *io.input) {
                        warn!("Blink calibration failed: {}", e);
                    }
                }
                ControlCommand::ToggleBlinkMarker | ControlCommand::Cancel => {}
            }
        }

        self.release_held_drag(&mut *io.actuator);
        info!(
            "Session ended: {} frames ({} tracked, {} no face, {} skipped), {} events, {:.1} fps",
            summary.frames,
            summary.tracked,
            summary.no_face,
            summary.skipped,
            summary.events,
            summary.fps()
        );
        Ok(summary)
    }

    /// Calibrates the gaze model. Installs it only if the fit succeeds.
    pub fn calibrate(
        &mut self,
        io: &mut TrackerIo,
        count: usize,
        mode: CalibrationMode,
    ) -> Result<CalibrationReport> {
        let fitted = self.calibration.run(
            &mut *io.source,
            &self.extractor,
            &mut *io.presenter,
            self.screen,
            count,
            mode,
        )?;
        self.estimator.install(fitted.model);
        self.smoother.reset();

        if let Some((store, name)) = &self.store {
            if let Err(e) = store.append_history(name, CalibrationRun::from_report(&fitted.report)) {
                warn!("Could not record calibration history: {}", e);
            }
        }
        Ok(fitted.report)
    }

    /// Interactive blink calibration: an open-eye baseline, then blinks
    /// marked through `ToggleBlinkMarker`.
    pub fn calibrate_blink(
        &mut self,
        source: &mut dyn LandmarkSource,
        input: &mut dyn ControlInput,
    ) -> Result<BlinkThreshold> {
        let mut cal = BlinkCalibrator::new(self.cfg.blink.clone());
        info!(
            "Blink calibration: keep your eyes open for {:.0}s",
            self.cfg.blink.baseline_duration_secs
        );

        loop {
            match source.next_observation() {
                Ok(Some(obs)) => {
                    if let Some(lm) = obs.landmarks.as_ref() {
                        match self.extractor.extract(lm) {
                            Ok(f) => {
                                cal.observe(obs.timestamp, f.avg_ear());
                            }
                            Err(e) => debug!("Blink calibration frame skipped: {}", e),
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => warn!("Source error: {}", e),
            }
            if cal.phase() == BlinkCalibrationPhase::Done {
                break;
            }
            match input.poll() {
                Some(ControlCommand::ToggleBlinkMarker) => cal.toggle_marker(),
                Some(ControlCommand::Cancel) | Some(ControlCommand::Quit) => {
                    info!("Blink calibration stopped after {} blinks", cal.blinks_recorded());
                    break;
                }
                _ => {}
            }
        }

        let threshold = cal.finish()?;
        self.blink.set_threshold(threshold);
        if let Some((store, name)) = &self.store {
            if let Err(e) = store.save_blink(name, &threshold) {
                warn!("Could not save blink calibration: {}", e);
            }
        }
        Ok(threshold)
    }

    pub fn save_profile(&self) -> Result<()> {
        let model = self.estimator.model().ok_or(TrackerError::ModelNotFit)?;
        let (store, name) = self
            .store
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidConfig("no profile store attached".to_string()))?;
        store.save(name, model, &self.blink.threshold(), self.calibration.samples())
    }

    pub fn load_profile(&mut self) -> Result<()> {
        let (store, name) = self
            .store
            .as_ref()
            .ok_or_else(|| TrackerError::InvalidConfig("no profile store attached".to_string()))?;
        let profile = store.load(name)?;
        self.estimator.install(profile.model);
        self.blink.set_threshold(profile.blink);
        self.calibration.restore(profile.samples);
        self.smoother.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmarks, Point3D};

    #[derive(Default)]
    struct Recorder {
        moves: usize,
    }

    impl Actuator for Recorder {
        fn move_cursor(&mut self, _x: f64, _y: f64, _duration: f64) {
            self.moves += 1;
        }
        fn click(&mut self) {}
        fn right_click(&mut self) {}
        fn mouse_down(&mut self) {}
        fn mouse_up(&mut self) {}
        fn scroll(&mut self, _amount: i32) {}
    }

    #[test]
    fn test_no_face_leaves_state_alone() {
        let mut ctx = TrackerContext::new(AppConfig::default());
        let mut act = Recorder::default();
        let out = ctx.step(&Observation::miss(0.0), &mut act);
        assert!(matches!(out, FrameOutcome::NoFace));
        assert_eq!(act.moves, 0);
    }

    #[test]
    fn test_short_frame_is_skipped() {
        let mut ctx = TrackerContext::new(AppConfig::default());
        let mut act = Recorder::default();
        let obs = Observation::face(0.0, Landmarks::new(vec![Point3D::default(); 10]));
        let out = ctx.step(&obs, &mut act);
        assert!(matches!(out, FrameOutcome::Skipped(TrackerError::MissingLandmark { .. })));
    }

    #[test]
    fn test_save_without_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = TrackerContext::new(AppConfig::default())
            .with_store(ProfileStore::new(dir.path(), BlinkThreshold::default()), "x");
        assert!(matches!(ctx.save_profile(), Err(TrackerError::ModelNotFit)));
    }
}
