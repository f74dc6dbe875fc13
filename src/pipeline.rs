use std::cell::Cell;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::features::LandmarkLayout;
use crate::types::{Landmarks, Observation, Point3D, ScreenGeometry, ScreenPoint};

/// Produces landmark observations, one per camera frame.
pub trait LandmarkSource {
    fn name(&self) -> String;
    /// `Ok(None)` marks the end of the stream.
    fn next_observation(&mut self) -> Result<Option<Observation>>;
}

/// Result of sampling one calibration target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointOutcome {
    Accepted { frames: usize, kept: usize },
    Rejected { collected: usize, required: usize },
}

/// Shows calibration targets to the user.
pub trait TargetPresenter {
    fn show_target(&mut self, index: usize, total: usize, target: ScreenPoint);
    fn point_finished(&mut self, index: usize, outcome: PointOutcome);
    fn calibration_finished(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Quit,
    SwitchMode,
    Recalibrate,
    FullRecalibrate,
    CalibrateBlink,
    ToggleBlinkMarker,
    Cancel,
}

impl ControlCommand {
    /// Maps a typed key to a command.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim() {
            "q" => Some(ControlCommand::Quit),
            "m" => Some(ControlCommand::SwitchMode),
            "c" => Some(ControlCommand::Recalibrate),
            "f" => Some(ControlCommand::FullRecalibrate),
            "b" => Some(ControlCommand::CalibrateBlink),
            "" | "k" => Some(ControlCommand::ToggleBlinkMarker),
            "x" => Some(ControlCommand::Cancel),
            _ => None,
        }
    }
}

/// Non-blocking user command input, polled once per loop iteration.
pub trait ControlInput {
    fn poll(&mut self) -> Option<ControlCommand>;
}

pub struct NoInput;

impl ControlInput for NoInput {
    fn poll(&mut self) -> Option<ControlCommand> {
        None
    }
}

/// Commands delivered from another thread (e.g. a stdin reader).
pub struct ChannelInput {
    rx: Receiver<ControlCommand>,
    closed: bool,
}

impl ChannelInput {
    pub fn new(rx: Receiver<ControlCommand>) -> Self {
        Self { rx, closed: false }
    }
}

impl ControlInput for ChannelInput {
    fn poll(&mut self) -> Option<ControlCommand> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }
}

/// Logs calibration targets instead of drawing them.
pub struct LogPresenter;

impl TargetPresenter for LogPresenter {
    fn show_target(&mut self, index: usize, total: usize, target: ScreenPoint) {
        info!("Look at target {}/{} at ({:.0}, {:.0})", index + 1, total, target.x, target.y);
    }

    fn point_finished(&mut self, index: usize, outcome: PointOutcome) {
        match outcome {
            PointOutcome::Accepted { frames, kept } => {
                info!("Target {} done: kept {} of {} frames", index + 1, kept, frames)
            }
            PointOutcome::Rejected { collected, required } => warn!(
                "Target {} skipped: {} valid frames, need {}",
                index + 1,
                collected,
                required
            ),
        }
    }
}

/// Gaze fraction shared between a simulated face and its presenter.
pub type SharedGaze = Rc<Cell<Option<(f64, f64)>>>;

/// Presenter that steers a [`SimulatedSource`] to look at each target.
pub struct SimulatedPresenter {
    screen: ScreenGeometry,
    gaze: SharedGaze,
}

impl TargetPresenter for SimulatedPresenter {
    fn show_target(&mut self, index: usize, total: usize, target: ScreenPoint) {
        LogPresenter.show_target(index, total, target);
        self.gaze.set(Some((target.x / self.screen.width, target.y / self.screen.height)));
    }

    fn point_finished(&mut self, index: usize, outcome: PointOutcome) {
        LogPresenter.point_finished(index, outcome);
    }

    fn calibration_finished(&mut self) {
        self.gaze.set(None);
    }
}

const SIM_POINTS: usize = 478;
const EYE_HALF_WIDTH: f32 = 0.03;
const IRIS_RADIUS: f32 = 0.005;
const OPEN_EAR: f32 = 0.3;
const CLOSED_EAR: f32 = 0.05;

/// Synthetic face for running without a camera.
///
/// While a target is shown through the paired [`SimulatedPresenter`] the
/// irises point at it; otherwise gaze follows a slow circle and the eyes
/// blink periodically.
pub struct SimulatedSource {
    layout: LandmarkLayout,
    frame_count: u64,
    fps: f64,
    gaze: SharedGaze,
    realtime: bool,
    started: Option<Instant>,
    max_frames: Option<u64>,
    jitter: f32,
    rng: StdRng,
    blink_every: u64,
    blink_frames: u64,
}

impl SimulatedSource {
    pub fn new(layout: LandmarkLayout) -> Self {
        Self {
            layout,
            frame_count: 0,
            fps: 30.0,
            gaze: Rc::new(Cell::new(None)),
            realtime: false,
            started: None,
            max_frames: None,
            jitter: 0.0,
            rng: StdRng::seed_from_u64(7),
            blink_every: 150,
            blink_frames: 5,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Uniform noise of +/- `jitter` on every coordinate, seeded.
    pub fn with_jitter(mut self, jitter: f32, seed: u64) -> Self {
        self.jitter = jitter;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Blink for `frames` frames out of every `every`; `every == 0` disables.
    pub fn with_blinks(mut self, every: u64, frames: u64) -> Self {
        self.blink_every = every;
        self.blink_frames = frames;
        self
    }

    pub fn presenter(&self, screen: ScreenGeometry) -> SimulatedPresenter {
        SimulatedPresenter { screen, gaze: Rc::clone(&self.gaze) }
    }

    /// Points the simulated gaze at a screen fraction, or releases it.
    pub fn set_gaze(&self, fraction: Option<(f64, f64)>) {
        self.gaze.set(fraction);
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = Duration::from_secs_f64(self.frame_count as f64 / self.fps);
        let elapsed = started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }

    fn synth(&mut self, fx: f64, fy: f64, ear: f32) -> Landmarks {
        let l = &self.layout;
        let mut points = vec![Point3D::new(0.5, 0.5, 0.0); SIM_POINTS.max(l.max_index() + 1)];
        points[l.head_left_ref] = Point3D::new(0.35, 0.45, 0.0);
        points[l.head_right_ref] = Point3D::new(0.65, 0.45, 0.0);

        let off_x = ((fx - 0.5) * 0.02) as f32;
        let off_y = ((fy - 0.5) * 0.012) as f32;
        let w = EYE_HALF_WIDTH;
        for (eye, cx) in [(&l.left_eye, 0.6f32), (&l.right_eye, 0.4f32)] {
            let cy = 0.45f32;
            points[eye.corner] = Point3D::new(cx - w, cy, 0.0);
            points[eye.opposite_corner] = Point3D::new(cx + w, cy, 0.0);
            let gap = ear * 2.0 * w;
            for (i, &(upper, lower)) in eye.lid_pairs.iter().enumerate() {
                let x = cx + (i as f32 - 1.0) * w / 2.0;
                points[upper] = Point3D::new(x, cy - gap / 2.0, 0.0);
                points[lower] = Point3D::new(x, cy + gap / 2.0, 0.0);
            }
            for (i, &p) in eye.iris.iter().enumerate() {
                let a = i as f32 * std::f32::consts::FRAC_PI_2;
                points[p] = Point3D::new(
                    cx + off_x + IRIS_RADIUS * a.cos(),
                    cy + off_y + IRIS_RADIUS * a.sin(),
                    0.0,
                );
            }
        }
        points[l.nose_tip] = Point3D::new(0.5, 0.55, -0.05);
        points[l.chin] = Point3D::new(0.5, 0.75, -0.02);

        if self.jitter > 0.0 {
            let j = self.jitter;
            for p in points.iter_mut() {
                p.x += self.rng.gen_range(-j..=j);
                p.y += self.rng.gen_range(-j..=j);
            }
        }
        Landmarks::new(points)
    }
}

impl LandmarkSource for SimulatedSource {
    fn name(&self) -> String {
        "Simulated face".to_string()
    }

    fn next_observation(&mut self) -> Result<Option<Observation>> {
        if let Some(max) = self.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        self.pace();

        let timestamp = self.frame_count as f64 / self.fps;
        let (fx, fy, ear) = match self.gaze.get() {
            Some((fx, fy)) => (fx, fy, OPEN_EAR),
            None => {
                // Slow circle around screen center
                let t = self.frame_count as f64 * 0.05;
                let blinking = self.blink_every > 0
                    && self.frame_count % self.blink_every >= self.blink_every.saturating_sub(self.blink_frames);
                let ear = if blinking { CLOSED_EAR } else { OPEN_EAR };
                (0.5 + 0.4 * t.cos(), 0.5 + 0.4 * t.sin(), ear)
            }
        };
        let landmarks = self.synth(fx, fy, ear);
        self.frame_count += 1;
        Ok(Some(Observation::face(timestamp, landmarks)))
    }
}

/// One line of a landmark recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub timestamp: f64,
    pub landmarks: Option<Vec<[f32; 3]>>,
}

impl From<ReplayRecord> for Observation {
    fn from(r: ReplayRecord) -> Self {
        Observation {
            timestamp: r.timestamp,
            landmarks: r.landmarks.map(|pts| {
                Landmarks::new(pts.into_iter().map(|[x, y, z]| Point3D::new(x, y, z)).collect())
            }),
        }
    }
}

/// Plays back a JSON-lines landmark recording.
pub struct ReplaySource {
    path: String,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        info!("Replaying landmarks from {}", path.display());
        Ok(Self {
            path: path.display().to_string(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

impl LandmarkSource for ReplaySource {
    fn name(&self) -> String {
        format!("Replay ({})", self.path)
    }

    fn next_observation(&mut self) -> Result<Option<Observation>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            self.line_no += 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(&line)
                .map_err(|e| TrackerError::Source(format!("line {}: {}", self.line_no, e)))?;
            return Ok(Some(record.into()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureExtractor;
    use std::io::Write;
    use std::sync::mpsc;

    #[test]
    fn test_simulated_gaze_follows_target() {
        let mut src = SimulatedSource::new(LandmarkLayout::default()).with_blinks(0, 0);
        let fe = FeatureExtractor::default();

        src.set_gaze(Some((0.1, 0.5)));
        let left = src.next_observation().unwrap().unwrap();
        src.set_gaze(Some((0.9, 0.5)));
        let right = src.next_observation().unwrap().unwrap();

        let fl = fe.extract(left.landmarks.as_ref().unwrap()).unwrap();
        let fr = fe.extract(right.landmarks.as_ref().unwrap()).unwrap();
        assert!(fr.left.rel_offset > fl.left.rel_offset);
        assert!((fl.avg_ear() - 0.3).abs() < 1e-4);
    }

    #[test]
    fn test_simulated_timestamps_and_limit() {
        let mut src = SimulatedSource::new(LandmarkLayout::default()).with_max_frames(Some(3));
        let mut stamps = Vec::new();
        while let Some(obs) = src.next_observation().unwrap() {
            stamps.push(obs.timestamp);
        }
        assert_eq!(stamps.len(), 3);
        assert!((stamps[2] - 2.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_simulated_blinks_when_free() {
        let mut src = SimulatedSource::new(LandmarkLayout::default()).with_blinks(10, 2);
        let fe = FeatureExtractor::default();
        let ears: Vec<f64> = (0..10)
            .map(|_| {
                let obs = src.next_observation().unwrap().unwrap();
                fe.extract(obs.landmarks.as_ref().unwrap()).unwrap().avg_ear()
            })
            .collect();
        assert!(ears[..8].iter().all(|e| *e > 0.25));
        assert!(ears[8..].iter().all(|e| *e < 0.1));
    }

    #[test]
    fn test_replay_reads_faces_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, r#"{{"timestamp": 0.0, "landmarks": [[0.1, 0.2, 0.0]]}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"timestamp": 0.033, "landmarks": null}}"#).unwrap();
        writeln!(f, "garbage").unwrap();
        drop(f);

        let mut src = ReplaySource::open(&path).unwrap();
        let a = src.next_observation().unwrap().unwrap();
        assert_eq!(a.landmarks.unwrap().points[0], Point3D::new(0.1, 0.2, 0.0));
        let b = src.next_observation().unwrap().unwrap();
        assert!(b.landmarks.is_none());
        assert!(matches!(src.next_observation(), Err(TrackerError::Source(_))));
        assert!(src.next_observation().unwrap().is_none());
    }

    #[test]
    fn test_channel_input_polls_without_blocking() {
        let (tx, rx) = mpsc::channel();
        let mut input = ChannelInput::new(rx);
        assert_eq!(input.poll(), None);
        tx.send(ControlCommand::SwitchMode).unwrap();
        assert_eq!(input.poll(), Some(ControlCommand::SwitchMode));
        drop(tx);
        assert_eq!(input.poll(), None);
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(ControlCommand::from_key("q\n"), Some(ControlCommand::Quit));
        assert_eq!(ControlCommand::from_key("f"), Some(ControlCommand::FullRecalibrate));
        assert_eq!(ControlCommand::from_key("z"), None);
    }
}
