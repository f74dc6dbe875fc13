use std::io::BufRead;
use std::sync::mpsc;

use anyhow::Context;
use clap::Parser;
use colored::*;
use log::warn;

use gaze_cursor::args::Args;
use gaze_cursor::calibration::{CalibrationMode, CalibrationQuality};
use gaze_cursor::config::AppConfig;
use gaze_cursor::features::LandmarkLayout;
use gaze_cursor::output::LogActuator;
use gaze_cursor::persistence::ProfileStore;
use gaze_cursor::pipeline::{
    ChannelInput, ControlCommand, LandmarkSource, LogPresenter, ReplaySource, SimulatedSource,
    TargetPresenter,
};
use gaze_cursor::{TrackerContext, TrackerError, TrackerIo};

/// Reads single-key commands from stdin on a helper thread.
fn spawn_stdin_reader() -> ChannelInput {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match ControlCommand::from_key(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => eprintln!("Unknown command: {}", line.trim()),
            }
        }
    });
    ChannelInput::new(rx)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    // 0. Load Config (CLI overrides win over the file, then validate)
    let config = AppConfig::load_with(&args.config, |c| {
        if let Some(name) = &args.profile {
            c.profile.name = name.clone();
        }
        if let Some(w) = args.screen_width {
            c.screen.width = w;
        }
        if let Some(h) = args.screen_height {
            c.screen.height = h;
        }
    })?;
    let screen = config.screen.geometry();

    // 1. Setup landmark source
    let (mut source, mut presenter): (Box<dyn LandmarkSource>, Box<dyn TargetPresenter>) =
        match &args.replay {
            Some(path) => (
                Box::new(ReplaySource::open(path).with_context(|| format!("opening {}", path.display()))?),
                Box::new(LogPresenter),
            ),
            None => {
                let sim = SimulatedSource::new(LandmarkLayout::default())
                    .with_realtime(args.realtime)
                    .with_max_frames(args.max_frames)
                    .with_jitter(args.jitter, 42);
                let presenter = sim.presenter(screen);
                (Box::new(sim), Box::new(presenter))
            }
        };
    println!("{}", format!("Landmark source: {}", source.name()).green());

    let mut input = spawn_stdin_reader();
    let mut actuator = LogActuator::new();

    let store = ProfileStore::new(&config.profile.data_dir, config.blink.threshold);
    let profile = config.profile.name.clone();
    let mut tracker = TrackerContext::new(config.clone()).with_store(store, &profile);

    let mut io = TrackerIo {
        source: source.as_mut(),
        presenter: presenter.as_mut(),
        input: &mut input,
        actuator: &mut actuator,
    };

    // 2. Load profile or calibrate
    let need_calibration = if args.calibrate {
        true
    } else {
        match tracker.load_profile() {
            Ok(()) => {
                println!("{}", format!("Loaded profile '{}'", profile).green());
                false
            }
            Err(TrackerError::ProfileNotFound { .. }) => {
                warn!("No saved profile '{}', calibrating", profile);
                true
            }
            Err(e) => return Err(anyhow::Error::new(e).context("loading profile")),
        }
    };

    if need_calibration {
        let count = args.points.unwrap_or(config.calibration.target_count);
        println!("Calibration: look at each target until it moves ({} targets)", count);
        let report = tracker
            .calibrate(&mut io, count, CalibrationMode::Full)
            .context("calibration failed")?;
        let line = format!(
            "Calibration {}: MAE x={:.1}px y={:.1}px over {} samples ({} points failed)",
            report.quality, report.mae_x, report.mae_y, report.samples, report.failed_points
        );
        let line = match report.quality {
            CalibrationQuality::Excellent | CalibrationQuality::Good => line.green(),
            CalibrationQuality::Fair => line.yellow(),
            CalibrationQuality::Poor => line.red(),
        };
        println!("{}", line);
        tracker.save_profile().context("saving profile")?;
    }

    if args.blink {
        println!("Blink calibration: keep eyes open, then press Enter before and after each blink (x cancels)");
        match tracker.calibrate_blink(&mut *io.source, &mut *io.input) {
            Ok(th) => println!("{}", format!("Blink threshold: {}", th).green()),
            Err(e) => println!("{}", format!("Blink calibration failed: {}", e).red()),
        }
    }

    println!("Controls: [q] Quit [m] Switch Mode [c] Recalibrate [f] Full Recalibration [b] Blink Calibration");
    let summary = tracker.run(&mut io)?;
    println!(
        "{}",
        format!(
            "Processed {} frames ({} tracked), {} events, {:.1} fps",
            summary.frames,
            summary.tracked,
            summary.events,
            summary.fps()
        )
        .green()
    );
    Ok(())
}
