use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (created with defaults if missing)
    #[arg(long, default_value = "config.json")]
    pub config: PathBuf,

    /// Profile name to load and save (overrides config)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Replay a JSON-lines landmark recording instead of the simulated face
    #[arg(long)]
    pub replay: Option<PathBuf>,

    /// Calibrate even if a saved profile exists
    #[arg(long, default_value_t = false)]
    pub calibrate: bool,

    /// Run blink calibration before tracking
    #[arg(long, default_value_t = false)]
    pub blink: bool,

    /// Number of calibration targets (default from config)
    #[arg(long)]
    pub points: Option<usize>,

    #[arg(long)]
    pub screen_width: Option<u32>,

    #[arg(long)]
    pub screen_height: Option<u32>,

    /// Pace the simulated face at 30 fps wall clock
    #[arg(long, default_value_t = false)]
    pub realtime: bool,

    /// Stop the simulated face after this many frames
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Landmark noise amplitude for the simulated face
    #[arg(long, default_value_t = 0.0)]
    pub jitter: f32,
}
