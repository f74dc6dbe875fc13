use std::path::PathBuf;

use clap::Parser;
use colored::*;

use gaze_cursor::blink::BlinkThreshold;
use gaze_cursor::config::AppConfig;
use gaze_cursor::persistence::ProfileStore;

/// Prints a stored profile: model summary, blink threshold and calibration history.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Profile name (default from config)
    profile: Option<String>,

    /// Profile data directory (default from config)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = if args.config.exists() {
        AppConfig::load(&args.config)?
    } else {
        AppConfig::default()
    };
    let name = args.profile.unwrap_or_else(|| config.profile.name.clone());
    let data_dir = args.data_dir.unwrap_or_else(|| PathBuf::from(&config.profile.data_dir));
    let store = ProfileStore::new(data_dir, config.blink.threshold);

    println!("{}", format!("Profile '{}' ({})", name, store.profile_dir(&name).display()).bold());

    let profile = store.load(&name)?;
    let (sx, sy) = profile.model.n_stages();
    println!("Model:");
    println!("  {:<18} {}", "samples", profile.model.n_samples());
    println!("  {:<18} {}", "features", profile.model.feature_dim());
    println!("  {:<18} x={} y={}", "boosting stages", sx, sy);

    match profile.blink {
        BlinkThreshold::Absolute { threshold } => {
            println!("Blink: absolute threshold {:.3}", threshold)
        }
        BlinkThreshold::Relative { baseline, reduction } => println!(
            "Blink: relative, baseline {:.3}, reduction {:.0}%",
            baseline,
            reduction * 100.0
        ),
    }

    let history = store.load_history(&name)?;
    if history.is_empty() {
        println!("No calibration history.");
        return Ok(());
    }
    println!("History:");
    println!(
        "  {:<16} | {:<11} | {:>7} | {:>6} | {:>8} | {:>8} | {:<9}",
        "Run", "Mode", "Samples", "Failed", "MAE x", "MAE y", "Quality"
    );
    println!("  {}", "-".repeat(82));
    for run in &history {
        println!(
            "  {:<16} | {:<11} | {:>7} | {:>6} | {:>8.1} | {:>8.1} | {:<9}",
            run.run_id,
            format!("{:?}", run.mode),
            run.samples,
            run.failed_points,
            run.mae_x,
            run.mae_y,
            run.quality.to_string()
        );
    }

    if let Some(best) = history
        .iter()
        .min_by(|a, b| (a.mae_x + a.mae_y).total_cmp(&(b.mae_x + b.mae_y)))
    {
        println!(
            "{}",
            format!(
                "Best run {} at {} (mean error {:.1}px)",
                best.run_id,
                best.timestamp.format("%Y-%m-%d %H:%M:%S"),
                (best.mae_x + best.mae_y) / 2.0
            )
            .green()
        );
    }
    Ok(())
}
