pub mod args;
pub mod blink;
pub mod calibration;
pub mod config;
pub mod error;
pub mod features;
pub mod gaze;
pub mod modes;
pub mod output;
pub mod persistence;
pub mod pipeline;
pub mod regression;
pub mod scroll;
pub mod smoothing;
pub mod tracker;
pub mod types;

pub use error::{Result, TrackerError};
pub use tracker::{FrameOutcome, RunSummary, TrackerContext, TrackerIo};
