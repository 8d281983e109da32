//! CLI argument parsing with clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use super::parse::{parse_duration, parse_framerate, parse_pre_roll, parse_resolution};
use crate::alert::AlertMode;
use crate::camera::{CaptureFormat, Resolution};
use crate::recording::Codec;

/// Motion-triggered CCTV recorder
#[derive(Parser, Debug)]
#[command(name = "motion-recorder")]
#[command(version, about = "Record video clips when a camera sees motion", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Watch a camera and record clips when motion is detected
    Watch(WatchArgs),
    /// List available cameras
    ListDevices {
        /// Capture backend to query (default: this platform's)
        #[arg(long)]
        format: Option<CaptureFormat>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `watch`. Every flag overrides the config file.
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct WatchArgs {
    /// Camera device index or name (from list-devices)
    #[arg(long, short)]
    pub device: Option<String>,

    /// Capture backend
    #[arg(long)]
    pub format: Option<CaptureFormat>,

    /// Read frames from a video file or stream instead of a camera
    #[arg(long, short, conflicts_with = "device")]
    pub input: Option<PathBuf>,

    /// Capture resolution (WIDTHxHEIGHT)
    #[arg(long, short, value_parser = parse_resolution)]
    pub resolution: Option<Resolution>,

    /// Capture framerate (1-120)
    #[arg(long, value_parser = parse_framerate)]
    pub fps: Option<u32>,

    /// Directory clips are written to
    #[arg(long, short)]
    pub output_dir: Option<PathBuf>,

    /// Clip length in seconds after motion is first seen (at most 3600)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<f64>,

    /// Seconds of video kept from before the motion (at most 10)
    #[arg(long, value_parser = parse_pre_roll)]
    pub pre_roll: Option<f64>,

    /// Luma difference a pixel must exceed to count as changed (0-255)
    #[arg(long)]
    pub threshold: Option<u8>,

    /// Number of changed pixels (luma difference above --threshold) a region
    /// needs to count as motion. The blurred and dilated area is not counted.
    #[arg(long)]
    pub min_area: Option<u32>,

    /// Codec FourCC: XVID, MJPG, mp4v, avc1 (H264)
    #[arg(long)]
    pub codec: Option<Codec>,

    /// Mirror the camera horizontally
    #[arg(long)]
    pub mirror: bool,

    /// Run without the preview window
    #[arg(long)]
    pub no_display: bool,

    /// Alert played when recording starts
    #[arg(long)]
    pub alert: Option<AlertMode>,

    /// Config file path
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Config file path
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
    /// Create default config file
    Init,
}
