//! motion-recorder library crate.
//!
//! Watches a camera, detects motion by differencing consecutive frames and
//! records a clip with a short pre-roll each time motion starts.

pub mod alert;
pub mod camera;
pub mod cancel;
pub mod cctv;
pub mod cli;
pub mod config;
pub mod detector;
pub mod display;
pub mod hotkeys;
pub mod orchestrator;
pub mod pipeline;
pub mod preroll;
pub mod recording;

pub use cancel::CancelToken;
pub use cctv::{CctvError, CctvHandle, CctvSettings};
pub use orchestrator::{Clock, LoopOptions, LoopSummary, Orchestrator, StopReason, SystemClock};
