//! Camera access and frame capture.
//!
//! This module provides:
//! - Device enumeration via [`list_devices`]
//! - The [`FrameSource`] trait the motion loop pulls frames from
//! - An ffmpeg-backed camera via [`FfmpegCamera`]

mod device;
mod source;
mod types;

pub use device::list_devices;
pub use source::{build_ffmpeg_args, FfmpegCamera, FrameSource};
pub use types::{
    CameraError, CameraInfo, CameraInput, CameraSettings, CaptureFormat, Frame, Resolution,
    MAX_FPS,
};
