//! Motion clip recording.
//!
//! This module provides:
//! - `FrameSink` / `SinkFactory`: where clip frames are written
//! - `FfmpegSink`: a sink that encodes through an ffmpeg child process
//! - `RecordingSession`: the Idle/Active state machine that owns a sink

pub mod session;
pub mod sink;

pub use session::{
    effective_fps, RecordingSession, RecordingSettings, SessionError, Transition,
    DEFAULT_DURATION, MAX_DURATION,
};
pub use sink::{
    clip_file_name, ensure_output_dir, unique_clip_path, Codec, FfmpegSink, FfmpegSinkFactory,
    FrameSink, SinkError, SinkFactory, SinkSpec, FALLBACK_FPS,
};
