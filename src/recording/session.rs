//! Recording session state machine.
//!
//! A session is either Idle or Active. Going Active opens a sink, writes the
//! pre-roll and the triggering frame, and fires the alert. An Active session
//! appends every frame until its fixed window has elapsed, then closes the
//! sink and returns to Idle. Motion seen while Active neither extends nor
//! restarts the window.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use super::sink::{
    ensure_output_dir, unique_clip_path, Codec, FrameSink, SinkError, SinkFactory, SinkSpec,
    FALLBACK_FPS,
};
use crate::alert::AlertSink;
use crate::camera::{Frame, Resolution};
use crate::detector::MotionSignal;
use crate::preroll::PreRollBuffer;

/// Length of a clip measured from the trigger.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

/// Longest accepted clip.
pub const MAX_DURATION: Duration = Duration::from_secs(60 * 60);

/// Errors from the recording session. All of them end the watch loop.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to start recording: {0}")]
    Open(#[source] SinkError),
    #[error("Failed to record frame: {0}")]
    Write(#[source] SinkError),
    #[error("Failed to finish recording: {0}")]
    Close(#[source] SinkError),
}

/// The frame rate clips are encoded at: `reported`, or `fallback` when the
/// source does not know its rate.
pub fn effective_fps(reported: f64, fallback: f64) -> f64 {
    if reported.is_finite() && reported > 0.0 {
        reported
    } else if fallback.is_finite() && fallback > 0.0 {
        fallback
    } else {
        FALLBACK_FPS
    }
}

/// Settings for every clip of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
    pub duration: Duration,
    pub codec: Codec,
    /// Encoding frame rate (already resolved with [`effective_fps`])
    pub fps: f64,
    /// Clip size, the source's native resolution
    pub resolution: Resolution,
}

impl RecordingSettings {
    pub fn new(output_dir: impl Into<PathBuf>, resolution: Resolution, fps: f64) -> Self {
        Self {
            output_dir: output_dir.into(),
            duration: DEFAULT_DURATION,
            codec: Codec::default(),
            fps: effective_fps(fps, FALLBACK_FPS),
            resolution,
        }
    }
}

/// What a call to [`RecordingSession::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Idle and no motion
    Idle,
    /// Idle → Active: a clip was opened
    Started {
        path: PathBuf,
        pre_roll_frames: usize,
    },
    /// Still Active; the frame was appended
    Recording { frames_written: u64 },
    /// Active → Idle: the window elapsed and the clip was closed
    Finished { path: PathBuf, frames_written: u64 },
}

struct ActiveClip {
    sink: Box<dyn FrameSink>,
    trigger_time: Instant,
    frames_written: u64,
}

impl ActiveClip {
    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.sink.write(frame)?;
        self.frames_written += 1;
        Ok(())
    }
}

enum SessionState {
    Idle,
    Active(ActiveClip),
}

/// Owns at most one open clip at a time.
pub struct RecordingSession<F: SinkFactory> {
    factory: F,
    settings: RecordingSettings,
    state: SessionState,
    clips: Vec<PathBuf>,
}

impl<F: SinkFactory> RecordingSession<F> {
    pub fn new(factory: F, settings: RecordingSettings) -> Self {
        Self {
            factory,
            settings,
            state: SessionState::Idle,
            clips: Vec::new(),
        }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    /// When the current clip was triggered, if one is open.
    pub fn trigger_time(&self) -> Option<Instant> {
        match &self.state {
            SessionState::Active(clip) => Some(clip.trigger_time),
            SessionState::Idle => None,
        }
    }

    /// Path of the open clip, if any.
    pub fn output_path(&self) -> Option<&Path> {
        match &self.state {
            SessionState::Active(clip) => Some(clip.sink.path()),
            SessionState::Idle => None,
        }
    }

    /// Every clip opened so far, in trigger order.
    pub fn clips(&self) -> &[PathBuf] {
        &self.clips
    }

    /// Drive the state machine with one frame.
    ///
    /// `now` measures the recording window; `wall` names new clips. The
    /// caller pushes the previous frame into `buffer` before calling this.
    ///
    /// # Errors
    /// Any sink failure. The session stays consistent: a clip that failed to
    /// start is closed again, and a clip that failed mid-write is still open
    /// so [`finish`](Self::finish) can close it.
    pub fn advance(
        &mut self,
        signal: &MotionSignal,
        current: &Frame,
        buffer: &mut PreRollBuffer,
        alert: &mut dyn AlertSink,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Result<Transition, SessionError> {
        if !self.is_active() {
            if signal.present {
                return self.start(current, buffer, alert, now, wall);
            }
            return Ok(Transition::Idle);
        }
        let SessionState::Active(clip) = &mut self.state else {
            return Ok(Transition::Idle);
        };

        clip.write(current).map_err(SessionError::Write)?;

        if now.saturating_duration_since(clip.trigger_time) < self.settings.duration {
            return Ok(Transition::Recording {
                frames_written: clip.frames_written,
            });
        }

        buffer.clear();
        match self.close_active()? {
            Some((path, frames_written)) => Ok(Transition::Finished {
                path,
                frames_written,
            }),
            None => Ok(Transition::Idle),
        }
    }

    /// Close the open clip, if any. Calling this while Idle is a no-op.
    pub fn finish(&mut self) -> Result<Option<PathBuf>, SessionError> {
        Ok(self.close_active()?.map(|(path, _)| path))
    }

    fn start(
        &mut self,
        current: &Frame,
        buffer: &PreRollBuffer,
        alert: &mut dyn AlertSink,
        now: Instant,
        wall: DateTime<Local>,
    ) -> Result<Transition, SessionError> {
        ensure_output_dir(&self.settings.output_dir).map_err(SessionError::Open)?;
        let spec = SinkSpec {
            path: unique_clip_path(&self.settings.output_dir, wall, self.settings.codec),
            codec: self.settings.codec,
            fps: self.settings.fps,
            resolution: self.settings.resolution,
        };
        let sink = self.factory.open(&spec).map_err(SessionError::Open)?;

        let mut clip = ActiveClip {
            sink,
            trigger_time: now,
            frames_written: 0,
        };
        let pre_roll_frames = match write_trigger(&mut clip, buffer, current) {
            Ok(n) => n,
            Err(e) => {
                if let Err(close_err) = clip.sink.close() {
                    log::warn!("Failed to close {}: {}", spec.path.display(), close_err);
                }
                return Err(SessionError::Write(e));
            }
        };

        log::info!(
            "Motion detected, recording {} ({} pre-roll frames)",
            spec.path.display(),
            pre_roll_frames
        );
        self.clips.push(spec.path.clone());
        self.state = SessionState::Active(clip);

        if let Err(e) = alert.alert() {
            log::warn!("Alert failed: {}", e);
        }

        Ok(Transition::Started {
            path: spec.path,
            pre_roll_frames,
        })
    }

    fn close_active(&mut self) -> Result<Option<(PathBuf, u64)>, SessionError> {
        let SessionState::Active(mut clip) = std::mem::replace(&mut self.state, SessionState::Idle)
        else {
            return Ok(None);
        };
        let path = clip.sink.path().to_path_buf();
        clip.sink.close().map_err(SessionError::Close)?;
        log::info!(
            "Recording saved: {} ({} frames)",
            path.display(),
            clip.frames_written
        );
        Ok(Some((path, clip.frames_written)))
    }
}

/// Pre-roll first, then the frame that triggered the clip.
fn write_trigger(
    clip: &mut ActiveClip,
    buffer: &PreRollBuffer,
    current: &Frame,
) -> Result<usize, SinkError> {
    let pre_roll = buffer.drain_into(clip.sink.as_mut())?;
    clip.frames_written += pre_roll as u64;
    clip.write(current)?;
    Ok(pre_roll)
}

impl<F: SinkFactory> Drop for RecordingSession<F> {
    fn drop(&mut self) {
        if let Err(e) = self.close_active() {
            log::error!("{}", e);
        }
    }
}
