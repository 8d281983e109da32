//! The per-frame watch loop.
//!
//! One iteration reads a frame, compares it with the previous one, keeps the
//! pre-roll buffer warm, drives the recording session, updates the preview
//! and polls for cancellation. Nothing inside the loop runs in parallel; the
//! only blocking call is the frame read.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

use crate::alert::{AlertSink, SilentAlert};
use crate::camera::{Frame, FrameSource};
use crate::cancel::CancelToken;
use crate::cctv::CctvError;
use crate::detector::{DetectorSettings, MotionDetector};
use crate::display::{render_overlay, Display, NullDisplay};
use crate::preroll::{PreRollBuffer, DEFAULT_PRE_ROLL_SECS};
use crate::recording::{
    effective_fps, Codec, RecordingSession, RecordingSettings, SinkFactory, Transition,
    DEFAULT_DURATION, FALLBACK_FPS,
};

/// Time source for the loop. `now` measures recording windows, `wall`
/// names clip files.
pub trait Clock {
    fn now(&self) -> Instant;

    fn wall(&self) -> DateTime<Local>;
}

/// The real clocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Tunables for one watch session.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOptions {
    pub detector: DetectorSettings,
    pub output_dir: PathBuf,
    /// Clip length after the trigger
    pub duration: Duration,
    pub pre_roll_secs: f64,
    pub codec: Codec,
    /// Used when the source reports no frame rate
    pub fallback_fps: f64,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            output_dir: PathBuf::from("recordings"),
            duration: DEFAULT_DURATION,
            pre_roll_secs: DEFAULT_PRE_ROLL_SECS,
            codec: Codec::default(),
            fallback_fps: FALLBACK_FPS,
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source has no more frames
    EndOfStream,
    /// A mid-loop read failed
    SourceFailed(String),
    /// The cancel token was set
    Cancelled,
}

/// What a finished loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames_read: u64,
    /// Clips opened, in trigger order
    pub clips: Vec<PathBuf>,
    pub stop_reason: StopReason,
}

/// Owns every collaborator of one watch session.
pub struct Orchestrator<S, F, C = SystemClock>
where
    S: FrameSource,
    F: SinkFactory,
    C: Clock,
{
    source: S,
    factory: F,
    options: LoopOptions,
    cancel: CancelToken,
    display: Box<dyn Display>,
    alert: Box<dyn AlertSink>,
    clock: C,
}

impl<S: FrameSource, F: SinkFactory> Orchestrator<S, F> {
    /// A headless, silent loop on the system clock.
    pub fn new(source: S, factory: F, options: LoopOptions, cancel: CancelToken) -> Self {
        Self {
            source,
            factory,
            options,
            cancel,
            display: Box::new(NullDisplay),
            alert: Box::new(SilentAlert),
            clock: SystemClock,
        }
    }
}

impl<S: FrameSource, F: SinkFactory, C: Clock> Orchestrator<S, F, C> {
    pub fn with_display(mut self, display: Box<dyn Display>) -> Self {
        self.display = display;
        self
    }

    pub fn with_alert(mut self, alert: Box<dyn AlertSink>) -> Self {
        self.alert = alert;
        self
    }

    pub fn with_clock<C2: Clock>(self, clock: C2) -> Orchestrator<S, F, C2> {
        Orchestrator {
            source: self.source,
            factory: self.factory,
            options: self.options,
            cancel: self.cancel,
            display: self.display,
            alert: self.alert,
            clock,
        }
    }

    pub fn options(&self) -> &LoopOptions {
        &self.options
    }

    /// Run until end of stream, a read failure, cancellation or a fatal error.
    ///
    /// Whatever the outcome, the open clip is closed first, then the source
    /// is released, then the display is torn down.
    ///
    /// # Errors
    /// * `CctvError::Detector` - frames changed size mid-stream
    /// * `CctvError::Recording` - a clip could not be opened, written or closed
    pub fn run(self) -> Result<LoopSummary, CctvError> {
        let Orchestrator {
            mut source,
            factory,
            options,
            cancel,
            mut display,
            mut alert,
            clock,
        } = self;

        let resolution = source.resolution();
        let fps = effective_fps(source.fps(), options.fallback_fps);
        let mut buffer = PreRollBuffer::for_frame_rate(fps, options.pre_roll_secs);
        let detector = MotionDetector::new(options.detector);
        let mut session = RecordingSession::new(
            factory,
            RecordingSettings {
                output_dir: options.output_dir.clone(),
                duration: options.duration,
                codec: options.codec,
                fps,
                resolution,
            },
        );

        log::info!(
            "Watching {} at {} fps, pre-roll {} frames, clips of {:?} in {}",
            resolution,
            fps,
            buffer.capacity(),
            options.duration,
            options.output_dir.display()
        );

        let mut previous: Option<Frame> = None;
        let mut frames_read: u64 = 0;

        let outcome: Result<StopReason, CctvError> = loop {
            let current = match source.read() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Ok(StopReason::EndOfStream),
                Err(e) => {
                    log::error!("Frame read failed: {}", e);
                    break Ok(StopReason::SourceFailed(e.to_string()));
                }
            };
            frames_read += 1;

            if let Some(prev) = previous.as_ref() {
                buffer.push(prev);

                let signal = match detector.detect(prev, &current) {
                    Ok(signal) => signal,
                    Err(e) => break Err(e.into()),
                };

                match session.advance(
                    &signal,
                    &current,
                    &mut buffer,
                    alert.as_mut(),
                    clock.now(),
                    clock.wall(),
                ) {
                    Ok(Transition::Idle) | Ok(Transition::Recording { .. }) => {}
                    Ok(transition) => log::debug!("{:?}", transition),
                    Err(e) => break Err(e.into()),
                }

                if display.is_enabled() {
                    display.show(&render_overlay(prev, &signal.regions, session.is_active()));
                }
            }

            if cancel.is_cancelled() {
                break Ok(StopReason::Cancelled);
            }
            previous = Some(current);
        };

        let finished = session.finish();
        let clips = session.clips().to_vec();
        drop(session);
        source.release();
        display.close();

        let stop_reason = match (outcome, finished) {
            (Err(e), Err(close_err)) => {
                log::error!("{}", close_err);
                return Err(e);
            }
            (Err(e), Ok(_)) => return Err(e),
            (Ok(_), Err(close_err)) => return Err(close_err.into()),
            (Ok(reason), Ok(_)) => reason,
        };

        log::info!(
            "Stopped ({:?}) after {} frames, {} clip(s) recorded",
            stop_reason,
            frames_read,
            clips.len()
        );

        Ok(LoopSummary {
            frames_read,
            clips,
            stop_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraError, Resolution};
    use crate::recording::{FrameSink, SinkError, SinkSpec};
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::path::Path;

    struct ScriptedSource {
        frames: VecDeque<Result<Frame, CameraError>>,
        released: bool,
    }

    impl ScriptedSource {
        fn new(frames: Vec<Result<Frame, CameraError>>) -> Self {
            Self {
                frames: frames.into(),
                released: false,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn resolution(&self) -> Resolution {
            Resolution::new(4, 4)
        }

        fn fps(&self) -> f64 {
            0.0
        }

        fn read(&mut self) -> Result<Option<Frame>, CameraError> {
            if self.released {
                return Ok(None);
            }
            self.frames.pop_front().transpose()
        }

        fn release(&mut self) {
            self.released = true;
        }
    }

    struct NoSinks;

    impl SinkFactory for NoSinks {
        fn open(&mut self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, SinkError> {
            Err(SinkError::Closed {
                path: spec.path.clone(),
            })
        }
    }

    struct StepClock {
        start: Instant,
        ticks: Cell<u32>,
    }

    impl Clock for StepClock {
        fn now(&self) -> Instant {
            let t = self.ticks.get();
            self.ticks.set(t + 1);
            self.start + Duration::from_millis(100) * t
        }

        fn wall(&self) -> DateTime<Local> {
            Local::now()
        }
    }

    fn flat(sequence: u64, value: u8) -> Frame {
        Frame::from_rgb(4, 4, vec![value; 48], sequence).unwrap()
    }

    fn options(dir: &Path) -> LoopOptions {
        LoopOptions {
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_options() {
        let options = LoopOptions::default();
        assert_eq!(options.duration, Duration::from_secs(10));
        assert_eq!(options.pre_roll_secs, 0.5);
        assert_eq!(options.fallback_fps, 20.0);
        assert_eq!(options.output_dir, PathBuf::from("recordings"));
    }

    #[test]
    fn test_end_of_stream_without_motion() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new((0..5).map(|i| Ok(flat(i, 50))).collect());
        let summary = Orchestrator::new(source, NoSinks, options(dir.path()), CancelToken::new())
            .with_clock(StepClock {
                start: Instant::now(),
                ticks: Cell::new(0),
            })
            .run()
            .unwrap();
        assert_eq!(summary.frames_read, 5);
        assert!(summary.clips.is_empty());
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
    }

    #[test]
    fn test_read_error_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Ok(flat(0, 1)),
            Err(CameraError::OpenFailed("unplugged".to_string())),
            Ok(flat(2, 1)),
        ]);
        let summary = Orchestrator::new(source, NoSinks, options(dir.path()), CancelToken::new())
            .run()
            .unwrap();
        assert_eq!(summary.frames_read, 1);
        assert!(matches!(summary.stop_reason, StopReason::SourceFailed(msg) if msg.contains("unplugged")));
    }

    #[test]
    fn test_dimension_change_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = ScriptedSource::new(vec![
            Ok(flat(0, 1)),
            Ok(Frame::from_rgb(2, 2, vec![0; 12], 1).unwrap()),
        ]);
        let err = Orchestrator::new(source, NoSinks, options(dir.path()), CancelToken::new())
            .run()
            .unwrap_err();
        assert!(matches!(err, CctvError::Detector(_)));
    }

    #[test]
    fn test_pre_cancelled_token_stops_after_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let source = ScriptedSource::new((0..5).map(|i| Ok(flat(i, 9))).collect());
        let summary = Orchestrator::new(source, NoSinks, options(dir.path()), cancel)
            .run()
            .unwrap();
        assert_eq!(summary.frames_read, 1);
        assert_eq!(summary.stop_reason, StopReason::Cancelled);
    }
}
