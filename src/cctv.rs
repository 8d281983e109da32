//! Control context for the watch loop.
//!
//! The loop runs on its own named thread. The camera is opened on that
//! thread, and `start` blocks until the open has either succeeded or failed,
//! so open errors reach the caller before any frame is processed.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use crate::alert::{create_alert, AlertSettings};
use crate::camera::{CameraError, CameraSettings, FfmpegCamera, FrameSource};
use crate::cancel::CancelToken;
use crate::config::ConfigError;
use crate::detector::DetectorError;
use crate::display::{Display, MpvDisplay, NullDisplay};
use crate::orchestrator::{Clock, LoopOptions, LoopSummary, Orchestrator};
use crate::recording::{effective_fps, FfmpegSinkFactory, SessionError, SinkFactory};

/// Top-level error for a watch session.
#[derive(Debug, thiserror::Error)]
pub enum CctvError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Recording(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to start watch thread: {0}")]
    Thread(#[source] std::io::Error),
    #[error("Watch loop panicked")]
    LoopPanicked,
    #[error("Watch loop is not running")]
    NotRunning,
}

/// Everything needed to start watching with the real collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct CctvSettings {
    pub camera: CameraSettings,
    pub options: LoopOptions,
    pub alert: AlertSettings,
    /// Show the live preview window
    pub display: bool,
}

/// A running watch loop.
#[derive(Debug)]
pub struct CctvHandle {
    cancel: CancelToken,
    thread: Option<JoinHandle<Result<LoopSummary, CctvError>>>,
}

impl CctvHandle {
    /// Open the camera from `settings` and start watching.
    ///
    /// # Errors
    /// * `CctvError::Camera` - the camera could not be opened
    /// * `CctvError::Thread` - the loop thread could not be spawned
    pub fn start(settings: CctvSettings, cancel: CancelToken) -> Result<Self, CctvError> {
        Self::spawn(cancel, move |cancel| {
            let camera = FfmpegCamera::open(settings.camera)?;
            let fps = effective_fps(camera.fps(), settings.options.fallback_fps);
            let display: Box<dyn Display> = if settings.display {
                Box::new(MpvDisplay::new(fps))
            } else {
                Box::new(NullDisplay)
            };
            Ok(
                Orchestrator::new(camera, FfmpegSinkFactory, settings.options, cancel)
                    .with_display(display)
                    .with_alert(create_alert(&settings.alert)),
            )
        })
    }

    /// Start a loop assembled by `build` on the loop thread.
    ///
    /// `build` receives the loop's cancel token. If it fails, its error is
    /// returned here and no loop runs.
    pub fn spawn<B, S, F, C>(cancel: CancelToken, build: B) -> Result<Self, CctvError>
    where
        B: FnOnce(CancelToken) -> Result<Orchestrator<S, F, C>, CctvError> + Send + 'static,
        S: FrameSource,
        F: SinkFactory,
        C: Clock,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<()>();
        let token = cancel.clone();

        let thread = thread::Builder::new()
            .name("cctv-loop".to_string())
            .spawn(move || {
                let orchestrator = build(token)?;
                // The receiver may be gone if start() was abandoned
                let _ = ready_tx.send(());
                drop(ready_tx);
                orchestrator.run()
            })
            .map_err(CctvError::Thread)?;

        match ready_rx.recv() {
            Ok(()) => {
                log::debug!("Watch loop started");
                Ok(Self {
                    cancel,
                    thread: Some(thread),
                })
            }
            // The sender was dropped without a signal: the build failed
            Err(_) => match thread.join() {
                Ok(Err(e)) => Err(e),
                _ => Err(CctvError::LoopPanicked),
            },
        }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the loop to stop and wait for it to clean up.
    pub fn stop(mut self) -> Result<LoopSummary, CctvError> {
        self.cancel.cancel();
        self.join()
    }

    /// Wait for the loop to end on its own (end of stream, error, or an
    /// external cancel).
    pub fn wait(mut self) -> Result<LoopSummary, CctvError> {
        self.join()
    }

    fn join(&mut self) -> Result<LoopSummary, CctvError> {
        let Some(thread) = self.thread.take() else {
            return Err(CctvError::NotRunning);
        };
        thread.join().map_err(|_| CctvError::LoopPanicked)?
    }
}

impl Drop for CctvHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel.cancel();
            if let Err(e) = self.join() {
                log::error!("{}", e);
            }
        }
    }
}
