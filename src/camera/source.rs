//! Frame sources: the `FrameSource` trait and the ffmpeg-backed camera.

use std::io::{ErrorKind, Read};
use std::process::ChildStdout;

use super::types::{CameraError, CameraInput, CameraSettings, Frame, Resolution};
use crate::pipeline::{ChildProcess, PipelineError};

/// A camera, file or any other producer of frames in capture order.
///
/// Opening happens in the implementor's constructor so that open failures
/// reach the caller before any loop starts.
pub trait FrameSource {
    /// Size of every frame this source yields.
    fn resolution(&self) -> Resolution;

    /// Reported frame rate, or 0.0 when unknown.
    fn fps(&self) -> f64;

    /// Block until the next frame is available.
    ///
    /// Returns `Ok(None)` at end of stream.
    fn read(&mut self) -> Result<Option<Frame>, CameraError>;

    /// Release the underlying device. Safe to call more than once; reads
    /// after release return end of stream.
    fn release(&mut self);
}

/// Camera capture through an ffmpeg child process emitting rgb24 rawvideo.
///
/// The output is scaled to the configured resolution, so the frame size is
/// known before the first byte arrives.
pub struct FfmpegCamera {
    settings: CameraSettings,
    process: Option<ChildProcess>,
    stdout: Option<ChildStdout>,
    /// First frame, read during `open` to prove the device works
    pending: Option<Frame>,
    next_sequence: u64,
}

impl std::fmt::Debug for FfmpegCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegCamera")
            .field("settings", &self.settings)
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

impl FfmpegCamera {
    /// Open the camera and wait for its first frame.
    ///
    /// # Errors
    /// * `CameraError::FfmpegNotFound` - ffmpeg is not installed
    /// * `CameraError::PermissionDenied` - the OS refused camera access
    /// * `CameraError::OpenFailed` - ffmpeg exited before producing a frame
    pub fn open(settings: CameraSettings) -> Result<Self, CameraError> {
        let args = build_ffmpeg_args(&settings);
        let mut process = ChildProcess::spawn_reader("ffmpeg", &args).map_err(|e| match e {
            PipelineError::NotFound { .. } => CameraError::FfmpegNotFound,
            other => CameraError::OpenFailed(other.to_string()),
        })?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| CameraError::OpenFailed("ffmpeg stdout not captured".to_string()))?;

        let mut camera = FfmpegCamera {
            settings,
            process: Some(process),
            stdout: Some(stdout),
            pending: None,
            next_sequence: 0,
        };

        match camera.read_next()? {
            Some(frame) => {
                log::info!(
                    "Camera opened: {} at {} ({} fps)",
                    camera.settings.input,
                    camera.settings.resolution,
                    camera.settings.fps
                );
                camera.pending = Some(frame);
                Ok(camera)
            }
            None => {
                let stderr = camera
                    .process
                    .as_mut()
                    .map(|p| {
                        let _ = p.wait();
                        p.stderr_tail()
                    })
                    .unwrap_or_default();
                camera.release();
                Err(classify_open_failure(&stderr))
            }
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    fn read_next(&mut self) -> Result<Option<Frame>, CameraError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let resolution = self.settings.resolution;
        let mut buf = vec![0u8; resolution.frame_len()];
        if !read_frame_bytes(stdout, &mut buf)? {
            return Ok(None);
        }
        let frame = Frame::from_rgb(resolution.width, resolution.height, buf, self.next_sequence)
            .ok_or_else(|| CameraError::OpenFailed("frame buffer size mismatch".to_string()))?;
        self.next_sequence += 1;
        Ok(Some(frame))
    }
}

impl FrameSource for FfmpegCamera {
    fn resolution(&self) -> Resolution {
        self.settings.resolution
    }

    fn fps(&self) -> f64 {
        f64::from(self.settings.fps)
    }

    fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.read_next()
    }

    fn release(&mut self) {
        self.pending = None;
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.shutdown() {
                log::warn!("Failed to stop camera process: {}", e);
            }
            log::debug!("Camera released after {} frames", self.next_sequence);
        }
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.release();
    }
}

/// Build the ffmpeg arguments that turn `settings` into an rgb24 stream on stdout.
pub fn build_ffmpeg_args(settings: &CameraSettings) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    match &settings.input {
        CameraInput::Device { format, device } => {
            args.extend(["-f".to_string(), format.ffmpeg_name().to_string()]);
            if settings.fps > 0 {
                args.extend(["-framerate".to_string(), settings.fps.to_string()]);
            }
            args.extend([
                "-video_size".to_string(),
                settings.resolution.to_string(),
                "-i".to_string(),
                format.device_spec(device),
            ]);
        }
        CameraInput::File(path) => {
            // Play files at their native rate so timing matches a live camera
            args.extend([
                "-re".to_string(),
                "-i".to_string(),
                path.display().to_string(),
            ]);
        }
    }

    let mut filters = Vec::new();
    if settings.mirror {
        filters.push("hflip".to_string());
    }
    filters.push(format!(
        "scale={}:{}",
        settings.resolution.width, settings.resolution.height
    ));

    args.extend(["-an".to_string(), "-vf".to_string(), filters.join(",")]);
    if settings.fps > 0 {
        args.extend(["-r".to_string(), settings.fps.to_string()]);
    }
    args.extend(
        ["-pix_fmt", "rgb24", "-f", "rawvideo", "-"]
            .iter()
            .map(|s| s.to_string()),
    );
    args
}

/// Fill `buf` with exactly one frame.
///
/// Returns `Ok(false)` at end of stream. A truncated trailing frame counts
/// as end of stream.
pub(crate) fn read_frame_bytes(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    log::debug!("Discarding truncated frame ({} of {} bytes)", filled, buf.len());
                }
                return Ok(false);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

/// Map ffmpeg's stderr from a failed open into a camera error.
fn classify_open_failure(stderr: &str) -> CameraError {
    let msg = stderr.to_lowercase();
    if msg.contains("permission")
        || msg.contains("denied")
        || msg.contains("authorization")
        || msg.contains("not authorized")
    {
        CameraError::PermissionDenied
    } else if msg.contains("no such file or directory") || msg.contains("could not find") {
        CameraError::DeviceNotFound(stderr.lines().last().unwrap_or_default().to_string())
    } else if stderr.trim().is_empty() {
        CameraError::OpenFailed("ffmpeg produced no frames".to_string())
    } else {
        CameraError::OpenFailed(stderr.trim().to_string())
    }
}
