//! Clip sinks: where frames go while a recording is active.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ChildStdin;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::Deserialize;

use crate::camera::{Frame, Resolution};
use crate::pipeline::{ChildProcess, PipelineError};

/// Frame rate used when the source does not report one.
pub const FALLBACK_FPS: f64 = 20.0;

/// Prefix of every clip file name.
pub const CLIP_PREFIX: &str = "motion_";

/// Errors from opening, writing or closing a sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Failed to create output directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to start encoder for '{path}': {source}")]
    Spawn {
        path: PathBuf,
        source: PipelineError,
    },
    #[error("Failed to write frame to '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Frame size {actual} does not match clip size {expected}")]
    FrameSize {
        expected: Resolution,
        actual: Resolution,
    },
    #[error("Encoder failed to finalize '{path}': {source}")]
    Finalize {
        path: PathBuf,
        source: PipelineError,
    },
    #[error("Sink for '{path}' is already closed")]
    Closed { path: PathBuf },
}

/// Video codec, identified by its four-character tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Codec {
    /// MPEG-4 Part 2 tagged XVID, in AVI
    #[default]
    Xvid,
    /// Motion JPEG, in AVI
    Mjpg,
    /// MPEG-4 Part 2, in MP4
    Mp4v,
    /// H.264, in MP4
    Avc1,
}

impl Codec {
    pub fn fourcc(&self) -> &'static str {
        match self {
            Codec::Xvid => "XVID",
            Codec::Mjpg => "MJPG",
            Codec::Mp4v => "mp4v",
            Codec::Avc1 => "avc1",
        }
    }

    /// Container extension written for this codec.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Xvid | Codec::Mjpg => "avi",
            Codec::Mp4v | Codec::Avc1 => "mp4",
        }
    }

    /// ffmpeg output options selecting the encoder.
    pub fn encoder_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            Codec::Xvid => &["-c:v", "mpeg4", "-vtag", "XVID", "-q:v", "5", "-pix_fmt", "yuv420p"],
            Codec::Mjpg => &["-c:v", "mjpeg", "-q:v", "5", "-pix_fmt", "yuvj420p"],
            Codec::Mp4v => &["-c:v", "mpeg4", "-q:v", "5", "-pix_fmt", "yuv420p"],
            Codec::Avc1 => &["-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.fourcc())
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xvid" => Ok(Codec::Xvid),
            "mjpg" => Ok(Codec::Mjpg),
            "mp4v" => Ok(Codec::Mp4v),
            "avc1" | "h264" => Ok(Codec::Avc1),
            _ => Err(format!(
                "Unknown codec '{}'. Available codecs: XVID, MJPG, mp4v, avc1 (H264)",
                s
            )),
        }
    }
}

impl TryFrom<String> for Codec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Everything needed to open a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkSpec {
    pub path: PathBuf,
    pub codec: Codec,
    pub fps: f64,
    pub resolution: Resolution,
}

/// A persistent destination for the frames of one clip.
pub trait FrameSink {
    fn path(&self) -> &Path;

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Finalize the clip. Closing an already-closed sink is a no-op.
    fn close(&mut self) -> Result<(), SinkError>;

    fn is_closed(&self) -> bool;
}

/// Opens sinks for new clips.
pub trait SinkFactory {
    fn open(&mut self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, SinkError>;
}

/// File name for a clip triggered at `at`: `motion_YYYYMMDD_HHMMSS.<ext>`.
pub fn clip_file_name(at: DateTime<Local>, codec: Codec) -> String {
    format!(
        "{}{}.{}",
        CLIP_PREFIX,
        at.format("%Y%m%d_%H%M%S"),
        codec.extension()
    )
}

/// Path for a new clip in `dir`, adding `_N` when the name is taken.
pub fn unique_clip_path(dir: &Path, at: DateTime<Local>, codec: Codec) -> PathBuf {
    let path = dir.join(clip_file_name(at, codec));
    if !path.exists() {
        return path;
    }
    let stem = format!("{}{}", CLIP_PREFIX, at.format("%Y%m%d_%H%M%S"));
    (1u32..)
        .map(|n| dir.join(format!("{}_{}.{}", stem, n, codec.extension())))
        .find(|p| !p.exists())
        .unwrap_or(path)
}

/// Create the output directory if it does not exist yet.
pub fn ensure_output_dir(dir: &Path) -> Result<(), SinkError> {
    std::fs::create_dir_all(dir).map_err(|e| SinkError::CreateDir {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// Opens [`FfmpegSink`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegSinkFactory;

impl SinkFactory for FfmpegSinkFactory {
    fn open(&mut self, spec: &SinkSpec) -> Result<Box<dyn FrameSink>, SinkError> {
        Ok(Box::new(FfmpegSink::open(spec)?))
    }
}

/// A clip encoded by an ffmpeg child process fed rgb24 frames on stdin.
#[derive(Debug)]
pub struct FfmpegSink {
    path: PathBuf,
    resolution: Resolution,
    process: Option<ChildProcess>,
    stdin: Option<ChildStdin>,
    frames_written: u64,
}

impl FfmpegSink {
    pub fn open(spec: &SinkSpec) -> Result<Self, SinkError> {
        if let Some(dir) = spec.path.parent() {
            ensure_output_dir(dir)?;
        }

        let args = build_encoder_args(spec);
        let mut process =
            ChildProcess::spawn_writer("ffmpeg", &args).map_err(|e| SinkError::Spawn {
                path: spec.path.clone(),
                source: e,
            })?;
        let stdin = process.take_stdin();

        Ok(Self {
            path: spec.path.clone(),
            resolution: spec.resolution,
            process: Some(process),
            stdin,
            frames_written: 0,
        })
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for FfmpegSink {
    fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, frame: &Frame) -> Result<(), SinkError> {
        if frame.resolution() != self.resolution {
            return Err(SinkError::FrameSize {
                expected: self.resolution,
                actual: frame.resolution(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| SinkError::Closed {
            path: self.path.clone(),
        })?;
        stdin
            .write_all(frame.as_bytes())
            .map_err(|e| SinkError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        // End of input tells the encoder to write the trailer
        drop(self.stdin.take());
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        process.finish().map_err(|e| SinkError::Finalize {
            path: self.path.clone(),
            source: e,
        })
    }

    fn is_closed(&self) -> bool {
        self.process.is_none()
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }
    }
}

/// ffmpeg arguments encoding rawvideo from stdin into `spec.path`.
pub fn build_encoder_args(spec: &SinkSpec) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-y",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend([
        "-s".to_string(),
        spec.resolution.to_string(),
        "-r".to_string(),
        format_fps(spec.fps),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
    ]);
    args.extend(spec.codec.encoder_args());
    args.push(spec.path.display().to_string());
    args
}

fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{:.3}", fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 2).unwrap()
    }

    #[test]
    fn test_codec_parse() {
        assert_eq!("XVID".parse::<Codec>(), Ok(Codec::Xvid));
        assert_eq!("mjpg".parse::<Codec>(), Ok(Codec::Mjpg));
        assert_eq!("H264".parse::<Codec>(), Ok(Codec::Avc1));
        assert_eq!("mp4v".parse::<Codec>(), Ok(Codec::Mp4v));
        assert!("DIVX".parse::<Codec>().is_err());
        assert_eq!(Codec::default(), Codec::Xvid);
    }

    #[test]
    fn test_codec_container() {
        assert_eq!(Codec::Xvid.extension(), "avi");
        assert_eq!(Codec::Mjpg.extension(), "avi");
        assert_eq!(Codec::Avc1.extension(), "mp4");
        assert_eq!(Codec::Mp4v.to_string(), "mp4v");
    }

    #[test]
    fn test_clip_file_name() {
        assert_eq!(clip_file_name(at(), Codec::Xvid), "motion_20240309_070502.avi");
        assert_eq!(clip_file_name(at(), Codec::Avc1), "motion_20240309_070502.mp4");
    }

    #[test]
    fn test_unique_clip_path_adds_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_clip_path(dir.path(), at(), Codec::Xvid);
        assert_eq!(first, dir.path().join("motion_20240309_070502.avi"));

        std::fs::write(&first, b"").unwrap();
        let second = unique_clip_path(dir.path(), at(), Codec::Xvid);
        assert_eq!(second, dir.path().join("motion_20240309_070502_1.avi"));

        std::fs::write(&second, b"").unwrap();
        let third = unique_clip_path(dir.path(), at(), Codec::Xvid);
        assert_eq!(third, dir.path().join("motion_20240309_070502_2.avi"));
    }

    #[test]
    fn test_ensure_output_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("recordings");
        ensure_output_dir(&nested).unwrap();
        assert!(nested.is_dir());
        // Existing directory is fine
        ensure_output_dir(&nested).unwrap();
    }

    #[test]
    fn test_encoder_args() {
        let spec = SinkSpec {
            path: PathBuf::from("/tmp/motion_1.avi"),
            codec: Codec::Xvid,
            fps: 30.0,
            resolution: Resolution::MEDIUM,
        };
        let joined = build_encoder_args(&spec).join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 30 -i -"));
        assert!(joined.contains("-c:v mpeg4 -vtag XVID"));
        assert!(joined.ends_with("/tmp/motion_1.avi"));
    }

    #[test]
    fn test_format_fps() {
        assert_eq!(format_fps(20.0), "20");
        assert_eq!(format_fps(29.97), "29.970");
    }
}
