//! Configuration file handling for motion-recorder.
//!
//! Loads configuration from `<config dir>/motion-recorder/config.toml` or a
//! custom path. Every field is optional; unset fields fall back to built-in
//! defaults when the effective settings are resolved, and command-line flags
//! are applied on top of the file before that.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{AlertMode, AlertSettings, DEFAULT_DURATION_MS, DEFAULT_FREQUENCY_HZ};
use crate::camera::{CameraInput, CameraSettings, CaptureFormat, Resolution, MAX_FPS};
use crate::cctv::CctvSettings;
use crate::detector::DetectorSettings;
use crate::orchestrator::LoopOptions;
use crate::preroll::MAX_PRE_ROLL_SECS;
use crate::recording::{Codec, MAX_DURATION};

/// Configuration file structure for motion-recorder.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// A camera given by index (`device = 0`) or by name/path (`device = "/dev/video2"`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DeviceRef {
    Index(u32),
    Name(String),
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRef::Index(i) => write!(f, "{}", i),
            DeviceRef::Name(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CameraConfig {
    pub device: Option<DeviceRef>,
    pub format: Option<CaptureFormat>,
    /// Video file or stream URL; takes precedence over `device`
    pub input: Option<PathBuf>,
    pub resolution: Option<Resolution>,
    pub fps: Option<u32>,
    pub mirror: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DetectorConfig {
    pub threshold: Option<u8>,
    pub min_area: Option<u32>,
    pub blur_sigma: Option<f32>,
    pub dilate_iterations: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordingConfig {
    pub output_dir: Option<PathBuf>,
    pub duration_secs: Option<f64>,
    pub pre_roll_secs: Option<f64>,
    pub codec: Option<Codec>,
    pub fallback_fps: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AlertConfig {
    pub mode: Option<AlertMode>,
    pub frequency_hz: Option<u32>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DisplayConfig {
    pub enabled: Option<bool>,
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl Config {
    /// Load configuration.
    ///
    /// With `path`, the file must exist. Without it, the default path is
    /// tried and a missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if !path.exists() => Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::load_file(path),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    log::debug!("No config file at {}, using defaults", path.display());
                    Ok(Config::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::parse(&content, path)?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text; `path` is only used in error messages.
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Resolve the effective watch settings, filling unset fields with defaults.
    pub fn settings(&self) -> Result<CctvSettings, ConfigError> {
        Ok(CctvSettings {
            camera: self.camera_settings()?,
            options: self.loop_options()?,
            alert: self.alert_settings(),
            display: self.display.enabled.unwrap_or(true),
        })
    }

    fn camera_settings(&self) -> Result<CameraSettings, ConfigError> {
        let defaults = CameraSettings::default();
        let fps = match self.camera.fps {
            // 0 leaves the rate to the device
            Some(fps) if fps > MAX_FPS => {
                return Err(ConfigError::Invalid {
                    field: "camera.fps",
                    message: format!("must be between 0 and {}, got {}", MAX_FPS, fps),
                })
            }
            Some(fps) => fps,
            None => defaults.fps,
        };
        let input = match (&self.camera.input, &self.camera.device) {
            (Some(path), _) => CameraInput::File(path.clone()),
            (None, device) => CameraInput::Device {
                format: self
                    .camera
                    .format
                    .unwrap_or_else(CaptureFormat::platform_default),
                device: device
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "0".to_string()),
            },
        };
        Ok(CameraSettings {
            input,
            resolution: self.camera.resolution.unwrap_or(defaults.resolution),
            fps,
            mirror: self.camera.mirror.unwrap_or(defaults.mirror),
        })
    }

    fn loop_options(&self) -> Result<LoopOptions, ConfigError> {
        let defaults = LoopOptions::default();
        let detector_defaults = DetectorSettings::default();
        let rec = &self.recording;

        let duration = match rec.duration_secs {
            Some(secs) => clip_duration("recording.duration_secs", secs)?,
            None => defaults.duration,
        };
        let pre_roll_secs = match rec.pre_roll_secs {
            Some(secs) if !(0.0..=MAX_PRE_ROLL_SECS).contains(&secs) => {
                return Err(ConfigError::Invalid {
                    field: "recording.pre_roll_secs",
                    message: format!("must be between 0 and {}, got {}", MAX_PRE_ROLL_SECS, secs),
                })
            }
            Some(secs) => secs,
            None => defaults.pre_roll_secs,
        };
        let fallback_fps = match rec.fallback_fps {
            Some(fps) if !(fps > 0.0 && fps <= f64::from(MAX_FPS)) => {
                return Err(ConfigError::Invalid {
                    field: "recording.fallback_fps",
                    message: format!("must be more than 0 and at most {}, got {}", MAX_FPS, fps),
                })
            }
            Some(fps) => fps,
            None => defaults.fallback_fps,
        };

        Ok(LoopOptions {
            detector: DetectorSettings {
                threshold: self.detector.threshold.unwrap_or(detector_defaults.threshold),
                min_area: self.detector.min_area.unwrap_or(detector_defaults.min_area),
                blur_sigma: self.detector.blur_sigma.unwrap_or(detector_defaults.blur_sigma),
                dilate_iterations: self
                    .detector
                    .dilate_iterations
                    .unwrap_or(detector_defaults.dilate_iterations),
            },
            output_dir: rec.output_dir.clone().unwrap_or(defaults.output_dir),
            duration,
            pre_roll_secs,
            codec: rec.codec.unwrap_or(defaults.codec),
            fallback_fps,
        })
    }

    fn alert_settings(&self) -> AlertSettings {
        AlertSettings {
            mode: self.alert.mode.unwrap_or_default(),
            frequency_hz: self.alert.frequency_hz.unwrap_or(DEFAULT_FREQUENCY_HZ),
            duration: Duration::from_millis(self.alert.duration_ms.unwrap_or(DEFAULT_DURATION_MS)),
        }
    }
}

fn clip_duration(field: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::Invalid {
        field,
        message: format!(
            "must be more than 0 and at most {} seconds, got {}",
            MAX_DURATION.as_secs(),
            secs
        ),
    };
    let duration = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
    if duration.is_zero() || duration > MAX_DURATION {
        return Err(invalid());
    }
    Ok(duration)
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("motion-recorder").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/motion-recorder/config.toml")
        })
}

/// Commented config file written by `config init`.
pub const DEFAULT_CONFIG: &str = r#"# motion-recorder configuration

[camera]
# Camera device index or name (see `motion-recorder list-devices`)
device = 0
# Capture backend: v4l2, avfoundation, dshow (default: this platform's)
# format = "v4l2"
# Read a video file or stream instead of a camera
# input = "/path/to/video.mp4"
# Frames are scaled to this size
resolution = "640x480"
# 1-120, or 0 to keep the device rate
fps = 30
# Mirror horizontally
mirror = false

[detector]
# Luma difference a pixel must exceed to count as changed (0-255)
threshold = 20
# Changed pixels (difference above threshold) a region needs to count as motion,
# not the blurred and dilated area
min_area = 800
# Gaussian blur applied before thresholding (0 disables)
blur_sigma = 1.1
# 3x3 dilation passes merging nearby changes (0 disables)
dilate_iterations = 3

[recording]
output_dir = "recordings"
# Clip length after motion is first seen (at most 3600)
duration_secs = 10.0
# Seconds kept from before the motion (at most 10)
pre_roll_secs = 0.5
# XVID, MJPG, mp4v, avc1 (H264)
codec = "XVID"
# Used when the camera reports no frame rate
fallback_fps = 20.0

[alert]
# tone, bell, off
mode = "tone"
frequency_hz = 1000
duration_ms = 200

[display]
# Live preview window (requires mpv)
enabled = true
"#;
