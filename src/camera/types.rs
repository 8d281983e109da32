//! Camera types and data structures.

use image::RgbImage;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// Information about an available camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index for selection
    pub index: u32,
    /// Human-readable device name
    pub name: String,
    /// Device path or identifier passed to ffmpeg
    pub description: String,
}

impl fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.index, self.name, self.description)
    }
}

/// Frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Low resolution (320x240)
    pub const LOW: Resolution = Resolution {
        width: 320,
        height: 240,
    };

    /// Medium resolution (640x480) - balanced, recommended
    pub const MEDIUM: Resolution = Resolution {
        width: 640,
        height: 480,
    };

    /// High resolution (1280x720)
    pub const HIGH: Resolution = Resolution {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of bytes in one rgb24 frame of this size.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Parse `WIDTHxHEIGHT` (e.g. `640x480`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(|| {
            format!(
                "Invalid resolution format '{}'. Use WIDTHxHEIGHT (e.g., 640x480)",
                s
            )
        })?;
        let width: u32 = w
            .parse()
            .map_err(|_| format!("Invalid width '{}' in resolution", w))?;
        let height: u32 = h
            .parse()
            .map_err(|_| format!("Invalid height '{}' in resolution", h))?;
        if width == 0 || height == 0 {
            return Err("Resolution width and height must be greater than 0".to_string());
        }
        Ok(Resolution { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A captured camera frame.
///
/// Pixels are rgb24 and shared behind an `Arc`, so cloning a frame never
/// copies or mutates the pixel data. Every transform builds a new image.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    /// Capture order, starting at 0 for the first frame of a source
    pub sequence: u64,
    /// Timestamp when frame was captured
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Build a frame from raw rgb24 bytes.
    ///
    /// Returns `None` if `data` does not hold exactly `width * height * 3` bytes.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self::new(image, sequence))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Get the number of bytes per pixel (3 for RGB).
    pub fn bytes_per_pixel(&self) -> usize {
        3
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Raw rgb24 bytes, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// ffmpeg input device family used to open a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// Video4Linux2 (Linux)
    V4l2,
    /// AVFoundation (macOS)
    Avfoundation,
    /// DirectShow (Windows)
    Dshow,
}

impl CaptureFormat {
    /// The capture format for the platform this binary was built for.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            CaptureFormat::Avfoundation
        } else if cfg!(target_os = "windows") {
            CaptureFormat::Dshow
        } else {
            CaptureFormat::V4l2
        }
    }

    /// Name of the format as ffmpeg's `-f` flag expects it.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            CaptureFormat::V4l2 => "v4l2",
            CaptureFormat::Avfoundation => "avfoundation",
            CaptureFormat::Dshow => "dshow",
        }
    }

    /// Translate a device index or name into the ffmpeg input specifier.
    ///
    /// A bare number is treated as a device index; anything else is passed
    /// through as-is.
    pub fn device_spec(&self, device: &str) -> String {
        match (self, device.parse::<u32>()) {
            (CaptureFormat::V4l2, Ok(index)) => format!("/dev/video{}", index),
            (CaptureFormat::Avfoundation, Ok(index)) => format!("{}:none", index),
            (CaptureFormat::Dshow, _) if !device.starts_with("video=") => {
                format!("video={}", device)
            }
            _ => device.to_string(),
        }
    }
}

impl fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraInput {
    /// A live capture device
    Device { format: CaptureFormat, device: String },
    /// A video file or stream URL, played back at its native rate
    File(PathBuf),
}

impl Default for CameraInput {
    fn default() -> Self {
        CameraInput::Device {
            format: CaptureFormat::platform_default(),
            device: "0".to_string(),
        }
    }
}

impl fmt::Display for CameraInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraInput::Device { format, device } => write!(f, "{} {}", format, device),
            CameraInput::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

/// Highest capture frame rate accepted from flags and config.
pub const MAX_FPS: u32 = 120;

/// Settings for camera capture.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub input: CameraInput,
    /// Frames are scaled to this size
    pub resolution: Resolution,
    /// Requested frame rate; 0 leaves the rate to the device
    pub fps: u32,
    /// Mirror horizontally
    pub mirror: bool,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            input: CameraInput::default(),
            resolution: Resolution::default(),
            fps: 30,
            mirror: false,
        }
    }
}

/// Errors that can occur during camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("FFmpeg not found. Please install ffmpeg and make sure it is on PATH")]
    FfmpegNotFound,
    #[error("Failed to query cameras: {0}")]
    QueryFailed(String),
    #[error("Failed to open camera: {0}")]
    OpenFailed(String),
    #[error("Camera permission denied. Grant camera access to your terminal and try again")]
    PermissionDenied,
    #[error("Camera device {0} not found. Run 'list-devices' to see available devices")]
    DeviceNotFound(String),
    #[error("Failed to read frame: {0}")]
    ReadFailed(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_info_display() {
        let info = CameraInfo {
            index: 0,
            name: "Test Camera".to_string(),
            description: "/dev/video0".to_string(),
        };
        assert_eq!(format!("{}", info), "[0] Test Camera (/dev/video0)");
    }

    #[test]
    fn test_resolution_default() {
        let res = Resolution::default();
        assert_eq!(res, Resolution::MEDIUM);
        assert_eq!(res.frame_len(), 640 * 480 * 3);
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!("1280x720".parse::<Resolution>(), Ok(Resolution::HIGH));
        assert_eq!("320X240".parse::<Resolution>(), Ok(Resolution::LOW));
        assert!("1280".parse::<Resolution>().is_err());
        assert!("0x480".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
        assert_eq!(Resolution::HIGH.to_string(), "1280x720");
    }

    #[test]
    fn test_frame_from_rgb_checks_length() {
        assert!(Frame::from_rgb(2, 1, vec![0; 6], 0).is_some());
        assert!(Frame::from_rgb(2, 1, vec![0; 5], 0).is_none());
    }

    #[test]
    fn test_frame_clone_shares_pixels() {
        let frame = Frame::from_rgb(2, 2, vec![7; 12], 3).unwrap();
        let copy = frame.clone();
        assert_eq!(copy.sequence, 3);
        assert_eq!(copy.as_bytes().as_ptr(), frame.as_bytes().as_ptr());
        assert_eq!(frame.bytes_per_pixel(), 3);
        assert_eq!(frame.resolution(), Resolution::new(2, 2));
    }

    #[test]
    fn test_device_spec_per_format() {
        assert_eq!(CaptureFormat::V4l2.device_spec("2"), "/dev/video2");
        assert_eq!(CaptureFormat::V4l2.device_spec("/dev/video5"), "/dev/video5");
        assert_eq!(CaptureFormat::Avfoundation.device_spec("0"), "0:none");
        assert_eq!(
            CaptureFormat::Avfoundation.device_spec("FaceTime HD Camera"),
            "FaceTime HD Camera"
        );
        assert_eq!(
            CaptureFormat::Dshow.device_spec("USB Camera"),
            "video=USB Camera"
        );
        assert_eq!(
            CaptureFormat::Dshow.device_spec("video=USB Camera"),
            "video=USB Camera"
        );
    }

    #[test]
    fn test_camera_error_display() {
        assert!(CameraError::FfmpegNotFound.to_string().contains("FFmpeg not found"));
        assert_eq!(
            CameraError::OpenFailed("busy".to_string()).to_string(),
            "Failed to open camera: busy"
        );
        assert!(CameraError::DeviceNotFound("3".to_string())
            .to_string()
            .contains("3"));
    }
}
