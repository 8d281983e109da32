//! Camera device enumeration.

use std::path::Path;
use std::process::{Command, Stdio};

use super::types::{CameraError, CameraInfo, CaptureFormat};

/// List all available camera devices for the given capture format.
///
/// Returns an empty vector (not an error) when no cameras are found.
pub fn list_devices(format: CaptureFormat) -> Result<Vec<CameraInfo>, CameraError> {
    match format {
        CaptureFormat::V4l2 => list_v4l2_devices(Path::new("/dev")),
        CaptureFormat::Avfoundation | CaptureFormat::Dshow => list_ffmpeg_devices(format),
    }
}

/// Scan a directory for `videoN` device nodes, sorted by index.
fn list_v4l2_devices(dev_dir: &Path) -> Result<Vec<CameraInfo>, CameraError> {
    let entries = match std::fs::read_dir(dev_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CameraError::QueryFailed(e.to_string())),
    };

    let mut devices: Vec<CameraInfo> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let index: u32 = file_name.to_str()?.strip_prefix("video")?.parse().ok()?;
            let name = v4l2_device_name(index).unwrap_or_else(|| format!("video{}", index));
            Some(CameraInfo {
                index,
                name,
                description: entry.path().display().to_string(),
            })
        })
        .collect();
    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

/// Human readable name exported by the kernel in sysfs, if any.
fn v4l2_device_name(index: u32) -> Option<String> {
    let path = format!("/sys/class/video4linux/video{}/name", index);
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Ask ffmpeg to list devices and parse its stderr.
fn list_ffmpeg_devices(format: CaptureFormat) -> Result<Vec<CameraInfo>, CameraError> {
    let input = match format {
        CaptureFormat::Dshow => "dummy",
        _ => "",
    };
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-f", format.ffmpeg_name(), "-list_devices", "true", "-i", input])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CameraError::FfmpegNotFound
            } else {
                CameraError::QueryFailed(e.to_string())
            }
        })?;

    // ffmpeg prints the device list to stderr and exits non-zero
    let stderr = String::from_utf8_lossy(&output.stderr);
    Ok(match format {
        CaptureFormat::Dshow => parse_dshow_devices(&stderr),
        _ => parse_avfoundation_devices(&stderr),
    })
}

/// Parse the video section of ffmpeg's AVFoundation device listing.
fn parse_avfoundation_devices(stderr: &str) -> Vec<CameraInfo> {
    let mut devices = Vec::new();
    let mut in_video_section = false;

    for line in stderr.lines() {
        if line.contains("AVFoundation video devices:") {
            in_video_section = true;
            continue;
        }
        if line.contains("AVFoundation audio devices:") {
            break;
        }
        if in_video_section {
            if let Some(device) = parse_device_line(line) {
                // Screens are listed alongside cameras; they are not cameras
                if !device.name.starts_with("Capture screen") {
                    devices.push(device);
                }
            }
        }
    }

    devices
}

/// Parse a single AVFoundation line: `[AVFoundation indev @ 0x...] [index] device name`
fn parse_device_line(line: &str) -> Option<CameraInfo> {
    let bracket_idx = line.find("] [")?;
    let after_bracket = &line[bracket_idx + 3..];
    let close_bracket = after_bracket.find(']')?;
    let index: u32 = after_bracket[..close_bracket].parse().ok()?;
    let name = after_bracket.get(close_bracket + 2..)?.trim().to_string();

    if name.is_empty() {
        return None;
    }

    Some(CameraInfo {
        index,
        description: index.to_string(),
        name,
    })
}

/// Parse DirectShow listing lines like `[dshow @ 0x...] "USB Camera" (video)`.
fn parse_dshow_devices(stderr: &str) -> Vec<CameraInfo> {
    stderr
        .lines()
        .filter(|line| line.trim_end().ends_with("(video)"))
        .filter_map(|line| {
            let start = line.find('"')?;
            let rest = &line[start + 1..];
            let end = rest.find('"')?;
            Some(rest[..end].to_string())
        })
        .enumerate()
        .map(|(i, name)| CameraInfo {
            index: i as u32,
            description: format!("video={}", name),
            name,
        })
        .collect()
}
