//! Value parsers for command-line flags.

use crate::camera::{Resolution, MAX_FPS};
use crate::preroll::MAX_PRE_ROLL_SECS;
use crate::recording::MAX_DURATION;

/// Largest accepted capture size.
const MAX_RESOLUTION: Resolution = Resolution {
    width: 7680,
    height: 4320,
};

/// Parse and validate resolution (WIDTHxHEIGHT format)
pub fn parse_resolution(s: &str) -> Result<Resolution, String> {
    let resolution: Resolution = s.parse()?;
    if resolution.width > MAX_RESOLUTION.width || resolution.height > MAX_RESOLUTION.height {
        return Err(format!(
            "Resolution must be at most {}, got {}",
            MAX_RESOLUTION, resolution
        ));
    }
    Ok(resolution)
}

/// Parse and validate framerate (1-120 fps)
pub fn parse_framerate(s: &str) -> Result<u32, String> {
    let fps: u32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid framerate", s))?;
    if !(1..=MAX_FPS).contains(&fps) {
        return Err(format!(
            "Framerate must be between 1 and {} fps, got {}",
            MAX_FPS, fps
        ));
    }
    Ok(fps)
}

/// Parse a clip length in seconds (more than 0, at most an hour)
pub fn parse_duration(s: &str) -> Result<f64, String> {
    let secs = parse_seconds(s)?;
    if secs <= 0.0 || secs > MAX_DURATION.as_secs_f64() {
        return Err(format!(
            "Duration must be more than 0 and at most {} seconds, got {}",
            MAX_DURATION.as_secs(),
            s
        ));
    }
    Ok(secs)
}

/// Parse a pre-roll window in seconds (0 to 10)
pub fn parse_pre_roll(s: &str) -> Result<f64, String> {
    let secs = parse_seconds(s)?;
    if secs > MAX_PRE_ROLL_SECS {
        return Err(format!(
            "Pre-roll must be at most {} seconds, got {}",
            MAX_PRE_ROLL_SECS, s
        ));
    }
    Ok(secs)
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let secs: f64 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid number of seconds", s))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("Seconds must be zero or more, got {}", s));
    }
    Ok(secs)
}
