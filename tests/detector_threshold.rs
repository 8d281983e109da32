//! Minimum-area boundary of the motion detector.
//!
//! A single compact changed block is motion exactly when it covers at least
//! the configured minimum area.

use image::{Rgb, RgbImage};
use motion_recorder::camera::Frame;
use motion_recorder::detector::{DetectorSettings, MotionDetector, DEFAULT_MIN_AREA};

fn background() -> RgbImage {
    RgbImage::from_pixel(160, 120, Rgb([0, 0, 0]))
}

/// Frame pair differing only in a `w`x`h` block at (50, 30).
fn pair(w: u32, h: u32) -> (Frame, Frame) {
    let before = background();
    let mut after = before.clone();
    for y in 30..30 + h {
        for x in 50..50 + w {
            after.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    (Frame::new(before, 0), Frame::new(after, 1))
}

#[test]
fn test_799_pixels_is_not_motion() {
    assert_eq!(17 * 47, 799);
    let (before, after) = pair(17, 47);
    let signal = MotionDetector::default().detect(&before, &after).unwrap();
    assert!(!signal.present);
    assert!(signal.regions.is_empty());
}

#[test]
fn test_800_pixels_is_motion() {
    assert_eq!(20 * 40, DEFAULT_MIN_AREA);
    let (before, after) = pair(20, 40);
    let signal = MotionDetector::default().detect(&before, &after).unwrap();
    assert!(signal.present);
    assert_eq!(signal.regions.len(), 1);

    let region = signal.regions[0];
    assert_eq!(region.area, 800);
    // The box comes from the dilated region, so it encloses the block
    assert!(region.x <= 50 && region.y <= 30);
    assert!(region.x + region.width >= 70);
    assert!(region.y + region.height >= 70);
}

#[test]
fn test_boundary_follows_configured_min_area() {
    let detector = MotionDetector::new(DetectorSettings {
        min_area: 400,
        ..Default::default()
    });
    let (before, after) = pair(20, 20);
    assert!(detector.detect(&before, &after).unwrap().present);

    let (before, after) = pair(19, 21);
    assert!(!detector.detect(&before, &after).unwrap().present);
}

#[test]
fn test_detection_does_not_modify_frames() {
    let (before, after) = pair(20, 40);
    let before_bytes = before.as_bytes().to_vec();
    let after_bytes = after.as_bytes().to_vec();
    let detector = MotionDetector::default();
    let first = detector.detect(&before, &after).unwrap();
    let second = detector.detect(&before, &after).unwrap();
    assert_eq!(first, second);
    assert_eq!(before.as_bytes(), &before_bytes[..]);
    assert_eq!(after.as_bytes(), &after_bytes[..]);
}
