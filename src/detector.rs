//! Frame-difference motion detection.
//!
//! The detector is a pure function of two consecutive frames:
//!
//! 1. absolute per-channel difference, converted to luma
//! 2. gaussian blur to suppress sensor noise
//! 3. binarize at a fixed intensity threshold
//! 4. dilate the mask so nearby changed pixels merge into one region
//! 5. label 8-connected regions of the dilated mask
//!
//! Blur and dilation only decide which pixels belong together. A region's
//! area is the number of pixels inside it whose unblurred difference is
//! above the threshold, so the minimum area is measured in pixels that
//! actually changed.

use std::collections::HashMap;

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::camera::{Frame, Resolution};

/// Luma difference a pixel must exceed to count as changed.
pub const DEFAULT_THRESHOLD: u8 = 20;

/// Minimum changed-pixel area for a region to count as motion.
pub const DEFAULT_MIN_AREA: u32 = 800;

/// Gaussian sigma matching a 5x5 kernel.
pub const DEFAULT_BLUR_SIGMA: f32 = 1.1;

/// Iterations of 3x3 dilation.
pub const DEFAULT_DILATE_ITERATIONS: u8 = 3;

/// Errors from the motion detector.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Frame size mismatch: previous frame is {previous}, current frame is {current}")]
    DimensionMismatch {
        previous: Resolution,
        current: Resolution,
    },
}

/// Bounding box of one qualifying motion region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Changed pixels inside the region
    pub area: u32,
}

/// Result of comparing two frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotionSignal {
    /// At least one region reached the minimum area
    pub present: bool,
    /// Every qualifying region, in scan order
    pub regions: Vec<Region>,
}

impl MotionSignal {
    /// A signal with no motion.
    pub fn none() -> Self {
        Self::default()
    }

    fn from_regions(regions: Vec<Region>) -> Self {
        Self {
            present: !regions.is_empty(),
            regions,
        }
    }
}

/// Tunable detector parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorSettings {
    pub threshold: u8,
    pub min_area: u32,
    /// 0 disables the blur
    pub blur_sigma: f32,
    /// 0 disables dilation
    pub dilate_iterations: u8,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_area: DEFAULT_MIN_AREA,
            blur_sigma: DEFAULT_BLUR_SIGMA,
            dilate_iterations: DEFAULT_DILATE_ITERATIONS,
        }
    }
}

/// Stateless motion detector.
#[derive(Debug, Clone, Default)]
pub struct MotionDetector {
    settings: DetectorSettings,
}

impl MotionDetector {
    pub fn new(settings: DetectorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Compare two consecutive frames.
    ///
    /// # Errors
    /// * `DetectorError::DimensionMismatch` - the frames differ in size
    pub fn detect(&self, previous: &Frame, current: &Frame) -> Result<MotionSignal, DetectorError> {
        if previous.resolution() != current.resolution() {
            return Err(DetectorError::DimensionMismatch {
                previous: previous.resolution(),
                current: current.resolution(),
            });
        }

        let diff = difference_luma(previous.image(), current.image());
        let threshold = self.settings.threshold;

        let blurred = if self.settings.blur_sigma > 0.0 {
            gaussian_blur_f32(&diff, self.settings.blur_sigma)
        } else {
            diff.clone()
        };
        let mask = binarize(&blurred, threshold);
        let grown = if self.settings.dilate_iterations > 0 {
            dilate(&mask, Norm::LInf, self.settings.dilate_iterations)
        } else {
            mask
        };

        let regions = collect_regions(&grown, &diff, threshold)
            .into_iter()
            .filter(|r| r.area >= self.settings.min_area)
            .collect();
        Ok(MotionSignal::from_regions(regions))
    }
}

/// Per-channel absolute difference converted to luma.
fn difference_luma(previous: &RgbImage, current: &RgbImage) -> GrayImage {
    let mut diff = RgbImage::new(previous.width(), previous.height());
    for ((out, a), b) in diff.pixels_mut().zip(previous.pixels()).zip(current.pixels()) {
        *out = Rgb([
            a[0].abs_diff(b[0]),
            a[1].abs_diff(b[1]),
            a[2].abs_diff(b[2]),
        ]);
    }
    image::imageops::grayscale(&diff)
}

fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    for (dst, src) in out.pixels_mut().zip(image.pixels()) {
        *dst = if src[0] > threshold { Luma([255]) } else { Luma([0]) };
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct RegionBounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    area: u32,
}

/// Label the grown mask and measure each region against the raw difference.
fn collect_regions(grown: &GrayImage, diff: &GrayImage, threshold: u8) -> Vec<Region> {
    let labels = connected_components(grown, Connectivity::Eight, Luma([0u8]));

    let mut order: HashMap<u32, usize> = HashMap::new();
    let mut bounds: Vec<RegionBounds> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let idx = *order.entry(label).or_insert_with(|| {
            bounds.push(RegionBounds {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                area: 0,
            });
            bounds.len() - 1
        });
        let b = &mut bounds[idx];
        b.min_x = b.min_x.min(x);
        b.min_y = b.min_y.min(y);
        b.max_x = b.max_x.max(x);
        b.max_y = b.max_y.max(y);
        if diff.get_pixel(x, y)[0] > threshold {
            b.area += 1;
        }
    }

    bounds
        .into_iter()
        .map(|b| Region {
            x: b.min_x,
            y: b.min_y,
            width: b.max_x - b.min_x + 1,
            height: b.max_y - b.min_y + 1,
            area: b.area,
        })
        .collect()
}
