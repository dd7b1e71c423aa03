//! Visible-state change detection between screenshots

use image::{GenericImageView, Pixel};
use tracing::{debug, warn};

use gameqa_common::Screenshot;

/// Per-channel difference tolerated as noise (anti-aliasing, compression)
const TOLERANCE: i32 = 5;

/// Percentage of differing pixels at which the screen counts as changed
pub const CHANGE_THRESHOLD_PERCENT: f64 = 0.5;

/// Result of comparing two screenshots
#[derive(Debug, Clone, PartialEq)]
pub struct VisualDiff {
    /// Whether the visible state changed beyond the threshold
    pub changed: bool,

    /// Percentage of pixels that differ
    pub diff_percent: f64,

    /// Number of different pixels
    pub diff_pixels: u64,

    /// Total pixels compared
    pub total_pixels: u64,
}

impl VisualDiff {
    fn identical(total_pixels: u64) -> Self {
        Self {
            changed: false,
            diff_percent: 0.0,
            diff_pixels: 0,
            total_pixels,
        }
    }
}

/// Compare two captured screenshots
pub fn compare_screenshots(before: &Screenshot, after: &Screenshot) -> VisualDiff {
    if before.artifact.digest == after.artifact.digest {
        debug!("Screenshots match exactly (same digest)");
        return VisualDiff::identical(u64::from(before.width) * u64::from(before.height));
    }
    compare(&before.data, &after.data)
}

/// Compare two encoded images pixel by pixel.
///
/// Images that fail to decode are compared by content only: different bytes
/// count as a full change.
pub fn compare(before: &[u8], after: &[u8]) -> VisualDiff {
    if before == after {
        return VisualDiff::identical(0);
    }

    let (before_img, after_img) = match (
        image::load_from_memory(before),
        image::load_from_memory(after),
    ) {
        (Ok(a), Ok(b)) => (a, b),
        _ => {
            warn!("Could not decode screenshots for comparison; using content digest");
            return VisualDiff {
                changed: true,
                diff_percent: 100.0,
                diff_pixels: 0,
                total_pixels: 0,
            };
        }
    };

    if before_img.dimensions() != after_img.dimensions() {
        debug!(
            "Screenshot dimensions differ: {:?} vs {:?}",
            before_img.dimensions(),
            after_img.dimensions()
        );
    }

    let (width, height) = after_img.dimensions();
    let total_pixels = u64::from(width) * u64::from(height);
    if total_pixels == 0 {
        return VisualDiff::identical(0);
    }

    let before_rgba = before_img.to_rgba8();
    let after_rgba = after_img.to_rgba8();

    let mut diff_pixels = 0u64;
    for y in 0..height {
        for x in 0..width {
            let differs = if x < before_rgba.width() && y < before_rgba.height() {
                pixels_differ(before_rgba.get_pixel(x, y), after_rgba.get_pixel(x, y))
            } else {
                true
            };
            if differs {
                diff_pixels += 1;
            }
        }
    }

    let diff_percent = (diff_pixels as f64 / total_pixels as f64) * 100.0;
    VisualDiff {
        // Compared without the division so the boundary is exact
        changed: diff_pixels as f64 * 100.0 >= CHANGE_THRESHOLD_PERCENT * total_pixels as f64,
        diff_percent,
        diff_pixels,
        total_pixels,
    }
}

/// Compare the first and last screenshots; `None` with fewer than two
pub fn first_to_last(shots: &[Screenshot]) -> Option<VisualDiff> {
    match shots {
        [first, .., last] => Some(compare_screenshots(first, last)),
        _ => None,
    }
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    a.channels()
        .iter()
        .zip(b.channels())
        .any(|(x, y)| (*x as i32 - *y as i32).abs() > TOLERANCE)
}
