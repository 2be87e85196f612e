//! Statistics-driven filter parameters and the three filters they feed.
//!
//! ## Parameter policy
//!
//! The constants below are an empirically tuned policy table, reproduced
//! as-is. Every rule computes a raw value first and clamps second:
//!
//! | Parameter | Rule |
//! |-----------|------|
//! | bilateral `sigma_color` | `clamp(std * 2, 25, 150)` |
//! | bilateral `sigma_space` | `clamp(contrast * 15, 5, 75)` |
//! | blur kernel | `contrast < 0.5` → 3, else `variance < 500` → 7, else 11 |
//! | threshold block | `clamp(round(contrast * 30), 11, 31)`, forced odd |
//! | threshold constant | `min(10, round(15 - contrast * 10))` |
//!
//! ## Filters
//!
//! The filters operate on 8-bit grayscale and run on `imageproc`: its
//! bilateral filter, and `separable_filter_equal` fed with OpenCV's fixed
//! Gaussian kernels for both the blur and the threshold's local mean.
//! Borders replicate the edge pixel.

use crate::pipeline::stats::ImageStats;
use image::{GrayImage, Luma};
use imageproc::filter::bilateral::{self, GaussianEuclideanColorDistance};
use imageproc::filter::separable_filter_equal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Neighbourhood diameter of the bilateral filter, in pixels.
pub const BILATERAL_DIAMETER: u32 = 9;

pub const SIGMA_COLOR_MIN: f64 = 25.0;
pub const SIGMA_COLOR_MAX: f64 = 150.0;
pub const SIGMA_SPACE_MIN: f64 = 5.0;
pub const SIGMA_SPACE_MAX: f64 = 75.0;
pub const BLOCK_SIZE_MIN: u32 = 11;
pub const BLOCK_SIZE_MAX: u32 = 31;
pub const THRESHOLD_CONSTANT_MAX: i32 = 10;

/// Below this contrast the image gets the lightest blur.
pub const LOW_CONTRAST: f64 = 0.5;
/// Below this variance (at normal contrast) the image gets a moderate blur.
pub const MODERATE_VARIANCE: f64 = 500.0;

/// Filter settings derived from one image's [`ImageStats`].
///
/// Computed once per image and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    /// Odd, one of 3, 7 or 11.
    pub blur_kernel_size: u32,
    /// In `[25, 150]`.
    pub bilateral_sigma_color: f64,
    /// In `[5, 75]`.
    pub bilateral_sigma_space: f64,
    /// Odd, in `[11, 31]`.
    pub threshold_block_size: u32,
    /// Subtracted from the local mean; at most 10, negative for very
    /// high-contrast images.
    pub threshold_constant: i32,
}

impl FilterParameters {
    pub fn from_stats(stats: &ImageStats) -> Self {
        let params = Self {
            blur_kernel_size: blur_kernel_size(stats.contrast, stats.variance),
            bilateral_sigma_color: sigma_color(stats.std),
            bilateral_sigma_space: sigma_space(stats.contrast),
            threshold_block_size: threshold_block_size(stats.contrast),
            threshold_constant: threshold_constant(stats.contrast),
        };
        debug!(
            "Filter parameters: blur={} sigma_color={:.1} sigma_space={:.1} block={} C={}",
            params.blur_kernel_size,
            params.bilateral_sigma_color,
            params.bilateral_sigma_space,
            params.threshold_block_size,
            params.threshold_constant
        );
        params
    }
}

/// Noisier images get stronger colour-domain smoothing.
pub fn sigma_color(std: f64) -> f64 {
    (std * 2.0).clamp(SIGMA_COLOR_MIN, SIGMA_COLOR_MAX)
}

/// Sharper images tolerate more spatial smoothing.
pub fn sigma_space(contrast: f64) -> f64 {
    (contrast * 15.0).clamp(SIGMA_SPACE_MIN, SIGMA_SPACE_MAX)
}

/// Three-way kernel choice, evaluated in priority order.
pub fn blur_kernel_size(contrast: f64, variance: f64) -> u32 {
    let ksize = if contrast < LOW_CONTRAST {
        debug!("Low contrast ({contrast:.3}): light blur");
        3
    } else if variance < MODERATE_VARIANCE {
        debug!("Moderate variance ({variance:.1}): balanced blur");
        7
    } else {
        debug!("High variance ({variance:.1}): strong blur");
        11
    };
    make_odd(ksize)
}

pub fn threshold_block_size(contrast: f64) -> u32 {
    let raw = (contrast * 30.0).round();
    let clamped = raw.clamp(BLOCK_SIZE_MIN as f64, BLOCK_SIZE_MAX as f64) as u32;
    make_odd(clamped)
}

pub fn threshold_constant(contrast: f64) -> i32 {
    let raw = (15.0 - contrast * 10.0).round();
    raw.min(THRESHOLD_CONSTANT_MAX as f64) as i32
}

/// Bump an even size by exactly one.
pub fn make_odd(size: u32) -> u32 {
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

// ── Bilateral filter ─────────────────────────────────────────────────────

/// Edge-preserving smoothing over a `diameter × diameter` window.
///
/// Neighbours are weighted by a spatial Gaussian (`sigma_space`) times a
/// Gaussian of their intensity difference (`sigma_color`).
pub fn bilateral_filter(
    src: &GrayImage,
    diameter: u32,
    sigma_color: f64,
    sigma_space: f64,
) -> GrayImage {
    if src.width() == 0 || src.height() == 0 {
        return src.clone();
    }
    let radius = (diameter / 2).clamp(1, u8::MAX as u32) as u8;
    bilateral::bilateral_filter(
        src,
        radius,
        sigma_space as f32,
        GaussianEuclideanColorDistance::new(sigma_color as f32),
    )
}

// ── Gaussian blur ────────────────────────────────────────────────────────

/// Normalised 1-D Gaussian kernel of odd length `ksize`.
///
/// Sizes up to 7 use the fixed binomial kernels; larger sizes derive sigma
/// from the size (`0.3·((k−1)/2 − 1) + 0.8`).
pub fn gaussian_kernel(ksize: u32) -> Vec<f32> {
    let ksize = make_odd(ksize.max(1));
    match ksize {
        1 => vec![1.0],
        3 => vec![0.25, 0.5, 0.25],
        5 => vec![0.0625, 0.25, 0.375, 0.25, 0.0625],
        7 => vec![0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
        _ => {
            let sigma = 0.3 * ((ksize as f64 - 1.0) * 0.5 - 1.0) + 0.8;
            let scale = -0.5 / (sigma * sigma);
            let half = (ksize / 2) as i64;
            let raw: Vec<f64> = (-half..=half)
                .map(|i| ((i * i) as f64 * scale).exp())
                .collect();
            let total: f64 = raw.iter().sum();
            raw.into_iter().map(|v| (v / total) as f32).collect()
        }
    }
}

/// Gaussian blur with a square `ksize × ksize` kernel.
pub fn gaussian_blur(src: &GrayImage, ksize: u32) -> GrayImage {
    if src.width() == 0 || src.height() == 0 {
        return src.clone();
    }
    separable_filter_equal(src, &gaussian_kernel(ksize))
}

// ── Adaptive threshold ───────────────────────────────────────────────────

/// Binary threshold against a Gaussian-weighted local mean over a
/// `block_size × block_size` neighbourhood.
///
/// A pixel becomes 255 when `src - mean > -c` (i.e. brighter than
/// `mean - c`), otherwise 0.
pub fn adaptive_threshold(src: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    let mean = gaussian_blur(src, block_size);
    GrayImage::from_fn(src.width(), src.height(), |x, y| {
        let s = src.get_pixel(x, y)[0] as i32;
        let m = mean.get_pixel(x, y)[0] as i32;
        Luma([if s - m > -c { 255 } else { 0 }])
    })
}
