//! Adaptive preprocessing: colour photo → binarised 3-channel image.
//!
//! ```text
//! RGB ─▶ luma ─▶ ImageStats ─▶ bilateral ─▶ gaussian ─▶ adaptive ─▶ RGB
//!                    │          (σc, σs)     (k)         threshold   (gray×3)
//!                    └──────────▶ FilterParameters ───────(block, C)
//! ```
//!
//! Statistics are taken once, from the unfiltered grayscale image, and every
//! later stage reads its parameters from the same [`FilterParameters`].
//! The function is pure: the same input always yields the same bytes.

use crate::pipeline::filter::{self, FilterParameters, BILATERAL_DIAMETER};
use crate::pipeline::stats::ImageStats;
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use std::time::Instant;
use tracing::debug;

/// Output of [`preprocess_with_report`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Binarised image, three identical channels.
    pub image: RgbImage,
    pub stats: ImageStats,
    pub params: FilterParameters,
}

/// Condition `image` for OCR. Output has the input's width and height.
pub fn preprocess(image: &DynamicImage) -> RgbImage {
    preprocess_with_report(image).image
}

/// Like [`preprocess`], also returning the statistics and parameters used.
pub fn preprocess_with_report(image: &DynamicImage) -> Preprocessed {
    let start = Instant::now();

    let gray = to_luma(image);
    let stats = ImageStats::from_gray(&gray);
    let params = FilterParameters::from_stats(&stats);
    debug!(
        "Image {}x{}: mean={:.2} std={:.2} variance={:.2} contrast={:.4}",
        gray.width(),
        gray.height(),
        stats.mean,
        stats.std,
        stats.variance,
        stats.contrast
    );

    let smoothed = filter::bilateral_filter(
        &gray,
        BILATERAL_DIAMETER,
        params.bilateral_sigma_color,
        params.bilateral_sigma_space,
    );
    let blurred = filter::gaussian_blur(&smoothed, params.blur_kernel_size);
    let binary = filter::adaptive_threshold(
        &blurred,
        params.threshold_block_size,
        params.threshold_constant,
    );
    let image = DynamicImage::ImageLuma8(binary).into_rgb8();

    debug!("Preprocessing finished in {:?}", start.elapsed());

    Preprocessed {
        image,
        stats,
        params,
    }
}

/// ITU-R BT.601 luma in 14-bit fixed point: `0.299 R + 0.587 G + 0.114 B`.
pub fn to_luma(image: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = image {
        return gray.clone();
    }
    let rgb = image.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let y = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + (1 << 13)) >> 14;
        Luma([y as u8])
    })
}
