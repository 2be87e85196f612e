//! Global intensity statistics of a grayscale image.
//!
//! These four numbers drive every adaptive choice in
//! [`crate::pipeline::filter::FilterParameters`]. `contrast` is the
//! coefficient of variation `std / (mean + ε)`; the epsilon keeps an all-black
//! image from dividing by zero.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Added to the mean before dividing.
pub const CONTRAST_EPSILON: f64 = 1e-5;

/// Mean, spread and contrast of a grayscale image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Always `std * std`.
    pub variance: f64,
    pub contrast: f64,
}

impl ImageStats {
    /// Compute statistics over every pixel of `gray`.
    ///
    /// A zero-sized image yields all zeros.
    pub fn from_gray(gray: &GrayImage) -> Self {
        let n = gray.as_raw().len();
        if n == 0 {
            return Self::from_moments(0.0, 0.0);
        }

        let (sum, sum_sq) = gray.as_raw().iter().fold((0u64, 0u64), |(s, sq), &p| {
            let p = p as u64;
            (s + p, sq + p * p)
        });
        let n = n as f64;
        let mean = sum as f64 / n;
        // E[x²] - E[x]² can dip a hair below zero in floating point.
        let var = (sum_sq as f64 / n - mean * mean).max(0.0);
        Self::from_moments(mean, var.sqrt())
    }

    /// Build the derived fields from a mean and standard deviation.
    pub fn from_moments(mean: f64, std: f64) -> Self {
        Self {
            mean,
            std,
            variance: std * std,
            contrast: std / (mean + CONTRAST_EPSILON),
        }
    }
}
