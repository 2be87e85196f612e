//! Image encoding: binarised `RgbImage` → PNG bytes for the OCR engine.
//!
//! PNG is lossless, so the two-level threshold decision reaches the engine
//! exactly as computed. JPEG would smear ringing artefacts around every
//! glyph edge.

use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// Encode an image as PNG in memory.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Write an image to `path` as PNG.
pub fn write_png(img: &RgbImage, path: &Path) -> Result<(), image::ImageError> {
    let bytes = encode_png(img)?;
    std::fs::write(path, bytes).map_err(image::ImageError::IoError)
}
