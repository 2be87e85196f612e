//! Text recognition: preprocessed image + language → raw text.
//!
//! The engine is a black box behind [`TextRecognizer`]. The bundled
//! implementation shells out to the `tesseract` binary, so nothing has to be
//! linked at build time; the image travels through a PNG in a temp
//! directory that is removed when recognition returns.
//!
//! Tesseract always runs with automatic page segmentation with OSD
//! (`--psm 1`) and the LSTM engine (`--oem 1`).

use crate::config::Language;
use crate::error::RecognitionError;
use crate::pipeline::encode;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;
use tracing::debug;

/// Page segmentation mode passed to the engine.
pub const PAGE_SEGMENTATION_MODE: &str = "1";
/// OCR engine mode passed to the engine.
pub const ENGINE_MODE: &str = "1";

/// An OCR engine.
///
/// Implementations must be `Send + Sync`: recognition runs on a blocking
/// worker thread and the same recognizer may serve concurrent parses.
pub trait TextRecognizer: Send + Sync {
    /// Short engine name used in errors and logs.
    fn name(&self) -> &str;

    /// Recognise the text in `image`.
    fn recognize(&self, image: &RgbImage, language: &Language) -> Result<String, RecognitionError>;
}

/// Tesseract via its command-line binary.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    binary: PathBuf,
}

impl TesseractRecognizer {
    /// Use `tesseract` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("tesseract")
    }

    /// Use a specific executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, image_path: &Path, language: &Language) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(image_path)
            .arg("stdout")
            .args(["-l", language.code()])
            .args(["--psm", PAGE_SEGMENTATION_MODE])
            .args(["--oem", ENGINE_MODE]);
        cmd
    }
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &RgbImage, language: &Language) -> Result<String, RecognitionError> {
        let png = encode::encode_png(image).map_err(|e| RecognitionError::Encode(e.to_string()))?;
        let dir = TempDir::new()?;
        let path = dir.path().join("page.png");
        std::fs::write(&path, png)?;

        debug!(
            "Running {} on {}x{} image (lang={})",
            self.binary.display(),
            image.width(),
            image.height(),
            language.code()
        );

        let output = match self.command(&path, language).output() {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecognitionError::EngineNotAvailable {
                    engine: self.binary.display().to_string(),
                    hint: "install tesseract-ocr or pass --tesseract <PATH>".to_string(),
                });
            }
            Err(e) => return Err(RecognitionError::Io(e)),
        };

        if !output.status.success() {
            return Err(RecognitionError::EngineFailed {
                engine: self.name().to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        ensure_text(self.name(), image, text)
    }
}

/// Reject blank output for a non-empty image.
pub(crate) fn ensure_text(
    engine: &str,
    image: &RgbImage,
    text: String,
) -> Result<String, RecognitionError> {
    let non_empty_image = image.width() > 0 && image.height() > 0;
    if non_empty_image && text.trim().is_empty() {
        return Err(RecognitionError::EmptyOutput {
            engine: engine.to_string(),
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(text)
}
