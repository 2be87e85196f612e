//! Error types for the invoice2json library.
//!
//! Three error types mirror the three places a parse can go wrong:
//!
//! * [`InvoiceError`]: **Fatal** for the whole request. Returned from every
//!   top-level `parse*` function. Wraps the two collaborator errors below so
//!   a caller can match on the stage that failed.
//!
//! * [`RecognitionError`]: the OCR engine could not turn the preprocessed
//!   image into text. The core never retries these.
//!
//! * [`ExtractionError`]: the language model could not be reached, rejected
//!   the credentials, or returned a payload that does not validate against
//!   the document schema. Transient network failures get one retry inside
//!   the core; schema failures never do.
//!
//! Keeping recognition and extraction failures apart lets a caller retry
//! extraction alone (via [`crate::parse::parse_text`]) without running OCR
//! again.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice2json library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither a readable path nor an HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes are not a PNG or JPEG raster.
    #[error("'{input}' is not a PNG or JPEG image\nFirst bytes: {magic:?}")]
    UnsupportedFormat { input: String, magic: Vec<u8> },

    /// The format was recognised but decoding the raster failed.
    #[error("Failed to decode image '{input}': {source}")]
    ImageDecode {
        input: String,
        #[source]
        source: image::ImageError,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// Text recognition failed; the pipeline stopped before extraction.
    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    /// Structured extraction failed; OCR text (if any) is still valid.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    // ── Config errors ─────────────────────────────────────────────────────
    /// The extraction provider cannot be used (missing API key etc.).
    #[error("Extraction provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvoiceError {
    /// The pipeline stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            InvoiceError::FileNotFound { .. }
            | InvoiceError::PermissionDenied { .. }
            | InvoiceError::InvalidInput { .. }
            | InvoiceError::DownloadFailed { .. }
            | InvoiceError::DownloadTimeout { .. }
            | InvoiceError::UnsupportedFormat { .. }
            | InvoiceError::ImageDecode { .. } => Stage::Input,
            InvoiceError::Recognition(_) => Stage::Recognize,
            InvoiceError::Extraction(_) => Stage::Extract,
            InvoiceError::ProviderNotConfigured { .. } | InvoiceError::InvalidConfig(_) => {
                Stage::Config
            }
            InvoiceError::OutputWriteFailed { .. } => Stage::Output,
            InvoiceError::Internal(_) => Stage::Preprocess,
        }
    }
}

/// Coarse pipeline stage, used for error attribution and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Input,
    Preprocess,
    Recognize,
    Extract,
    Output,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Input => "input",
            Stage::Preprocess => "preprocess",
            Stage::Recognize => "recognize",
            Stage::Extract => "extract",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

/// Failure of the text-recognition collaborator.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The OCR engine binary could not be started.
    #[error("OCR engine '{engine}' is not available: {hint}")]
    EngineNotAvailable { engine: String, hint: String },

    /// The engine ran and exited non-zero. `stderr` is passed through as-is
    /// (e.g. "Failed loading language 'xyz'").
    #[error("OCR engine '{engine}' failed (exit code {code:?}): {stderr}")]
    EngineFailed {
        engine: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The engine produced no text for a non-empty image.
    #[error("OCR engine '{engine}' returned no text for a {width}x{height} image")]
    EmptyOutput {
        engine: String,
        width: u32,
        height: u32,
    },

    /// The preprocessed image could not be handed to the engine.
    #[error("Failed to encode image for OCR: {0}")]
    Encode(String),

    #[error("OCR I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of the structured-extraction collaborator.
///
/// Never paired with a partially filled [`crate::schema::Document`].
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Connection to the provider could not be established.
    #[error("Extraction provider '{provider}' is unreachable: {detail}")]
    Unreachable { provider: String, detail: String },

    /// The call did not complete within the configured timeout.
    #[error("Extraction call to '{provider}' timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    /// The provider rejected the credentials (401/403 or an invalid key).
    #[error("Authentication error from provider '{provider}': {detail}")]
    AuthFailed { provider: String, detail: String },

    /// The provider returned HTTP 429.
    #[error("Rate limit exceeded for provider '{provider}'")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    /// Any other provider-side error.
    #[error("Extraction API error from '{provider}' (status {status:?}): {message}")]
    Api {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// The provider answered without any content.
    #[error("Extraction provider '{provider}' returned an empty response")]
    EmptyResponse { provider: String },

    /// The payload is not a JSON document of the expected shape
    /// (missing `document_type`, unknown literal, wrong value types).
    #[error("Extraction payload does not match the document schema: {detail}")]
    InvalidPayload { detail: String },

    /// The payload parsed but one or more numeric constraints are violated.
    #[error("Extraction payload violates {} schema constraint(s): {}", .violations.len(), .violations.join("; "))]
    SchemaViolation { violations: Vec<String> },
}

impl ExtractionError {
    /// Whether a single retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Unreachable { .. }
            | ExtractionError::Timeout { .. }
            | ExtractionError::RateLimited { .. } => true,
            ExtractionError::Api { status, .. } => matches!(status, Some(s) if *s >= 500),
            _ => false,
        }
    }

    /// Whether the provider answered but the answer failed validation.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            ExtractionError::InvalidPayload { .. } | ExtractionError::SchemaViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_violation_display_lists_every_violation() {
        let e = ExtractionError::SchemaViolation {
            violations: vec![
                "items[0].quantity must be > 0 (got -1)".into(),
                "items[0].tax_rate must be <= 1 (got 1.5)".into(),
            ],
        };
        let msg = e.to_string();
        assert!(msg.contains("2 schema constraint"), "got: {msg}");
        assert!(msg.contains("quantity"));
        assert!(msg.contains("tax_rate"));
    }

    #[test]
    fn transient_classification() {
        assert!(ExtractionError::Timeout {
            provider: "gemini".into(),
            secs: 30
        }
        .is_transient());
        assert!(ExtractionError::Api {
            provider: "gemini".into(),
            status: Some(503),
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!ExtractionError::Api {
            provider: "gemini".into(),
            status: Some(400),
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ExtractionError::AuthFailed {
            provider: "gemini".into(),
            detail: "bad key".into()
        }
        .is_transient());
        assert!(!ExtractionError::InvalidPayload {
            detail: "missing field".into()
        }
        .is_transient());
    }

    #[test]
    fn stage_distinguishes_recognition_from_extraction() {
        let ocr: InvoiceError = RecognitionError::EmptyOutput {
            engine: "tesseract".into(),
            width: 10,
            height: 10,
        }
        .into();
        let llm: InvoiceError = ExtractionError::EmptyResponse {
            provider: "gemini".into(),
        }
        .into();
        assert_eq!(ocr.stage(), Stage::Recognize);
        assert_eq!(llm.stage(), Stage::Extract);
    }

    #[test]
    fn engine_stderr_is_surfaced_unchanged() {
        let e = RecognitionError::EngineFailed {
            engine: "tesseract".into(),
            code: Some(1),
            stderr: "Failed loading language 'xyz'".into(),
        };
        assert!(e.to_string().contains("Failed loading language 'xyz'"));
    }
}
