//! # invoice2json
//!
//! Turn a photo or scan of an invoice or receipt into a validated JSON
//! document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PNG / JPEG
//!  │
//!  ├─ 1. Input       resolve local file or download from URL, sniff format
//!  ├─ 2. Preprocess  grayscale stats → adaptive bilateral / blur / threshold
//!  ├─ 3. Recognise   Tesseract (--psm 1 --oem 1) in the chosen language
//!  ├─ 4. Extract     schema-constrained LLM call (Gemini or edgequake-llm)
//!  ├─ 5. Validate    clean the reply, parse, check numeric bounds
//!  └─ 6. Output      Document + raw text + per-stage stats
//! ```
//!
//! Filter strength is derived from each image's own statistics, so a noisy
//! low-contrast phone photo gets heavier smoothing than a clean scan.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice2json::{parse, Credentials, Language, ParserConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ParserConfig::builder()
//!         .language(Language::Spanish)
//!         .credentials(Credentials::new(std::env::var("GEMINI_API_KEY")?))
//!         .build()?;
//!     let output = parse("ticket.jpg", &config).await?;
//!     println!("{}", output.document.to_json_pretty()?);
//!     eprintln!("{} attempt(s), {}ms",
//!         output.stats.extraction_attempts,
//!         output.stats.total_ms);
//!     Ok(())
//! }
//! ```
//!
//! ## Using the stages directly
//!
//! [`preprocess`] and [`extract`] are usable on their own: the first is a
//! pure image-to-image function, the second maps text to a [`Document`]
//! through any [`StructuredExtractor`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice2json = { version = "0.1", default-features = false }
//! ```
//!
//! ## Runtime requirements
//!
//! The `tesseract` binary with the traineddata for the languages you use
//! (`eng`, `spa`, `fra`, `deu`, `ita`). No native library is linked.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Credentials, Language, ParserConfig, ParserConfigBuilder};
pub use error::{ExtractionError, InvoiceError, RecognitionError, Stage};
pub use output::{BatchItem, ImageAnalysis, ParseOutput, ParseStats};
pub use parse::{
    analyze, parse, parse_batch, parse_from_bytes, parse_image, parse_sync, parse_text,
    parse_to_file,
};
pub use pipeline::extract::{extract, ExtractionOutcome, ExtractionRequest, StructuredExtractor};
pub use pipeline::filter::FilterParameters;
pub use pipeline::gemini::GeminiExtractor;
pub use pipeline::ocr::{TesseractRecognizer, TextRecognizer};
pub use pipeline::preprocess::{preprocess, preprocess_with_report, Preprocessed};
pub use pipeline::stats::ImageStats;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
pub use schema::{Document, DocumentType, Item, Party, Payment, Totals};
