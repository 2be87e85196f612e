//! Pipeline stages for image-to-document parsing.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the OCR engine or model provider can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ preprocess ──▶ ocr ──▶ extract ──▶ Document
//! (URL/path)  (stats,      (text)   (gemini | llm,
//!              filter)               postprocess, schema)
//! ```
//!
//! 1. [`input`]: read a path or download a URL; sniff and decode PNG/JPEG
//! 2. [`stats`]: grayscale mean, std, variance and contrast
//! 3. [`filter`]: parameter policy plus bilateral, Gaussian and
//!    adaptive-threshold filters
//! 4. [`preprocess`]: wires 2 and 3 into one pure function; CPU-bound, runs
//!    in `spawn_blocking`
//! 5. [`encode`]: PNG-encode the binarised image
//! 6. [`ocr`]: the [`ocr::TextRecognizer`] seam and the Tesseract
//!    implementation
//! 7. [`extract`]: the [`extract::StructuredExtractor`] seam with
//!    timeout, retry and validation; the only stage with network I/O
//!    besides URL download
//! 8. [`gemini`], [`llm`]: extractor backends
//! 9. [`postprocess`]: strip fences and prose around the model's JSON

pub mod encode;
pub mod extract;
pub mod filter;
pub mod gemini;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod preprocess;
pub mod stats;
