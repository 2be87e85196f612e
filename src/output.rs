//! Output types returned by the parse entry points.

use crate::pipeline::filter::FilterParameters;
use crate::pipeline::stats::ImageStats;
use crate::schema::Document;
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// The complete result of parsing one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParseOutput {
    /// The validated document.
    pub document: Document,

    /// OCR output exactly as the engine returned it.
    pub raw_text: String,

    pub stats: ParseStats,

    /// The binarised image handed to OCR, when
    /// [`crate::config::ParserConfig::keep_preprocessed`] is set.
    #[serde(skip)]
    pub preprocessed: Option<RgbImage>,
}

/// Timings and image facts for one parse.
///
/// Image fields are `None` when the parse started from text
/// ([`crate::parse::parse_text`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_stats: Option<ImageStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterParameters>,

    pub preprocess_ms: u64,
    pub recognize_ms: u64,
    pub extract_ms: u64,
    pub total_ms: u64,

    /// Extraction calls made, including the successful one.
    pub extraction_attempts: u32,
}

/// What [`crate::parse::analyze`] reports: the preprocessing decisions for an
/// image, without OCR or extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub width: u32,
    pub height: u32,
    pub stats: ImageStats,
    pub filter: FilterParameters,
}

/// One entry of [`crate::parse::parse_batch`]: the input and its outcome.
#[derive(Debug)]
pub struct BatchItem {
    pub input: String,
    pub result: Result<ParseOutput, crate::error::InvoiceError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DocumentType;

    #[test]
    fn text_only_stats_omit_image_fields() {
        let out = ParseOutput {
            document: Document::new(DocumentType::Receipt),
            raw_text: "Total 3".into(),
            stats: ParseStats {
                extract_ms: 12,
                total_ms: 12,
                extraction_attempts: 1,
                ..Default::default()
            },
            preprocessed: None,
        };
        let v = serde_json::to_value(&out).unwrap();
        assert!(v["stats"].get("width").is_none());
        assert!(v["stats"].get("filter").is_none());
        assert_eq!(v["stats"]["extraction_attempts"], 1);
        assert_eq!(v["document"]["document_type"], "receipt");
    }
}
