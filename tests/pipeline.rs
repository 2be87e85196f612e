//! Full-pipeline tests with stub collaborators.
//!
//! No Tesseract binary and no network: the OCR engine and the language model
//! are replaced by in-process implementations of `TextRecognizer` and
//! `StructuredExtractor`, so every stage boundary can be observed.

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use invoice2json::{
    parse, parse_batch, parse_image, parse_text, parse_to_file, DocumentType, ExtractionError,
    ExtractionRequest, InvoiceError, Language, ParseProgressCallback, ParserConfig,
    RecognitionError, Stage, StructuredExtractor, TextRecognizer,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const RECEIPT_TEXT: &str = "Receipt #123\nItem A x2 @ $5 = $10\nTotal: $10";

// ── Stub collaborators ───────────────────────────────────────────────────────

/// Returns fixed text and records what it was given.
struct StubRecognizer {
    text: String,
    calls: AtomicUsize,
    seen: Mutex<Option<(u32, u32, String, bool)>>,
}

impl StubRecognizer {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(None),
        })
    }
}

impl TextRecognizer for StubRecognizer {
    fn name(&self) -> &str {
        "stub-ocr"
    }

    fn recognize(&self, image: &RgbImage, language: &Language) -> Result<String, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let binary = image
            .pixels()
            .all(|p| (p[0] == 0 || p[0] == 255) && p[0] == p[1] && p[1] == p[2]);
        *self.seen.lock().unwrap() = Some((
            image.width(),
            image.height(),
            language.code().to_string(),
            binary,
        ));
        Ok(self.text.clone())
    }
}

struct FailingRecognizer;

impl TextRecognizer for FailingRecognizer {
    fn name(&self) -> &str {
        "failing-ocr"
    }

    fn recognize(&self, _image: &RgbImage, language: &Language) -> Result<String, RecognitionError> {
        Err(RecognitionError::EngineFailed {
            engine: "failing-ocr".into(),
            code: Some(1),
            stderr: format!("Failed loading language '{}'", language.code()),
        })
    }
}

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(receipt|invoice)\s*#\s*(\w+)").unwrap());
static RE_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(.+?)\s+x(\d+(?:\.\d+)?)\s*@\s*\$?(\d+(?:\.\d+)?)\s*=\s*\$?(\d+(?:\.\d+)?)\s*$")
        .unwrap()
});
static RE_TOTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^total:\s*\$?(\d+(?:\.\d+)?)").unwrap());

/// A rule-based stand-in for the language model: reads the instruction and
/// answers with schema-shaped JSON, the way a constrained model would.
struct RuleExtractor {
    calls: AtomicUsize,
}

impl RuleExtractor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StructuredExtractor for RuleExtractor {
    fn name(&self) -> &str {
        "rules"
    }

    async fn complete(&self, request: &ExtractionRequest) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(request.schema["required"], json!(["document_type"]));
        let text = &request.instruction;

        let mut doc = json!({ "document_type": "invoice" });
        if let Some(caps) = RE_NUMBER.captures(text) {
            doc["document_type"] = json!(caps[1].to_lowercase());
            doc["document_number"] = json!(&caps[2]);
        }
        let items: Vec<Value> = RE_ITEM
            .captures_iter(text)
            .map(|c| {
                json!({
                    "description": c[1].trim(),
                    "quantity": c[2].parse::<f64>().unwrap(),
                    "unit_price": c[3].parse::<f64>().unwrap(),
                    "total_price": c[4].parse::<f64>().unwrap(),
                })
            })
            .collect();
        if !items.is_empty() {
            doc["items"] = json!(items);
        }
        if let Some(c) = RE_TOTAL.captures(text) {
            doc["totals"] = json!({ "grand_total": c[1].parse::<f64>().unwrap() });
        }
        // wrapped the way chatty models do
        Ok(format!("```json\n{doc}\n```"))
    }
}

/// Replays a fixed list of replies.
struct Scripted {
    replies: Mutex<Vec<Result<String, ExtractionError>>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(mut replies: Vec<Result<String, ExtractionError>>) -> Arc<Self> {
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl StructuredExtractor for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &ExtractionRequest) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies.lock().unwrap().pop().unwrap_or_else(|| {
            Err(ExtractionError::EmptyResponse {
                provider: "scripted".into(),
            })
        })
    }
}

#[derive(Default)]
struct EventLog {
    events: Mutex<Vec<String>>,
}

impl ParseProgressCallback for EventLog {
    fn on_stage_start(&self, _input: &str, stage: Stage) {
        self.events.lock().unwrap().push(format!("start:{stage}"));
    }

    fn on_stage_complete(&self, _input: &str, stage: Stage, _elapsed_ms: u64) {
        self.events.lock().unwrap().push(format!("done:{stage}"));
    }

    fn on_stage_error(&self, _input: &str, stage: Stage, _error: &str) {
        self.events.lock().unwrap().push(format!("error:{stage}"));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Clean, high-contrast synthetic receipt: black glyph blocks on white.
fn synthetic_receipt(w: u32, h: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
        let in_line = (y / 10) % 3 == 1;
        let in_glyph = x > 8 && x < w - 8 && (x / 4) % 2 == 0;
        if in_line && in_glyph {
            Rgb([10, 10, 10])
        } else {
            Rgb([250, 250, 250])
        }
    }))
}

fn config_with(
    recognizer: Arc<dyn TextRecognizer>,
    extractor: Arc<dyn StructuredExtractor>,
) -> ParserConfig {
    ParserConfig::builder()
        .recognizer(recognizer)
        .extractor(extractor)
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

fn unreachable() -> ExtractionError {
    ExtractionError::Unreachable {
        provider: "scripted".into(),
        detail: "connection reset".into(),
    }
}

fn write_png(dir: &tempfile::TempDir, name: &str, image: &DynamicImage) -> String {
    let path = dir.path().join(name);
    image.save(&path).unwrap();
    path.to_str().unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn receipt_end_to_end_with_stub_collaborators() {
    let recognizer = StubRecognizer::new(RECEIPT_TEXT);
    let extractor = RuleExtractor::new();
    let config = config_with(recognizer.clone(), extractor.clone());

    let output = parse_image(synthetic_receipt(120, 90), &config)
        .await
        .expect("pipeline should succeed");

    let doc = &output.document;
    assert_eq!(doc.document_type, DocumentType::Receipt);
    assert_eq!(doc.document_number.as_deref(), Some("123"));

    let items = doc.items.as_ref().expect("items");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].description.as_deref(), Some("Item A"));
    assert_eq!(items[0].quantity, Some(2.0));
    assert_eq!(items[0].unit_price, Some(5.0));
    assert_eq!(items[0].total_price, Some(10.0));
    assert_eq!(items[0].tax_rate, 0.0);
    assert_eq!(doc.totals.as_ref().unwrap().grand_total, Some(10.0));
    assert!(doc.payment.is_none());

    assert_eq!(output.raw_text, RECEIPT_TEXT);
    assert_eq!(output.stats.width, Some(120));
    assert_eq!(output.stats.height, Some(90));
    assert_eq!(output.stats.extraction_attempts, 1);
    assert!(output.stats.filter.is_some());
    assert!(output.preprocessed.is_none());

    // OCR saw the binarised image at full size, in the default language
    let seen = recognizer.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen, (120, 90, "eng".to_string(), true));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn canonical_json_omits_unknown_fields() {
    let config = config_with(StubRecognizer::new(RECEIPT_TEXT), RuleExtractor::new());
    let output = parse_image(synthetic_receipt(60, 40), &config).await.unwrap();
    let value: Value = serde_json::from_str(&output.document.to_json_pretty().unwrap()).unwrap();
    let obj = value.as_object().unwrap();
    assert!(!obj.contains_key("payment"));
    assert!(!obj.contains_key("supplier"));
    assert!(!value.to_string().contains("null"));
    assert_eq!(value["totals"]["discount"], 0.0);
}

#[tokio::test]
async fn language_reaches_the_recognizer() {
    let recognizer = StubRecognizer::new(RECEIPT_TEXT);
    let config = ParserConfig::builder()
        .language(Language::German)
        .recognizer(recognizer.clone())
        .extractor(RuleExtractor::new())
        .build()
        .unwrap();
    parse_image(synthetic_receipt(40, 40), &config).await.unwrap();
    assert_eq!(recognizer.seen.lock().unwrap().as_ref().unwrap().2, "deu");
}

#[tokio::test]
async fn parse_from_path_and_write_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(&dir, "receipt.png", &synthetic_receipt(80, 60));
    let out_path = dir.path().join("out/receipt.json");
    let config = config_with(StubRecognizer::new(RECEIPT_TEXT), RuleExtractor::new());

    let output = parse_to_file(&input, &out_path, &config).await.unwrap();
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out_path).unwrap()).unwrap();
    assert_eq!(written["document_type"], "receipt");
    assert_eq!(written["items"][0]["quantity"], 2.0);
    assert_eq!(written, serde_json::to_value(&output.document).unwrap());
}

#[tokio::test]
async fn recognition_failure_stops_before_extraction() {
    let extractor = RuleExtractor::new();
    let config = ParserConfig::builder()
        .language(Language::Other("xyz".into()))
        .recognizer(Arc::new(FailingRecognizer))
        .extractor(extractor.clone())
        .build()
        .unwrap();

    let err = parse_image(synthetic_receipt(30, 30), &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Recognize);
    assert!(matches!(
        err,
        InvoiceError::Recognition(RecognitionError::EngineFailed { .. })
    ));
    // engine message surfaced unchanged
    assert!(err.to_string().contains("Failed loading language 'xyz'"));
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn schema_violation_is_an_extraction_error_not_a_document() {
    let extractor = Scripted::new(vec![Ok(json!({
        "document_type": "invoice",
        "items": [{ "description": "Widget", "quantity": 1, "tax_rate": 1.5 }]
    })
    .to_string())]);
    let config = config_with(StubRecognizer::new("Widget 1"), extractor.clone());

    let err = parse_image(synthetic_receipt(30, 30), &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Extract);
    match err {
        InvoiceError::Extraction(ExtractionError::SchemaViolation { violations }) => {
            assert_eq!(violations.len(), 1);
            assert!(violations[0].contains("tax_rate"), "{violations:?}");
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_document_type_is_never_defaulted() {
    let extractor = Scripted::new(vec![Ok(r#"{"document_number": "7"}"#.into())]);
    let config = config_with(StubRecognizer::new("text"), extractor);
    let err = parse_image(synthetic_receipt(20, 20), &config).await.unwrap_err();
    assert!(matches!(
        err,
        InvoiceError::Extraction(ExtractionError::InvalidPayload { .. })
    ));
}

#[tokio::test]
async fn transient_failure_is_retried_once_and_counted() {
    let extractor = Scripted::new(vec![
        Err(unreachable()),
        Ok(r#"{"document_type": "receipt"}"#.into()),
    ]);
    let config = config_with(StubRecognizer::new(RECEIPT_TEXT), extractor.clone());
    let output = parse_image(synthetic_receipt(20, 20), &config).await.unwrap();
    assert_eq!(output.stats.extraction_attempts, 2);
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn extraction_can_be_retried_alone_from_text() {
    let recognizer = StubRecognizer::new(RECEIPT_TEXT);
    let flaky = Scripted::new(vec![Err(unreachable()), Err(unreachable())]);
    let config = config_with(recognizer.clone(), flaky);

    let err = parse_image(synthetic_receipt(40, 30), &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Extract);
    assert!(matches!(
        err,
        InvoiceError::Extraction(ExtractionError::Unreachable { .. })
    ));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);

    // second try: extraction only, OCR not repeated
    let config = config_with(recognizer.clone(), RuleExtractor::new());
    let output = parse_text(RECEIPT_TEXT, &config).await.unwrap();
    assert_eq!(output.document.document_type, DocumentType::Receipt);
    assert_eq!(output.raw_text, RECEIPT_TEXT);
    assert!(output.stats.width.is_none());
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_image_input_fails_at_input_stage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invoice.png");
    std::fs::write(&path, b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n").unwrap();
    let recognizer = StubRecognizer::new(RECEIPT_TEXT);
    let config = config_with(recognizer.clone(), RuleExtractor::new());

    let err = parse(path.to_str().unwrap(), &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Input);
    assert!(matches!(err, InvoiceError::UnsupportedFormat { .. }));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_credentials_fail_before_any_work() {
    let recognizer = StubRecognizer::new(RECEIPT_TEXT);
    let config = ParserConfig::builder()
        .recognizer(recognizer.clone())
        .build()
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(&dir, "r.png", &synthetic_receipt(20, 20));

    let err = parse(&input, &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Config);
    assert!(matches!(err, InvoiceError::ProviderNotConfigured { .. }));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn progress_events_follow_the_stages() {
    let log = Arc::new(EventLog::default());
    let config = ParserConfig::builder()
        .recognizer(StubRecognizer::new(RECEIPT_TEXT))
        .extractor(RuleExtractor::new())
        .progress_callback(log.clone())
        .build()
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let input = write_png(&dir, "r.png", &synthetic_receipt(30, 20));

    parse(&input, &config).await.unwrap();
    assert_eq!(
        *log.events.lock().unwrap(),
        [
            "start:config",
            "done:config",
            "start:input",
            "done:input",
            "start:preprocess",
            "done:preprocess",
            "start:recognize",
            "done:recognize",
            "start:extract",
            "done:extract",
        ]
    );
}

#[tokio::test]
async fn failing_stage_is_reported_to_progress() {
    let log = Arc::new(EventLog::default());
    let config = ParserConfig::builder()
        .recognizer(Arc::new(FailingRecognizer))
        .extractor(RuleExtractor::new())
        .progress_callback(log.clone())
        .build()
        .unwrap();
    parse_image(synthetic_receipt(10, 10), &config).await.unwrap_err();
    let events = log.events.lock().unwrap();
    assert_eq!(events.last().map(String::as_str), Some("error:recognize"));
    assert!(!events.iter().any(|e| e.contains("extract")));
}

#[tokio::test]
async fn batch_keeps_input_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_png(&dir, "a.png", &synthetic_receipt(30, 20));
    let b = dir.path().join("missing.png").to_str().unwrap().to_string();
    let c = write_png(&dir, "c.png", &synthetic_receipt(50, 25));

    let config = ParserConfig::builder()
        .recognizer(StubRecognizer::new(RECEIPT_TEXT))
        .extractor(RuleExtractor::new())
        .concurrency(2)
        .build()
        .unwrap();

    let inputs = vec![a.clone(), b.clone(), c.clone()];
    let items = parse_batch(&inputs, &config).await.unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(
        items.iter().map(|i| i.input.as_str()).collect::<Vec<_>>(),
        [a.as_str(), b.as_str(), c.as_str()]
    );
    assert_eq!(items[0].result.as_ref().unwrap().stats.width, Some(30));
    assert!(matches!(
        items[1].result,
        Err(InvoiceError::FileNotFound { .. })
    ));
    assert_eq!(items[2].result.as_ref().unwrap().stats.width, Some(50));
}

#[tokio::test]
async fn preprocessed_image_is_kept_on_request() {
    let config = ParserConfig::builder()
        .recognizer(StubRecognizer::new(RECEIPT_TEXT))
        .extractor(RuleExtractor::new())
        .keep_preprocessed(true)
        .build()
        .unwrap();
    let output = parse_image(synthetic_receipt(64, 48), &config).await.unwrap();
    let image = output.preprocessed.expect("kept");
    assert_eq!(image.dimensions(), (64, 48));
    assert!(image.pixels().all(|p| p[0] == 0 || p[0] == 255));
}
