//! End-to-end integration tests for invoice2json.
//!
//! These tests run the real `tesseract` binary on images in `./test_cases/`
//! and make live Gemini calls. They are gated behind the `E2E_ENABLED`
//! environment variable so they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 GEMINI_API_KEY=... cargo test --test e2e -- --nocapture
//!
//! To restrict to a specific test:
//!   E2E_ENABLED=1 cargo test --test e2e test_analyze -- --nocapture

use invoice2json::{
    analyze, parse, parse_batch, parse_sync, parse_text, parse_to_file, Credentials,
    DocumentType, ExtractionError, InvoiceError, Language, ParseOutput, ParserConfig, Stage,
};
use std::path::PathBuf;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Route library `tracing` output to the test harness; `RUST_LOG` picks levels.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn output_dir() -> PathBuf {
    let d = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases/output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no image at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test image not found: {}", p.display());
            println!("      Put a receipt photo at that path to enable this test");
            return;
        }
        p
    }};
}

/// Skip this test unless a Gemini key is available; evaluates to a config.
macro_rules! e2e_live_config {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let Ok(key) = std::env::var("GEMINI_API_KEY") else {
            println!("SKIP: GEMINI_API_KEY is not set");
            return;
        };
        ParserConfig::builder()
            .credentials(Credentials::new(key))
            .build()
            .expect("valid config")
    }};
}

/// Basic sanity checks every extracted document must pass.
fn assert_document_quality(output: &ParseOutput, context: &str) {
    let doc = &output.document;
    let json = doc.to_json_pretty().expect("serialisable");

    assert!(!json.contains("null"), "[{context}] JSON must not contain nulls");

    if let Some(items) = &doc.items {
        for (i, item) in items.iter().enumerate() {
            if let Some(q) = item.quantity {
                assert!(q > 0.0, "[{context}] items[{i}].quantity = {q}");
            }
            assert!(
                (0.0..=1.0).contains(&item.tax_rate),
                "[{context}] items[{i}].tax_rate = {}",
                item.tax_rate
            );
        }
    }
    if let Some(total) = doc.totals.as_ref().and_then(|t| t.grand_total) {
        assert!(total >= 0.0, "[{context}] grand_total = {total}");
    }

    println!(
        "[{context}] ✓  {} ({} item(s)), {} attempt(s), {}ms",
        doc.document_type.as_str(),
        doc.items.as_ref().map_or(0, Vec::len),
        output.stats.extraction_attempts,
        output.stats.total_ms
    );
}

fn sample_images() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(test_cases_dir()) else {
        return Vec::new();
    };
    let mut images: Vec<String> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("png" | "jpg" | "jpeg")
            )
        })
        .filter_map(|p| p.to_str().map(str::to_string))
        .collect();
    images.sort();
    images
}

const RECEIPT_TEXT: &str = "CAFE LUNA\n\
                            Receipt #123\n\
                            Item A x2 @ $5 = $10\n\
                            Total: $10\n\
                            Paid by card";

// ── Analysis tests (no LLM, no OCR) ──────────────────────────────────────────

#[tokio::test]
async fn test_analyze_sample_receipt() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.jpg"));

    let report = analyze(path.to_str().unwrap(), &ParserConfig::default())
        .await
        .expect("analyze() should succeed");

    assert!(report.width > 0 && report.height > 0);
    assert_eq!(report.filter.blur_kernel_size % 2, 1);
    assert!((5.0..=75.0).contains(&report.filter.bilateral_sigma_space));
    assert_eq!(report.filter.threshold_block_size % 2, 1);
    println!("Analysis: {}", serde_json::to_string_pretty(&report).unwrap());
}

// ── Extraction only (live LLM) ───────────────────────────────────────────────

#[tokio::test]
async fn test_parse_text_receipt() {
    init_tracing();
    let config = e2e_live_config!();

    let output = parse_text(RECEIPT_TEXT, &config)
        .await
        .expect("parse_text() should succeed");
    assert_document_quality(&output, "receipt text");

    let doc = &output.document;
    assert_eq!(doc.document_type, DocumentType::Receipt);
    let items = doc.items.as_ref().expect("one item");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].quantity, Some(2.0));
    assert_eq!(items[0].unit_price, Some(5.0));
    assert_eq!(items[0].total_price, Some(10.0));
    assert_eq!(doc.totals.as_ref().and_then(|t| t.grand_total), Some(10.0));
    assert_eq!(output.raw_text, RECEIPT_TEXT);
}

#[test]
fn test_parse_text_blocking() {
    let config = e2e_live_config!();
    let output = tokio_test::block_on(parse_text(
        "INVOICE No. 2024-17\nConsulting 3h @ 100.00 = 300.00\nVAT 21% 63.00\nTOTAL 363.00",
        &config,
    ))
    .expect("parse_text() should succeed");
    assert_document_quality(&output, "invoice text");
    assert_eq!(output.document.document_type, DocumentType::Invoice);
}

#[tokio::test]
async fn test_invalid_key_is_auth_error() {
    let _ = e2e_live_config!();
    let config = ParserConfig::builder()
        .credentials(Credentials::new("not-a-real-key"))
        .build()
        .unwrap();

    let err = parse_text(RECEIPT_TEXT, &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Extract);
    assert!(
        matches!(
            err,
            InvoiceError::Extraction(ExtractionError::AuthFailed { .. })
        ),
        "unexpected: {err:?}"
    );
}

// ── Full pipeline (tesseract + live LLM) ─────────────────────────────────────

#[tokio::test]
async fn test_parse_sample_receipt() {
    init_tracing();
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.jpg"));
    let config = e2e_live_config!();

    let out_path = output_dir().join("receipt.json");
    let output = parse_to_file(path.to_str().unwrap(), &out_path, &config)
        .await
        .expect("parse_to_file() should succeed");

    assert!(!output.raw_text.trim().is_empty());
    assert!(output.stats.width.is_some());
    assert_document_quality(&output, "receipt.jpg");
    assert!(out_path.exists());
}

#[tokio::test]
async fn test_parse_spanish_ticket() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("ticket_es.jpg"));
    let mut config = e2e_live_config!();
    config.language = Language::Spanish;

    let output = parse(path.to_str().unwrap(), &config)
        .await
        .expect("parse() should succeed");
    assert_document_quality(&output, "ticket_es.jpg");
}

#[tokio::test]
async fn test_unknown_language_fails_at_recognition() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.jpg"));
    let mut config = e2e_live_config!();
    config.language = Language::Other("xyz".into());

    let err = parse(path.to_str().unwrap(), &config).await.unwrap_err();
    assert_eq!(err.stage(), Stage::Recognize, "got: {err}");
}

#[test]
fn test_parse_sync_sample_receipt() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("receipt.jpg"));
    let config = e2e_live_config!();

    let output = parse_sync(path.to_str().unwrap(), &config).expect("parse_sync() should succeed");
    assert_document_quality(&output, "receipt.jpg (sync)");
}

#[tokio::test]
async fn test_batch_all_samples() {
    init_tracing();
    let dir = e2e_skip_unless_ready!(test_cases_dir());
    let mut config = e2e_live_config!();
    config.concurrency = 2;

    let images = sample_images();
    if images.is_empty() {
        println!("SKIP: no PNG/JPEG files in {}", dir.display());
        return;
    }

    let items = parse_batch(&images, &config).await.expect("batch runs");
    assert_eq!(items.len(), images.len());
    for (item, input) in items.iter().zip(&images) {
        assert_eq!(&item.input, input);
        match &item.result {
            Ok(output) => assert_document_quality(output, input),
            Err(e) => println!("[{input}] ✗  {} stage: {e}", e.stage()),
        }
    }
}
