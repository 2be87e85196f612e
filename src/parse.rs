//! End-to-end parsing entry points.
//!
//! Every entry point runs the same stages in the same order and stops at the
//! first failure; the returned [`InvoiceError::stage`] says where. Because
//! recognition and extraction fail separately, a caller holding the
//! recognised text can retry extraction alone through [`parse_text`].
//!
//! Preprocessing and OCR are CPU-bound and run in `spawn_blocking`; the
//! extraction call is the only awaited network I/O besides URL download.

use crate::config::{ParserConfig, DEFAULT_PROVIDER};
use crate::error::{InvoiceError, Stage};
use crate::output::{BatchItem, ImageAnalysis, ParseOutput, ParseStats};
use crate::pipeline::extract::{self, StructuredExtractor};
use crate::pipeline::filter::FilterParameters;
use crate::pipeline::gemini::GeminiExtractor;
use crate::pipeline::llm::{self, LlmProviderExtractor};
use crate::pipeline::ocr::{TesseractRecognizer, TextRecognizer};
use crate::pipeline::preprocess::{preprocess_with_report, to_luma};
use crate::pipeline::stats::ImageStats;
use crate::pipeline::input;
use futures::stream::{self, StreamExt};
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Label used in errors and progress events for in-memory inputs.
const MEMORY_LABEL: &str = "<memory>";

/// Parse an invoice or receipt image from a file path or URL.
///
/// This is the primary entry point for the library.
///
/// # Arguments
/// * `input`: Local file path or HTTP/HTTPS URL to a PNG or JPEG image
/// * `config`: Parser configuration (language, provider, credentials)
///
/// # Errors
/// Returns `Err(InvoiceError)` at the first failing stage:
/// - configuration (no credentials for the selected provider)
/// - input (not found, not PNG/JPEG, undecodable)
/// - recognition (engine missing or failed, empty text)
/// - extraction (unreachable, auth, schema violation)
///
/// # Example
/// ```rust,no_run
/// use invoice2json::{parse, Credentials, ParserConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ParserConfig::builder()
///     .credentials(Credentials::new(std::env::var("GEMINI_API_KEY")?))
///     .build()?;
/// let output = parse("receipt.jpg", &config).await?;
/// println!("{}", output.document.to_json_pretty()?);
/// # Ok(())
/// # }
/// ```
pub async fn parse(
    input_str: impl AsRef<str>,
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    let input_str = input_str.as_ref();
    let reporter = Reporter::new(config, input_str);
    let extractor = reporter.run_sync(Stage::Config, || resolve_extractor(config))?;
    parse_input(input_str, config, extractor.as_ref()).await
}

/// Parse an image held in memory as PNG or JPEG bytes.
pub async fn parse_from_bytes(
    bytes: &[u8],
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    let reporter = Reporter::new(config, MEMORY_LABEL);
    let extractor = reporter.run_sync(Stage::Config, || resolve_extractor(config))?;
    let image = reporter.run_sync(Stage::Input, || input::decode_image(MEMORY_LABEL, bytes))?;
    run_pipeline(MEMORY_LABEL, image, config, extractor.as_ref()).await
}

/// Parse an already decoded image.
pub async fn parse_image(
    image: DynamicImage,
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    let reporter = Reporter::new(config, MEMORY_LABEL);
    let extractor = reporter.run_sync(Stage::Config, || resolve_extractor(config))?;
    run_pipeline(MEMORY_LABEL, image, config, extractor.as_ref()).await
}

/// Run extraction alone on already recognised text.
///
/// Use this to retry after an extraction failure without repeating OCR.
/// `raw_text` in the output is `text` unchanged; image statistics are absent.
pub async fn parse_text(
    text: impl AsRef<str>,
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    let text = text.as_ref();
    let total_start = Instant::now();
    let reporter = Reporter::new(config, MEMORY_LABEL);
    let extractor = reporter.run_sync(Stage::Config, || resolve_extractor(config))?;

    reporter.start(Stage::Extract);
    let outcome = extract::extract(extractor.as_ref(), text, config)
        .await
        .map_err(|e| reporter.fail(Stage::Extract, e.into()))?;
    reporter.complete(Stage::Extract, outcome.duration_ms);

    Ok(ParseOutput {
        document: outcome.document,
        raw_text: text.to_string(),
        stats: ParseStats {
            extract_ms: outcome.duration_ms,
            total_ms: total_start.elapsed().as_millis() as u64,
            extraction_attempts: outcome.attempts,
            ..Default::default()
        },
        preprocessed: None,
    })
}

/// Parse an image and write the document as pretty JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) so a failed run never leaves a
/// partial file behind.
pub async fn parse_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    let output = parse(input_str, config).await?;
    write_document(&output, output_path.as_ref()).await?;
    Ok(output)
}

/// Write `output.document` as pretty JSON, atomically.
pub async fn write_document(output: &ParseOutput, path: &Path) -> Result<(), InvoiceError> {
    let write_failed = |source: std::io::Error| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut json = output
        .document
        .to_json_pretty()
        .map_err(|e| InvoiceError::Internal(format!("serialise document: {e}")))?;
    json.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let written = match tokio::fs::write(&tmp_path, json).await {
        Ok(()) => tokio::fs::rename(&tmp_path, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_failed(e));
    }
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Synchronous wrapper around [`parse`].
///
/// Creates a temporary tokio runtime internally.
pub fn parse_sync(
    input_str: impl AsRef<str>,
    config: &ParserConfig,
) -> Result<ParseOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse(input_str, config))
}

/// Parse several independent images, at most `config.concurrency` at a time.
///
/// Results come back in input order. A configuration error fails the whole
/// batch up front; every other failure is reported per item.
pub async fn parse_batch<S: AsRef<str>>(
    inputs: &[S],
    config: &ParserConfig,
) -> Result<Vec<BatchItem>, InvoiceError> {
    let extractor = resolve_extractor(config)?;
    info!(
        "Parsing {} images with concurrency {}",
        inputs.len(),
        config.concurrency
    );

    let items = stream::iter(inputs.iter().map(|input| {
        let extractor = Arc::clone(&extractor);
        let input = input.as_ref().to_string();
        async move {
            let result = parse_input(&input, config, extractor.as_ref()).await;
            BatchItem { input, result }
        }
    }))
    .buffered(config.concurrency.max(1))
    .collect()
    .await;

    Ok(items)
}

/// Report the preprocessing decisions for an image without running OCR or
/// extraction.
///
/// Needs no credentials and no OCR engine.
pub async fn analyze(
    input_str: impl AsRef<str>,
    config: &ParserConfig,
) -> Result<ImageAnalysis, InvoiceError> {
    let image = input::load_image(input_str.as_ref(), config.download_timeout_secs).await?;
    tokio::task::spawn_blocking(move || {
        let gray = to_luma(&image);
        let stats = ImageStats::from_gray(&gray);
        ImageAnalysis {
            width: gray.width(),
            height: gray.height(),
            stats,
            filter: FilterParameters::from_stats(&stats),
        }
    })
    .await
    .map_err(|e| InvoiceError::Internal(format!("analysis task failed: {e}")))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn parse_input(
    input_str: &str,
    config: &ParserConfig,
    extractor: &dyn StructuredExtractor,
) -> Result<ParseOutput, InvoiceError> {
    info!("Parsing: {}", input_str);
    let reporter = Reporter::new(config, input_str);

    reporter.start(Stage::Input);
    let start = Instant::now();
    let image = input::load_image(input_str, config.download_timeout_secs)
        .await
        .map_err(|e| reporter.fail(Stage::Input, e))?;
    reporter.complete(Stage::Input, start.elapsed().as_millis() as u64);

    run_pipeline(input_str, image, config, extractor).await
}

/// Preprocess → recognise → extract.
async fn run_pipeline(
    label: &str,
    image: DynamicImage,
    config: &ParserConfig,
    extractor: &dyn StructuredExtractor,
) -> Result<ParseOutput, InvoiceError> {
    let total_start = Instant::now();
    let reporter = Reporter::new(config, label);
    let (width, height) = (image.width(), image.height());

    // ── Step 1: Preprocess ───────────────────────────────────────────────
    reporter.start(Stage::Preprocess);
    let start = Instant::now();
    let pre = tokio::task::spawn_blocking(move || preprocess_with_report(&image))
        .await
        .map_err(|e| {
            reporter.fail(
                Stage::Preprocess,
                InvoiceError::Internal(format!("preprocessing task failed: {e}")),
            )
        })?;
    let preprocess_ms = start.elapsed().as_millis() as u64;
    reporter.complete(Stage::Preprocess, preprocess_ms);

    // ── Step 2: Recognise ────────────────────────────────────────────────
    reporter.start(Stage::Recognize);
    let start = Instant::now();
    let recognizer = resolve_recognizer(config);
    let language = config.language.clone();
    let binary = pre.image;
    let (binary, recognized) = tokio::task::spawn_blocking(move || {
        let text = recognizer.recognize(&binary, &language);
        (binary, text)
    })
    .await
    .map_err(|e| {
        reporter.fail(
            Stage::Recognize,
            InvoiceError::Internal(format!("recognition task failed: {e}")),
        )
    })?;
    let raw_text = recognized.map_err(|e| reporter.fail(Stage::Recognize, e.into()))?;
    let recognize_ms = start.elapsed().as_millis() as u64;
    reporter.complete(Stage::Recognize, recognize_ms);
    debug!("Recognised {} chars in {}ms", raw_text.len(), recognize_ms);

    // ── Step 3: Extract ──────────────────────────────────────────────────
    reporter.start(Stage::Extract);
    let outcome = extract::extract(extractor, &raw_text, config)
        .await
        .map_err(|e| reporter.fail(Stage::Extract, e.into()))?;
    reporter.complete(Stage::Extract, outcome.duration_ms);

    let stats = ParseStats {
        width: Some(width),
        height: Some(height),
        image_stats: Some(pre.stats),
        filter: Some(pre.params),
        preprocess_ms,
        recognize_ms,
        extract_ms: outcome.duration_ms,
        total_ms: total_start.elapsed().as_millis() as u64,
        extraction_attempts: outcome.attempts,
    };
    info!(
        "Parsed {} as {} in {}ms",
        label,
        outcome.document.document_type.as_str(),
        stats.total_ms
    );

    Ok(ParseOutput {
        document: outcome.document,
        raw_text,
        stats,
        preprocessed: config.keep_preprocessed.then_some(binary),
    })
}

/// Resolve the OCR engine: a pre-built recognizer, else Tesseract at
/// `config.tesseract_path`.
fn resolve_recognizer(config: &ParserConfig) -> Arc<dyn TextRecognizer> {
    match config.recognizer {
        Some(ref recognizer) => Arc::clone(recognizer),
        None => Arc::new(TesseractRecognizer::with_binary(&config.tesseract_path)),
    }
}

/// Resolve the extraction backend, from most-specific to least-specific.
///
/// 1. **Pre-built extractor** (`config.extractor`), used as-is.
/// 2. **Gemini** (`provider_name == "gemini"`), which needs
///    `config.credentials`.
/// 3. **Any other provider name**, created through
///    [`llm::create_provider`] from the same `config.credentials`.
///
/// The process environment is never consulted.
pub fn resolve_extractor(
    config: &ParserConfig,
) -> Result<Arc<dyn StructuredExtractor>, InvoiceError> {
    if let Some(ref extractor) = config.extractor {
        return Ok(Arc::clone(extractor));
    }

    let name = config.provider_name.trim();
    if name.eq_ignore_ascii_case(DEFAULT_PROVIDER) {
        let credentials = config
            .credentials
            .clone()
            .filter(|c| !c.is_blank())
            .ok_or_else(|| InvoiceError::ProviderNotConfigured {
                provider: DEFAULT_PROVIDER.to_string(),
                hint: "No API key supplied.\n\
                       Pass --api-key, set GEMINI_API_KEY for the CLI, or call \
                       ParserConfigBuilder::credentials."
                    .to_string(),
            })?;
        debug!("Using gemini extractor, model {}", config.model);
        return Ok(Arc::new(GeminiExtractor::new(credentials)?));
    }

    let name = name.to_ascii_lowercase();
    let provider = llm::create_provider(&name, &config.model, config.credentials.as_ref())?;
    debug!("Using {} extractor, model {}", name, config.model);
    Ok(Arc::new(LlmProviderExtractor::new(provider, name)))
}

/// Progress-callback plumbing for one input.
struct Reporter<'a> {
    config: &'a ParserConfig,
    input: &'a str,
}

impl<'a> Reporter<'a> {
    fn new(config: &'a ParserConfig, input: &'a str) -> Self {
        Self { config, input }
    }

    fn start(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_start(self.input, stage);
        }
    }

    fn complete(&self, stage: Stage, elapsed_ms: u64) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_complete(self.input, stage, elapsed_ms);
        }
    }

    /// Report `err` against `stage` and hand it back for `?`.
    fn fail(&self, stage: Stage, err: InvoiceError) -> InvoiceError {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage_error(self.input, stage, &err.to_string());
        }
        err
    }

    fn run_sync<T>(
        &self,
        stage: Stage,
        f: impl FnOnce() -> Result<T, InvoiceError>,
    ) -> Result<T, InvoiceError> {
        self.start(stage);
        let start = Instant::now();
        let value = f().map_err(|e| self.fail(stage, e))?;
        self.complete(stage, start.elapsed().as_millis() as u64);
        Ok(value)
    }
}
