//! CLI binary for invoice2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ParserConfig` and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use invoice2json::pipeline::encode;
use invoice2json::{
    analyze, parse, parse_batch, parse_text, Credentials, InvoiceError, Language, ParseOutput,
    ParseProgressCallback, ParserConfig, ProgressCallback, Stage,
};
use serde_json::json;
use std::collections::HashSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over all inputs, with the current
/// stage in the message and a log line per finished input.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let template = if total > 1 {
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len}  {msg}"
        } else {
            "{spinner:.cyan} {prefix:.bold}  {msg}"
        };
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Parsing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ParseProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, input: &str, stage: Stage) {
        let label = match stage {
            Stage::Config => "configuring",
            Stage::Input => "reading",
            Stage::Preprocess => "preprocessing",
            Stage::Recognize => "recognising text",
            Stage::Extract => "extracting fields",
            Stage::Output => "writing",
        };
        self.bar.set_message(format!("{}  {}", dim(input), label));
    }

    fn on_stage_complete(&self, input: &str, stage: Stage, elapsed_ms: u64) {
        if stage == Stage::Extract {
            self.bar.println(format!(
                "  {} {}  {}",
                green("✓"),
                input,
                dim(&format!("extracted in {:.1}s", elapsed_ms as f64 / 1000.0)),
            ));
            self.bar.inc(1);
        }
    }

    fn on_stage_error(&self, input: &str, stage: Stage, error: &str) {
        let first_line = error.lines().next().unwrap_or(error);
        let msg = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            input,
            dim(&stage.to_string()),
            red(&msg),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse a receipt photo (JSON on stdout)
  invoice2json receipt.jpg

  # Spanish invoice, written to a file
  invoice2json --language spa factura.png -o factura.json

  # Several images, one JSON file each
  invoice2json scans/*.jpg -o out/

  # Inspect the preprocessing decisions (no API key, no OCR)
  invoice2json --analyze-only receipt.jpg

  # Keep the binarised image handed to OCR
  invoice2json receipt.jpg --save-preprocessed receipt.bin.png

  # Retry extraction on saved OCR text
  invoice2json --from-text receipt.txt

  # Use another provider through edgequake-llm
  invoice2json --provider openai --model gpt-4.1-mini receipt.jpg

LANGUAGES:
  eng (English, default)   spa (Spanish)   fra (French)
  deu (German)             ita (Italian)
  Any other Tesseract code (e.g. eng+spa) is passed through as-is.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (provider "gemini")
  OPENAI_API_KEY          OpenAI API key (provider "openai")
  ANTHROPIC_API_KEY       Anthropic API key (provider "anthropic")
  OPENROUTER_API_KEY      OpenRouter API key (provider "openrouter")
                          Only the variable for the selected --provider is read.
  RUST_LOG                Override log filter

  A .env file in the working directory is loaded first.

SETUP:
  1. Install Tesseract:  apt install tesseract-ocr tesseract-ocr-spa ...
  2. Set API key:        export GEMINI_API_KEY=...
  3. Parse:              invoice2json receipt.jpg
"#;

/// Extract structured data from invoice and receipt images.
#[derive(Parser, Debug)]
#[command(
    name = "invoice2json",
    version,
    about = "Extract structured JSON from invoice and receipt images",
    long_about = "Extract structured JSON from photos or scans of invoices and receipts. \
Images are cleaned with statistics-driven filters, read with Tesseract, and mapped onto a \
fixed document schema by a language model (Google Gemini by default).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PNG/JPEG paths or HTTP/HTTPS URLs.
    #[arg(required_unless_present = "from_text")]
    inputs: Vec<String>,

    /// Write JSON here instead of stdout (a directory when several inputs are given).
    #[arg(short, long, env = "INVOICE2JSON_OUTPUT")]
    output: Option<PathBuf>,

    /// OCR language: eng, spa, fra, deu, ita (or names like "Spanish").
    #[arg(short, long, env = "INVOICE2JSON_LANGUAGE", default_value = "eng",
          value_parser = parse_language)]
    language: Language,

    /// Extraction provider: gemini, openai, anthropic, openrouter, ollama, lmstudio.
    #[arg(long, env = "INVOICE2JSON_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Model ID.
    #[arg(long, env = "INVOICE2JSON_MODEL", default_value = "gemini-2.0-flash")]
    model: String,

    /// API key for the selected provider [default: that provider's *_API_KEY variable].
    #[arg(long)]
    api_key: Option<String>,

    /// Path to the tesseract executable.
    #[arg(long, env = "TESSERACT_PATH", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Save the binarised image handed to OCR (single input only).
    #[arg(long)]
    save_preprocessed: Option<PathBuf>,

    /// Print image statistics and filter parameters only; no OCR, no API call.
    #[arg(long)]
    analyze_only: bool,

    /// Skip the image stages and extract from a text file ("-" for stdin).
    #[arg(long, conflicts_with_all = ["inputs", "analyze_only", "save_preprocessed"])]
    from_text: Option<PathBuf>,

    /// Print the full result (document, OCR text, stats) instead of the document alone.
    #[arg(long, env = "INVOICE2JSON_JSON")]
    json: bool,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "INVOICE2JSON_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Images parsed at once when several inputs are given.
    #[arg(short, long, env = "INVOICE2JSON_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Max tokens the model may generate.
    #[arg(long, env = "INVOICE2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INVOICE2JSON_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Retries after a transient extraction failure (at most 10).
    #[arg(long, env = "INVOICE2JSON_MAX_RETRIES", default_value_t = 1)]
    max_retries: u32,

    /// Extraction call timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOICE2JSON_DOWNLOAD_TIMEOUT", default_value_t = 60)]
    download_timeout: u64,

    /// Disable progress output.
    #[arg(long, env = "INVOICE2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE2JSON_QUIET")]
    quiet: bool,
}

fn parse_language(s: &str) -> std::result::Result<Language, String> {
    s.parse::<Language>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.analyze_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Analyze-only mode ────────────────────────────────────────────────
    if cli.analyze_only {
        let config = build_config(&cli, None).await?;
        for input in &cli.inputs {
            let report = analyze(input, &config)
                .await
                .with_context(|| format!("Failed to analyze {input}"))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialize analysis")?
                );
            } else {
                println!("File:            {}", input);
                println!("Size:            {}x{}", report.width, report.height);
                println!(
                    "Mean / std:      {:.2} / {:.2}",
                    report.stats.mean, report.stats.std
                );
                println!("Variance:        {:.2}", report.stats.variance);
                println!("Contrast:        {:.4}", report.stats.contrast);
                println!("Blur kernel:     {}", report.filter.blur_kernel_size);
                println!(
                    "Bilateral σ:     color {:.1}, space {:.1}",
                    report.filter.bilateral_sigma_color, report.filter.bilateral_sigma_space
                );
                println!(
                    "Threshold:       block {}, C {}",
                    report.filter.threshold_block_size, report.filter.threshold_constant
                );
            }
        }
        return Ok(());
    }

    // ── Text-only mode ───────────────────────────────────────────────────
    if let Some(ref path) = cli.from_text {
        let text = read_text(path).await?;
        let config = build_config(&cli, None).await?;
        let output = parse_text(&text, &config)
            .await
            .context("Extraction failed")?;
        emit(&cli, &output, cli.output.as_deref()).await?;
        return Ok(());
    }

    let total = cli.inputs.len();
    if total > 1 && cli.save_preprocessed.is_some() {
        bail!("--save-preprocessed works with a single input only");
    }

    let progress = show_progress.then(|| CliProgressCallback::new(total));
    let progress_cb: Option<ProgressCallback> = progress
        .clone()
        .map(|cb| cb as Arc<dyn ParseProgressCallback>);
    let config = build_config(&cli, progress_cb).await?;

    // ── Single image ─────────────────────────────────────────────────────
    if total == 1 {
        let result = parse(&cli.inputs[0], &config).await;
        if let Some(ref p) = progress {
            p.finish();
        }
        let output = result.map_err(describe).context("Parsing failed")?;

        if let (Some(path), Some(image)) = (&cli.save_preprocessed, &output.preprocessed) {
            encode::write_png(image, path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("Preprocessed image → {}", bold(&path.display().to_string()));
            }
        }

        emit(&cli, &output, cli.output.as_deref()).await?;
        if !cli.quiet {
            eprintln!(
                "{}  {}  {}ms  {}",
                green("✔"),
                output.document.document_type.as_str(),
                output.stats.total_ms,
                dim(&format!(
                    "(ocr {}ms, extraction {}ms)",
                    output.stats.recognize_ms, output.stats.extract_ms
                )),
            );
        }
        return Ok(());
    }

    // ── Batch ────────────────────────────────────────────────────────────
    let items = parse_batch(&cli.inputs, &config)
        .await
        .map_err(describe)
        .context("Parsing failed")?;
    if let Some(ref p) = progress {
        p.finish();
    }

    let names = output_names(items.iter().map(|item| item.input.as_str()));
    let mut failed = 0usize;
    let mut report = Vec::with_capacity(items.len());
    for (item, name) in items.iter().zip(&names) {
        match &item.result {
            Ok(output) => {
                if let Some(ref dir) = cli.output {
                    let path = dir.join(name);
                    emit(&cli, output, Some(&path)).await?;
                } else if cli.json {
                    report.push(json!({ "input": item.input, "output": output }));
                } else {
                    report.push(json!({ "input": item.input, "document": output.document }));
                }
            }
            Err(e) => {
                failed += 1;
                if cli.output.is_none() {
                    report.push(json!({
                        "input": item.input,
                        "error": { "stage": e.stage(), "message": e.to_string() },
                    }));
                } else if !cli.quiet && !show_progress {
                    eprintln!("{} {}: {}", red("✗"), item.input, e);
                }
            }
        }
    }
    if cli.output.is_none() {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise output")?
        );
    }

    if !cli.quiet {
        eprintln!(
            "{} {}/{} images parsed",
            if failed == 0 { green("✔") } else { red("⚠") },
            bold(&(total - failed).to_string()),
            total
        );
    }
    if failed > 0 {
        bail!("{failed} of {total} images failed");
    }
    Ok(())
}

/// Write the document (or the full output with `--json`) to `path`, or stdout.
async fn emit(cli: &Cli, output: &ParseOutput, path: Option<&Path>) -> Result<()> {
    let json = if cli.json {
        serde_json::to_string_pretty(output).context("Failed to serialise output")?
    } else {
        output
            .document
            .to_json_pretty()
            .context("Failed to serialise document")?
    };

    match path {
        Some(path) if !cli.json => {
            invoice2json::parse::write_document(output, path)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("→ {}", bold(&path.display().to_string()));
            }
        }
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}

/// Add the failing stage to the error so the user knows whether re-running
/// with `--from-text` makes sense.
fn describe(e: InvoiceError) -> anyhow::Error {
    let stage = e.stage();
    anyhow::Error::new(e).context(format!("{stage} stage failed"))
}

async fn read_text(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read text from stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn file_stem(input: &str) -> String {
    let last = input.rsplit('/').next().unwrap_or(input);
    let stem = Path::new(last)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    if stem.is_empty() {
        "document".to_string()
    } else {
        stem.to_string()
    }
}

/// One `<stem>.json` file name per input, suffixed `-2`, `-3`, ... where
/// stems collide (`a/r.jpg` and `b/r.png` both have stem `r`).
fn output_names<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut taken = HashSet::new();
    inputs
        .into_iter()
        .map(|input| {
            let stem = file_stem(input);
            let mut name = format!("{stem}.json");
            let mut n = 2;
            while !taken.insert(name.clone()) {
                name = format!("{stem}-{n}.json");
                n += 1;
            }
            name
        })
        .collect()
}

/// Environment variable holding the key for `provider`.
fn provider_key_env(provider: &str) -> Option<&'static str> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "gemini" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        _ => None,
    }
}

/// `--api-key`, else the selected provider's own variable.
fn resolve_api_key(cli: &Cli) -> Option<String> {
    cli.api_key.clone().or_else(|| {
        provider_key_env(&cli.provider).and_then(|var| std::env::var(var).ok())
    })
}

/// Map CLI args to `ParserConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ParserConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ParserConfig::builder()
        .language(cli.language.clone())
        .tesseract_path(&cli.tesseract)
        .provider_name(&cli.provider)
        .model(&cli.model)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .concurrency(cli.concurrency)
        .keep_preprocessed(cli.save_preprocessed.is_some());

    if let Some(key) = resolve_api_key(cli) {
        builder = builder.credentials(Credentials::new(key));
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
