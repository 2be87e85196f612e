//! Configuration types for invoice/receipt parsing.
//!
//! All behaviour is controlled through [`ParserConfig`], built via its
//! [`ParserConfigBuilder`]. The OCR language and the extraction credentials
//! are explicit fields: the library never reads them from process-wide
//! state, so two parsers with different keys or languages can run side by
//! side in one process.

use crate::error::InvoiceError;
use crate::pipeline::extract::StructuredExtractor;
use crate::pipeline::ocr::TextRecognizer;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Provider used when none is named.
pub const DEFAULT_PROVIDER: &str = "gemini";
/// Model used when none is named.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
/// Upper bound on extraction retries accepted by [`ParserConfigBuilder::build`].
pub const MAX_RETRIES: u32 = 10;

/// Configuration for parsing an invoice or receipt image.
///
/// # Example
/// ```rust
/// use invoice2json::{Credentials, Language, ParserConfig};
///
/// let config = ParserConfig::builder()
///     .language(Language::French)
///     .credentials(Credentials::new("my-api-key"))
///     .build()
///     .unwrap();
/// assert_eq!(config.language.code(), "fra");
/// ```
#[derive(Clone)]
pub struct ParserConfig {
    /// OCR language. Default: English (`eng`).
    ///
    /// Omitting a language is not an error; it means English.
    pub language: Language,

    /// Path to the `tesseract` executable. Default: `tesseract` on `PATH`.
    pub tesseract_path: PathBuf,

    /// Pre-constructed OCR engine. Takes precedence over `tesseract_path`.
    pub recognizer: Option<Arc<dyn TextRecognizer>>,

    /// Extraction provider name. Default: `gemini`.
    ///
    /// `gemini` talks to the Generative Language REST API with a native
    /// response schema and needs [`ParserConfig::credentials`]. Any other
    /// supported name (`openai`, `anthropic`, `openrouter`, `ollama`,
    /// `lmstudio`) is an `edgequake-llm` provider built from the same
    /// credentials; the local ones need none.
    pub provider_name: String,

    /// Model identifier. Default: `gemini-2.0-flash`.
    pub model: String,

    /// API credential for the extraction provider.
    pub credentials: Option<Credentials>,

    /// Pre-constructed extraction backend. Takes precedence over
    /// `provider_name`.
    pub extractor: Option<Arc<dyn StructuredExtractor>>,

    /// Sampling temperature. Default: 0.0 (transcription, not creativity).
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 4096.
    pub max_tokens: usize,

    /// Per-call timeout for the extraction request, in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Retries after a transient extraction failure. Default: 1.
    ///
    /// Authentication and schema failures are never retried.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Download timeout for URL inputs, in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Images processed at once by [`crate::parse::parse_batch`]. Default: 4.
    pub concurrency: usize,

    /// Custom system prompt. If None, uses the built-in default.
    pub system_prompt: Option<String>,

    /// Keep the binarised image in [`crate::output::ParseOutput::preprocessed`].
    /// Default: false.
    pub keep_preprocessed: bool,

    /// Stage-level progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            language: Language::default(),
            tesseract_path: PathBuf::from("tesseract"),
            recognizer: None,
            provider_name: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            credentials: None,
            extractor: None,
            temperature: 0.0,
            max_tokens: 4096,
            api_timeout_secs: 30,
            max_retries: 1,
            retry_backoff_ms: 500,
            download_timeout_secs: 60,
            concurrency: 4,
            system_prompt: None,
            keep_preprocessed: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserConfig")
            .field("language", &self.language)
            .field("tesseract_path", &self.tesseract_path)
            .field("recognizer", &self.recognizer.as_ref().map(|r| r.name().to_string()))
            .field("provider_name", &self.provider_name)
            .field("model", &self.model)
            .field("credentials", &self.credentials)
            .field("extractor", &self.extractor.as_ref().map(|e| e.name().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl ParserConfig {
    /// Create a new builder for `ParserConfig`.
    pub fn builder() -> ParserConfigBuilder {
        ParserConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ParserConfig`].
#[derive(Debug)]
pub struct ParserConfigBuilder {
    config: ParserConfig,
}

impl ParserConfigBuilder {
    pub fn language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.config.recognizer = Some(recognizer);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn StructuredExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn keep_preprocessed(mut self, keep: bool) -> Self {
        self.config.keep_preprocessed = keep;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ParserConfig, InvoiceError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "API timeout must be at least 1 second".into(),
            ));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(InvoiceError::InvalidConfig(format!(
                "max_retries must be at most {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.provider_name.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "Provider name must not be empty".into(),
            ));
        }
        if c.model.trim().is_empty() {
            return Err(InvoiceError::InvalidConfig("Model must not be empty".into()));
        }
        if let Language::Other(code) = &c.language {
            if code.trim().is_empty() {
                return Err(InvoiceError::InvalidConfig(
                    "Language code must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Credentials ──────────────────────────────────────────────────────────

/// API credential for the extraction provider. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    api_key: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Whether the key is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.api_key.trim().is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

// ── Language ─────────────────────────────────────────────────────────────

/// OCR language.
///
/// The five named languages are the ones offered to end users; `Other`
/// passes any engine code through untouched (e.g. `eng+spa`). An unknown
/// code is the engine's to reject, and its error is surfaced unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Language {
    #[default]
    English,
    Spanish,
    French,
    German,
    Italian,
    Other(String),
}

impl Language {
    /// Engine language code.
    pub fn code(&self) -> &str {
        match self {
            Language::English => "eng",
            Language::Spanish => "spa",
            Language::French => "fra",
            Language::German => "deu",
            Language::Italian => "ita",
            Language::Other(code) => code,
        }
    }

    /// The named languages, in display order.
    pub fn known() -> [Language; 5] {
        [
            Language::English,
            Language::Spanish,
            Language::French,
            Language::German,
            Language::Italian,
        ]
    }

    /// Human-readable name; the raw code for `Other`.
    pub fn display_name(&self) -> &str {
        match self {
            Language::English => "English",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Italian => "Italian",
            Language::Other(code) => code,
        }
    }
}

impl FromStr for Language {
    type Err = InvoiceError;

    /// Accepts an engine code (`deu`) or a display name (`German`), in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_lowercase();
        if key.is_empty() {
            return Err(InvoiceError::InvalidConfig(
                "Language code must not be empty".into(),
            ));
        }
        let known = Language::known()
            .into_iter()
            .find(|l| l.code() == key || l.display_name().to_lowercase() == key);
        Ok(known.unwrap_or(Language::Other(key)))
    }
}

impl From<String> for Language {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Language::Other(s))
    }
}

impl From<Language> for String {
    fn from(l: Language) -> Self {
        l.code().to_string()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
