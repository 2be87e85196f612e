//! Structured extraction: recognised text → validated [`Document`].
//!
//! Backends implement [`StructuredExtractor`] and only move bytes: they
//! send an [`ExtractionRequest`] and hand back the model's raw reply.
//! Everything provider-independent lives in [`extract`]: the per-call
//! timeout, retries, reply cleanup and schema validation.
//!
//! ## Retry Strategy
//!
//! Only transient failures ([`ExtractionError::is_transient`]) are retried,
//! with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`, capped at
//! [`MAX_BACKOFF_MS`]). A reply that
//! fails validation is final: asking again with the same text rarely fixes
//! a schema mismatch and doubles the cost.

use crate::config::ParserConfig;
use crate::error::ExtractionError;
use crate::pipeline::postprocess::clean_json_response;
use crate::prompts::{instruction, DEFAULT_SYSTEM_PROMPT};
use crate::schema::{document_schema, Document};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Upper bound on a single back-off sleep.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// One extraction call, provider-independent.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub model: String,
    pub system_prompt: String,
    /// User turn: the instruction frame around the recognised text.
    pub instruction: String,
    /// JSON schema the reply must satisfy.
    pub schema: &'static Value,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Per-call limit the driver enforces, for backends that report their own.
    pub timeout_secs: u64,
}

impl ExtractionRequest {
    /// Build the request for `text` from the parser configuration.
    pub fn new(text: &str, config: &ParserConfig) -> Self {
        Self {
            model: config.model.clone(),
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            instruction: instruction(text),
            schema: document_schema(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.api_timeout_secs,
        }
    }
}

/// A schema-constrained language-model backend.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    /// Provider name used in errors and logs.
    fn name(&self) -> &str;

    /// Send one request and return the raw reply text.
    async fn complete(&self, request: &ExtractionRequest) -> Result<String, ExtractionError>;
}

/// Result of a successful [`extract`].
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub document: Document,
    /// Calls made, including the successful one.
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Map `text` to a validated [`Document`].
///
/// Blank text is not rejected here: the model classifies it like any other
/// input and whatever it returns is validated as usual.
pub async fn extract(
    extractor: &dyn StructuredExtractor,
    text: &str,
    config: &ParserConfig,
) -> Result<ExtractionOutcome, ExtractionError> {
    let start = Instant::now();
    let request = ExtractionRequest::new(text, config);
    let per_call = Duration::from_secs(config.api_timeout_secs);

    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let backoff = backoff_delay(config.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                extractor.name(),
                attempt,
                config.max_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        attempt += 1;

        let reply = match timeout(per_call, extractor.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionError::Timeout {
                provider: extractor.name().to_string(),
                secs: config.api_timeout_secs,
            }),
        };

        match reply.and_then(|raw| parse_reply(extractor.name(), &raw)) {
            Ok(document) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(
                    "{}: extracted {} in {}ms ({} attempt(s))",
                    extractor.name(),
                    document.document_type.as_str(),
                    duration_ms,
                    attempt
                );
                return Ok(ExtractionOutcome {
                    document,
                    attempts: attempt,
                    duration_ms,
                });
            }
            Err(e) if e.is_transient() && attempt <= config.max_retries => {
                warn!("{}: attempt {} failed: {}", extractor.name(), attempt, e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sleep before retry number `retry` (1-based), saturating at
/// [`MAX_BACKOFF_MS`].
pub fn backoff_delay(base_ms: u64, retry: u32) -> u64 {
    2u64.checked_pow(retry.saturating_sub(1))
        .and_then(|factor| base_ms.checked_mul(factor))
        .map_or(MAX_BACKOFF_MS, |ms| ms.min(MAX_BACKOFF_MS))
}

/// Clean and validate one raw reply.
pub fn parse_reply(provider: &str, raw: &str) -> Result<Document, ExtractionError> {
    if raw.trim().is_empty() {
        return Err(ExtractionError::EmptyResponse {
            provider: provider.to_string(),
        });
    }
    let cleaned = clean_json_response(raw);
    Document::from_json(&cleaned)
}
