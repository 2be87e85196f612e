//! Generic LLM backend for [`StructuredExtractor`] via `edgequake-llm`.
//!
//! Used for every provider other than `gemini` (OpenAI, Anthropic, Ollama,
//! ...). These APIs are driven through the plain chat interface, so the
//! schema is embedded in the system prompt and the reply is validated
//! locally like any other.
//!
//! Providers are built from the configured [`Credentials`] only. Hosted
//! providers without credentials are rejected up front instead of falling
//! back to environment variables.

use crate::config::Credentials;
use crate::error::{ExtractionError, InvoiceError};
use crate::pipeline::extract::{ExtractionRequest, StructuredExtractor};
use crate::prompts::system_prompt_with_schema;
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, LLMProvider, LMStudioProvider,
    LlmError, OllamaProvider, OpenAIProvider, OpenRouterProvider,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Providers served through this backend, besides `gemini`.
pub const SUPPORTED_PROVIDERS: &[&str] = &["openai", "anthropic", "openrouter", "ollama", "lmstudio"];

/// Build the chat provider `name` for `model`.
///
/// Hosted providers take their key from `credentials`; local ones
/// (`ollama`, `lmstudio`) need none and talk to their default localhost
/// endpoint.
pub fn create_provider(
    name: &str,
    model: &str,
    credentials: Option<&Credentials>,
) -> Result<Arc<dyn LLMProvider>, InvoiceError> {
    let key = || {
        credentials
            .filter(|c| !c.is_blank())
            .map(|c| c.api_key().to_string())
            .ok_or_else(|| InvoiceError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("Set credentials for '{name}' (e.g. --api-key)."),
            })
    };
    let local_build_failed = |e: LlmError| {
        InvoiceError::InvalidConfig(format!("Failed to initialise provider '{name}': {e}"))
    };

    let provider: Arc<dyn LLMProvider> = match name {
        "openai" => Arc::new(OpenAIProvider::new(key()?).with_model(model)),
        "anthropic" => Arc::new(AnthropicProvider::new(key()?).with_model(model)),
        "openrouter" => Arc::new(OpenRouterProvider::new(key()?).with_model(model)),
        "ollama" | "lmstudio" => {
            if credentials.is_some() {
                warn!("{name}: local provider ignores the configured credentials");
            }
            if name == "ollama" {
                Arc::new(
                    OllamaProvider::builder()
                        .model(model)
                        .build()
                        .map_err(local_build_failed)?,
                )
            } else {
                Arc::new(
                    LMStudioProvider::builder()
                        .model(model)
                        .build()
                        .map_err(local_build_failed)?,
                )
            }
        }
        other => {
            return Err(InvoiceError::ProviderNotConfigured {
                provider: other.to_string(),
                hint: format!(
                    "Unsupported provider. Use gemini or one of: {}.",
                    SUPPORTED_PROVIDERS.join(", ")
                ),
            })
        }
    };
    Ok(provider)
}

/// Any `edgequake-llm` chat provider.
pub struct LlmProviderExtractor {
    provider: Arc<dyn LLMProvider>,
    name: String,
}

impl LlmProviderExtractor {
    pub fn new(provider: Arc<dyn LLMProvider>, name: impl Into<String>) -> Self {
        Self {
            provider,
            name: name.into(),
        }
    }
}

#[async_trait]
impl StructuredExtractor for LlmProviderExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &ExtractionRequest) -> Result<String, ExtractionError> {
        let messages = vec![
            ChatMessage::system(system_prompt_with_schema(&request.system_prompt)),
            ChatMessage::user(request.instruction.as_str()),
        ];
        let options = build_options(request);

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify(&self.name, e, request.timeout_secs))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.name, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Build `CompletionOptions` from the request.
fn build_options(request: &ExtractionRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        ..Default::default()
    }
}

/// Map an `edgequake-llm` error to an [`ExtractionError`].
fn classify(provider: &str, err: LlmError, timeout_secs: u64) -> ExtractionError {
    let provider = provider.to_string();
    match err {
        LlmError::AuthError(detail) => ExtractionError::AuthFailed { provider, detail },
        LlmError::RateLimited(_) => ExtractionError::RateLimited {
            provider,
            retry_after_secs: None,
        },
        LlmError::Timeout => ExtractionError::Timeout {
            provider,
            secs: timeout_secs,
        },
        LlmError::NetworkError(detail) => ExtractionError::Unreachable { provider, detail },
        e @ (LlmError::InvalidRequest(_)
        | LlmError::ModelNotFound(_)
        | LlmError::TokenLimitExceeded { .. }
        | LlmError::ConfigError(_)
        | LlmError::NotSupported(_)
        | LlmError::SerializationError(_)) => ExtractionError::Api {
            provider,
            status: None,
            message: e.to_string(),
        },
        other => classify_message(&provider, &other.to_string(), timeout_secs),
    }
}

/// HTTP status code quoted in an error message ("status 401", "HTTP 503",
/// "error 429:"). Bare digits elsewhere in the text do not count.
static RE_STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:status(?:\s+code)?|http(?:/\d(?:\.\d)?)?|error|code)\b[\s:=(]{0,3}([45]\d{2})\b")
        .unwrap()
});

/// Classify the free-text errors (`ApiError`, `ProviderError`, `Unknown`)
/// by their quoted status code, then by well-known phrases.
fn classify_message(provider: &str, message: &str, timeout_secs: u64) -> ExtractionError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
    let status = RE_STATUS
        .captures(message)
        .and_then(|c| c[1].parse::<u16>().ok());
    let provider = provider.to_string();
    let detail = message.to_string();

    match status {
        Some(401 | 403) => ExtractionError::AuthFailed { provider, detail },
        Some(429) => ExtractionError::RateLimited {
            provider,
            retry_after_secs: None,
        },
        Some(408 | 504) => ExtractionError::Timeout {
            provider,
            secs: timeout_secs,
        },
        Some(code) => ExtractionError::Api {
            provider,
            status: Some(code),
            message: detail,
        },
        None if has(&[
            "unauthorized",
            "invalid api key",
            "incorrect api key",
            "api key not valid",
            "authentication failed",
        ]) =>
        {
            ExtractionError::AuthFailed { provider, detail }
        }
        None if has(&["rate limit", "too many requests"]) => ExtractionError::RateLimited {
            provider,
            retry_after_secs: None,
        },
        None if has(&["timed out"]) => ExtractionError::Timeout {
            provider,
            secs: timeout_secs,
        },
        None if has(&[
            "connection refused",
            "connection reset",
            "error sending request",
            "dns error",
        ]) =>
        {
            ExtractionError::Unreachable { provider, detail }
        }
        None => ExtractionError::Api {
            provider,
            status: None,
            message: detail,
        },
    }
}
