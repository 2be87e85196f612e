//! Google Gemini backend for [`StructuredExtractor`].
//!
//! Calls the Generative Language REST API directly so the document schema can
//! travel as `generationConfig.responseSchema` with
//! `responseMimeType: application/json`. The model is then constrained to
//! emit an object of the right shape, and the reply is still validated
//! locally afterwards.
//!
//! The key is sent in the `x-goog-api-key` header, never in the URL, so it
//! does not end up in proxy or error logs.

use crate::config::Credentials;
use crate::error::ExtractionError;
use crate::pipeline::extract::{ExtractionRequest, StructuredExtractor};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Production endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER: &str = "gemini";

/// Gemini extraction over HTTPS.
pub struct GeminiExtractor {
    client: reqwest::Client,
    credentials: Credentials,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GeminiRequest<'a> {
    #[serde(rename = "systemInstruction")]
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig<'a> {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'a str,
    #[serde(rename = "responseSchema")]
    response_schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

impl GeminiExtractor {
    /// Create an extractor against the production endpoint.
    ///
    /// A blank key is rejected here rather than at the first call.
    pub fn new(credentials: Credentials) -> Result<Self, ExtractionError> {
        if credentials.is_blank() {
            return Err(ExtractionError::AuthFailed {
                provider: PROVIDER.to_string(),
                detail: "API key is empty".to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("invoice2json/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractionError::Unreachable {
                provider: PROVIDER.to_string(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            client,
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at a different endpoint (proxy, regional gateway, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl StructuredExtractor for GeminiExtractor {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn complete(&self, request: &ExtractionRequest) -> Result<String, ExtractionError> {
        let body = build_request(request);
        let url = self.endpoint(&request.model);
        debug!("POST {} ({} chars of text)", url, request.instruction.len());

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.credentials.api_key())
            .json(&body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(map_send_error)?;

        if !status.is_success() {
            return Err(classify_status(status, retry_after, &text));
        }

        let parsed: GeminiResponse =
            serde_json::from_str(&text).map_err(|e| ExtractionError::Api {
                provider: PROVIDER.to_string(),
                status: Some(status.as_u16()),
                message: format!("Failed to parse response: {e}"),
            })?;
        reply_text(parsed)
    }
}

fn build_request(request: &ExtractionRequest) -> GeminiRequest<'_> {
    GeminiRequest {
        system_instruction: GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: &request.system_prompt,
            }],
        },
        contents: vec![GeminiContent {
            role: Some("user"),
            parts: vec![GeminiPart {
                text: &request.instruction,
            }],
        }],
        generation_config: GeminiGenerationConfig {
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            response_mime_type: "application/json",
            response_schema: request.schema,
        },
    }
}

fn map_send_error(e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::Timeout {
            provider: PROVIDER.to_string(),
            secs: 0,
        }
    } else if e.is_connect() || e.is_request() {
        ExtractionError::Unreachable {
            provider: PROVIDER.to_string(),
            detail: e.to_string(),
        }
    } else {
        ExtractionError::Api {
            provider: PROVIDER.to_string(),
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Map a non-success HTTP answer to an error.
fn classify_status(status: StatusCode, retry_after: Option<u64>, body: &str) -> ExtractionError {
    let message = serde_json::from_str::<GeminiResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
        .unwrap_or_else(|| body.trim().chars().take(500).collect());

    let invalid_key = status == StatusCode::BAD_REQUEST && message.contains("API key not valid");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExtractionError::AuthFailed {
            provider: PROVIDER.to_string(),
            detail: message,
        },
        _ if invalid_key => ExtractionError::AuthFailed {
            provider: PROVIDER.to_string(),
            detail: message,
        },
        StatusCode::TOO_MANY_REQUESTS => ExtractionError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after_secs: retry_after,
        },
        _ => ExtractionError::Api {
            provider: PROVIDER.to_string(),
            status: Some(status.as_u16()),
            message,
        },
    }
}

fn reply_text(response: GeminiResponse) -> Result<String, ExtractionError> {
    if let Some(error) = response.error {
        return Err(ExtractionError::Api {
            provider: PROVIDER.to_string(),
            status: None,
            message: error.message,
        });
    }

    let candidate = response
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ExtractionError::EmptyResponse {
            provider: PROVIDER.to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        if let Some(reason) = candidate.finish_reason.filter(|r| r != "STOP") {
            return Err(ExtractionError::Api {
                provider: PROVIDER.to_string(),
                status: None,
                message: format!("generation stopped: {reason}"),
            });
        }
        return Err(ExtractionError::EmptyResponse {
            provider: PROVIDER.to_string(),
        });
    }
    Ok(text)
}
