//! Google Gemini backend (uses the `generateContent` REST API).

use super::{ImagePayload, InferenceBackend, InferenceError};
use crate::config::InferenceConfig;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    api_url: String,
}

impl GeminiBackend {
    /// Build a client whose every request is bounded by the configured timeout.
    pub fn new(config: &InferenceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_url, model)
    }
}

// ── Gemini API request/response types ───────────────────────────────────────

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(prompt: &'a str, image: &'a ImagePayload) -> Self {
        Self {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![
                    RequestPart::Text { text: prompt },
                    RequestPart::InlineData {
                        inline_data: InlineData {
                            mime_type: image.mime_type,
                            data: BASE64.encode(&image.data),
                        },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl ApiError {
    /// Gemini reports a bad key as 400 INVALID_ARGUMENT with reason API_KEY_INVALID.
    fn is_bad_api_key(&self) -> bool {
        self.details
            .iter()
            .any(|d| matches!(d.reason.as_str(), "API_KEY_INVALID" | "API_KEY_EXPIRED"))
            || (self.details.is_empty() && self.message.to_lowercase().contains("api key"))
    }
}

// ── Backend implementation ──────────────────────────────────────────────────

#[async_trait::async_trait]
impl InferenceBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        image: &ImagePayload,
    ) -> Result<String, InferenceError> {
        let body = GenerateContentRequest::new(prompt, image);

        debug!(
            "Sending request to Gemini: model={} image={} ({} bytes)",
            model,
            image.mime_type,
            image.data.len()
        );

        let resp = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status();
        let raw = resp.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(classify_status(status, &raw));
        }

        parse_response(&raw)
    }
}

/// Timeouts count as capacity problems so they rotate like a 429.
fn classify_transport_error(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() {
        InferenceError::RateLimited(format!("request timed out: {}", e))
    } else {
        InferenceError::Other(e.to_string())
    }
}

/// Map an unsuccessful HTTP response onto the error taxonomy.
///
/// Rotates on: 429 / RESOURCE_EXHAUSTED, 503 / UNAVAILABLE, 504.
/// Fails fast on: rejected API key or 401 / 403 (Auth), 400 family (InvalidInput),
/// anything else (Other).
fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let (api_status, message, bad_key) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => {
            let bad_key = env.error.is_bad_api_key();
            (env.error.status, env.error.message, bad_key)
        }
        Err(_) => (String::new(), body.chars().take(300).collect(), false),
    };
    let detail = format!("{} {}: {}", status.as_u16(), api_status, message);

    if bad_key {
        return InferenceError::Auth(detail);
    }

    match (status, api_status.as_str()) {
        (StatusCode::TOO_MANY_REQUESTS, _) | (_, "RESOURCE_EXHAUSTED") => {
            InferenceError::RateLimited(detail)
        }
        (StatusCode::SERVICE_UNAVAILABLE, _)
        | (StatusCode::GATEWAY_TIMEOUT, _)
        | (_, "UNAVAILABLE")
        | (_, "DEADLINE_EXCEEDED") => InferenceError::RateLimited(detail),
        (StatusCode::UNAUTHORIZED, _)
        | (StatusCode::FORBIDDEN, _)
        | (_, "PERMISSION_DENIED")
        | (_, "UNAUTHENTICATED") => InferenceError::Auth(detail),
        (StatusCode::BAD_REQUEST, _)
        | (_, "INVALID_ARGUMENT")
        | (_, "FAILED_PRECONDITION") => InferenceError::InvalidInput(detail),
        _ => InferenceError::Other(detail),
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_response(raw: &str) -> Result<String, InferenceError> {
    let resp: GenerateContentResponse = serde_json::from_str(raw).map_err(|e| {
        InferenceError::Other(format!("Failed to parse Gemini response: {}", e))
    })?;

    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(InferenceError::InvalidInput(format!("prompt blocked: {}", reason)));
    }

    if let Some(usage) = &resp.usage_metadata {
        debug!(
            "Gemini usage: prompt={} completion={}",
            usage.prompt_token_count, usage.candidates_token_count
        );
    }

    let Some(candidate) = resp.candidates.into_iter().next() else {
        return Ok(String::new());
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    match candidate.finish_reason.as_deref() {
        Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT"))
            if text.trim().is_empty() =>
        {
            Err(InferenceError::InvalidInput(format!("response blocked: {}", reason)))
        }
        _ => Ok(text.trim().to_string()),
    }
}
