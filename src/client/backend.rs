//! Text-generation backends.
//!
//! [`TextBackend`] is the seam between [`ModelClient`](super::ModelClient) and the
//! network. [`GeminiBackend`] talks to the Gemini `generateContent` REST endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::ModelError;
use super::types::ModelId;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum accepted response body (2MB).
const MAX_RESPONSE_LEN: usize = 2 * 1_024 * 1_024;

// =============================================================================
// TRAIT
// =============================================================================

/// One fully-resolved call to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCall {
    pub model: ModelId,
    pub prompt: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    pub top_k: u32,
    pub stop_sequences: Vec<String>,
}

/// A text-generation backend. Returns the raw response text.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, call: &BackendCall) -> Result<String, ModelError>;

    /// Short label used in logs.
    fn name(&self) -> &str {
        "backend"
    }
}

// =============================================================================
// GEMINI ADAPTER
// =============================================================================

#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ModelError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(300))
    }

    /// Create from `GEMINI_API_KEY` (and optional `GEMINI_BASE_URL`).
    pub fn from_env() -> Result<Self, ModelError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ModelError::Config("GEMINI_API_KEY not set".into()))?;
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_config(api_key, base_url, Duration::from_secs(300))
    }

    /// `timeout` is a transport ceiling; per-attempt timeouts are enforced by the client.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key_value = HeaderValue::from_str(&api_key)
            .map_err(|_| ModelError::Config("Invalid API key format".into()))?;
        headers.insert("x-goog-api-key", key_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ModelError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn generate_url(&self, model: ModelId) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model.as_str())
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    max_output_tokens: u32,
    top_p: f32,
    top_k: u32,
    #[serde(skip_serializing_if = "no_stops")]
    stop_sequences: &'a [String],
}

fn no_stops(stops: &&[String]) -> bool {
    stops.is_empty()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[async_trait]
impl TextBackend for GeminiBackend {
    async fn generate(&self, call: &BackendCall) -> Result<String, ModelError> {
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: &call.prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: call.temperature,
                max_output_tokens: call.max_output_tokens,
                top_p: call.top_p,
                top_k: call.top_k,
                stop_sequences: &call.stop_sequences,
            },
        };

        let mut response = self
            .client
            .post(self.generate_url(call.model))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > MAX_RESPONSE_LEN {
                return Err(ModelError::backend(
                    format!("Response too large: over {MAX_RESPONSE_LEN} bytes"),
                    false,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            let message = serde_json::from_str::<GenerateContentResponse>(&text)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ModelError::backend_with_status(message, status.as_u16()));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| ModelError::backend(format!("Invalid JSON: {e}"), false))?;

        if let Some(message) = parsed.error.and_then(|e| e.message) {
            return Err(ModelError::backend(message, false));
        }

        let candidate = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| ModelError::backend("No candidates in response", true))?;

        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if content.trim().is_empty() {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(ModelError::backend(
                format!("Empty response (finish reason: {reason})"),
                reason != "SAFETY",
            ));
        }

        Ok(content)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let stops = vec!["END".to_string()];
        let body = GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: "hello" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 100,
                top_p: 0.95,
                top_k: 40,
                stop_sequences: &stops,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
        assert_eq!(json["generationConfig"]["topK"], 40);
        assert_eq!(json["generationConfig"]["stopSequences"][0], "END");
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let backend =
            GeminiBackend::with_config("key", "http://localhost:9/v1/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            backend.generate_url(ModelId::Flash),
            "http://localhost:9/v1/models/gemini-2.5-flash:generateContent"
        );
    }
}
