//! Gemini backend implementation using the `generateContent` REST API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{check_http_response, GenerativeBackend, ProviderError};

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Gemini `generateContent` request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GeminiRequest {
    /// Prompt contents.
    pub contents: Vec<GeminiContent>,
}

/// A content block in Gemini format.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    /// Text parts of the block.
    pub parts: Vec<GeminiPart>,
}

/// A single text part.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    /// Part text.
    pub text: String,
}

/// Gemini `generateContent` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    /// Response candidates.
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

/// A response candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GeminiCandidate {
    /// Candidate content.
    pub content: Option<GeminiContent>,
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a Gemini API request from a plain prompt.
#[doc(hidden)]
pub fn build_request(prompt: &str) -> GeminiRequest {
    GeminiRequest {
        contents: vec![GeminiContent {
            parts: vec![GeminiPart {
                text: prompt.to_owned(),
            }],
        }],
    }
}

/// Parse a Gemini API response into completion text.
///
/// Joins the text parts of the first candidate. Whitespace-only completions
/// are reported as [`ProviderError::EmptyCompletion`] so callers can fall
/// back to the fixed apology reply.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the body cannot be deserialized and
/// `ProviderError::EmptyCompletion` if no candidate produced text.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<String, ProviderError> {
    let resp: GeminiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let text = resp
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::EmptyCompletion);
    }
    Ok(trimmed.to_owned())
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Gemini `generateContent` API backend.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Create a new Gemini backend instance.
    ///
    /// `timeout` bounds each generation round trip; expiry surfaces as
    /// [`ProviderError::Request`] and follows the same degraded path as any
    /// other transport failure.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            model: model.to_owned(),
            api_key: api_key.to_owned(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait::async_trait]
impl GenerativeBackend for GeminiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_request = build_request(prompt);

        let response = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await?;

        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
