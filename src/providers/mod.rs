//! Generative backend abstraction layer.
//!
//! Defines the [`GenerativeBackend`] trait used by the conversation engine
//! for all model calls (answer, follow-up question, risk classification).
//! The contract is deliberately narrow: prompt in, text out.
//!
//! One backend is implemented: [`gemini::GeminiBackend`] — the Gemini
//! `generateContent` REST API.

use async_trait::async_trait;
use regex::Regex;

pub mod gemini;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by generative backends.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure (includes request timeout).
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("backend response parse error: {0}")]
    Parse(String),
    /// Upstream backend responded with an error status.
    #[error("backend returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// Backend returned an empty completion.
    #[error("backend returned an empty completion")]
    EmptyCompletion,
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    // API keys must never reach the logs, even via upstream error echoes.
    let mut sanitized = collapsed;
    for pattern in [r"AIza[A-Za-z0-9_\-]{30,}", r"key=[A-Za-z0-9_\-]{20,}"] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core generative backend interface.
///
/// All implementations must be `Send + Sync` to allow use across async task
/// boundaries in the request handlers.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Generate a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure, and
    /// [`ProviderError::EmptyCompletion`] when the model produced no text.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// The model identifier string this backend is instantiated for.
    fn model_id(&self) -> &str;
}
