//! Provider abstraction over the external text-generation service, plus the
//! HTTP implementation and a deterministic local generator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a single provider call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider signalled rate limiting; retryable.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Provider-supplied retry hint, in seconds.
        retry_after_secs: Option<f64>,
        /// Provider message.
        message: String,
    },
    /// Provider returned a non-retryable error status.
    #[error("upstream error (status {status}): {message}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },
    /// Network/transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Provider answered with an unparseable body.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl GenerationError {
    /// Whether the retry policy may attempt this call again.
    #[must_use]
    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// One prompt sent to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    /// System instruction framing the call.
    pub system: String,
    /// User-visible prompt content.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Builds a request with default sampling settings.
    #[must_use]
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            temperature: 0.3,
            max_tokens: 512,
        }
    }
}

/// One provider answer.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Tokens consumed by the call, as reported by the provider.
    pub tokens_used: u64,
}

/// A single-shot text-generation call. Retry lives above this trait.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Performs one provider call.
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GenerationError>;
}

/// HTTP generator speaking the common chat-completions wire shape.
pub struct HttpTextGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    total_tokens: u64,
}

impl HttpTextGenerator {
    /// Creates a generator against the given chat-completions endpoint.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
        });
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<f64>().ok());
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::RateLimited {
                retry_after_secs,
                message,
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        let text = wire
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| GenerationError::Malformed("no choices in response".to_string()))?;
        Ok(Completion {
            text,
            tokens_used: wire.usage.map_or(0, |usage| usage.total_tokens),
        })
    }
}

/// Deterministic offline generator. Pops scripted replies in order and falls
/// back to a fixed line once the script runs out. Used by the binary when no
/// provider is configured, and by tests.
#[derive(Debug, Default)]
pub struct CannedGenerator {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    /// Creates a generator with no scripted replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator that answers with the given replies in order.
    #[must_use]
    pub fn scripted(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of completed calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.replies.lock().pop_front().unwrap_or_else(|| {
            format!("[offline] acknowledged: {}", request.prompt.trim())
        });
        Ok(Completion {
            tokens_used: text.len() as u64 / 4,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn canned_generator_pops_in_order() {
        let generator = CannedGenerator::scripted(["first", "second"]);
        let request = CompletionRequest::new("sys", "prompt");
        assert_eq!(
            generator.complete(request.clone()).await.unwrap().text,
            "first"
        );
        assert_eq!(
            generator.complete(request.clone()).await.unwrap().text,
            "second"
        );
        assert!(generator
            .complete(request)
            .await
            .unwrap()
            .text
            .starts_with("[offline]"));
        assert_eq!(generator.calls(), 3);
    }
}
