//! Generative-AI provider boundary
//!
//! The engine never talks to a provider directly. It goes through:
//!
//! - [`ContentProvider`]: the transport seam (one credential, one request, one
//!   raw answer). [`GeminiProvider`] is the HTTP implementation;
//!   [`ScriptedProvider`] answers from a script for tests.
//! - [`ProviderAdapter`]: wraps exactly one call with a timeout, parses the
//!   answer into the expected shape and classifies every failure into a
//!   [`FailureClass`].
//!
//! Classification of transport failures happens in one place,
//! [`ProviderError::classify`], so the rest of the engine only ever sees the
//! typed taxonomy.

mod gemini;
mod scripted;

pub use gemini::GeminiProvider;
pub use scripted::{RecordedCall, ScriptedProvider};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::types::Stage;

/// Failure class of a single provider call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Quota or rate limit; another credential may succeed
    Quota,
    /// Credential rejected; another credential may succeed
    InvalidCredential,
    /// Answer did not parse into the expected shape; switching credentials cannot help
    MalformedOutput,
    /// Anything else, including timeouts
    Unknown,
}

/// Classified failure of one provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Quota exhausted or rate limited
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// Credential missing, malformed or revoked
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Content did not match the requested shape
    #[error("malformed output: {0}")]
    MalformedOutput(String),

    /// Unclassified failure
    #[error("{0}")]
    Unknown(String),
}

impl ProviderError {
    /// Failure class of this error
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::Quota(_) => FailureClass::Quota,
            ProviderError::InvalidCredential(_) => FailureClass::InvalidCredential,
            ProviderError::MalformedOutput(_) => FailureClass::MalformedOutput,
            ProviderError::Unknown(_) => FailureClass::Unknown,
        }
    }

    /// Underlying message without the class prefix
    pub fn message(&self) -> &str {
        match self {
            ProviderError::Quota(m)
            | ProviderError::InvalidCredential(m)
            | ProviderError::MalformedOutput(m)
            | ProviderError::Unknown(m) => m,
        }
    }

    /// Classify a non-success provider response.
    ///
    /// `status` is the HTTP status when one was received; `body` is the raw
    /// error payload. Rules:
    /// - 429, `RESOURCE_EXHAUSTED`, "quota" or "rate limit" → [`ProviderError::Quota`]
    /// - 401, 403, `API_KEY_INVALID`, `PERMISSION_DENIED` or a 400 whose body
    ///   mentions an invalid API key → [`ProviderError::InvalidCredential`]
    /// - everything else → [`ProviderError::Unknown`]
    pub fn classify(status: Option<u16>, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        let message = match status {
            Some(code) => format!("status {code}: {}", truncate(body, 300)),
            None => truncate(body, 300).to_string(),
        };

        if status == Some(429)
            || lower.contains("resource_exhausted")
            || lower.contains("quota")
            || lower.contains("rate limit")
        {
            return ProviderError::Quota(message);
        }

        let mentions_key = lower.contains("api_key_invalid")
            || lower.contains("api key not valid")
            || lower.contains("invalid api key")
            || lower.contains("api key expired");
        if matches!(status, Some(401) | Some(403))
            || lower.contains("permission_denied")
            || (status == Some(400) && mentions_key)
            || (status.is_none() && mentions_key)
        {
            return ProviderError::InvalidCredential(message);
        }

        ProviderError::Unknown(message)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// One structured request to the provider
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    /// Stage the request belongs to (for logging and error context)
    pub stage: Stage,
    /// Prompt text
    pub prompt: String,
    /// JSON schema of the expected answer; `None` requests plain text
    pub response_schema: Option<serde_json::Value>,
}

/// One text-to-speech request
#[derive(Clone, Debug, PartialEq)]
pub struct SpeechRequest {
    /// Script to read
    pub script: String,
}

/// Synthesized audio as returned by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClip {
    /// MIME type reported by the provider
    pub mime_type: String,
    /// Base64-encoded audio bytes
    pub data: String,
}

/// Transport seam to a generative-AI provider
///
/// Implementations perform exactly one outbound call per method invocation
/// and report failures through [`ProviderError`], classifying them with
/// [`ProviderError::classify`] where a status/body is available.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Generate text (plain or JSON, per `request.response_schema`)
    async fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError>;

    /// Synthesize speech for a script
    async fn synthesize(
        &self,
        credential: &str,
        request: &SpeechRequest,
    ) -> Result<AudioClip, ProviderError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Wraps single provider calls with a timeout and typed parsing
#[derive(Clone)]
pub struct ProviderAdapter {
    provider: Arc<dyn ContentProvider>,
    timeout: Duration,
}

impl ProviderAdapter {
    /// Create an adapter with a per-call timeout
    pub fn new(provider: Arc<dyn ContentProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Perform one call and parse the answer as JSON into `T`
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<T, ProviderError> {
        let raw = self.call_text(credential, request).await?;
        parse_structured(&raw)
    }

    /// Perform one call and return the raw text answer
    pub async fn call_text(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        match tokio::time::timeout(self.timeout, self.provider.generate(credential, request)).await
        {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(request.stage)),
        }
    }

    /// Perform one text-to-speech call
    pub async fn call_speech(
        &self,
        credential: &str,
        request: &SpeechRequest,
    ) -> Result<AudioClip, ProviderError> {
        match tokio::time::timeout(self.timeout, self.provider.synthesize(credential, request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(self.timed_out(Stage::Audio)),
        }
    }

    /// Name of the wrapped provider
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    fn timed_out(&self, stage: Stage) -> ProviderError {
        tracing::warn!(
            provider = self.provider.name(),
            %stage,
            timeout_ms = self.timeout.as_millis() as u64,
            "Provider call timed out"
        );
        ProviderError::Unknown(format!(
            "{stage} call timed out after {}s",
            self.timeout.as_secs_f64()
        ))
    }
}

/// Parse a structured answer, tolerating a Markdown code fence around the JSON
pub(crate) fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ProviderError> {
    let body = strip_code_fence(raw);
    serde_json::from_str(body).map_err(|e| ProviderError::MalformedOutput(e.to_string()))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
