//! HTTP implementation of [`ContentProvider`] for the Gemini REST API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{AudioClip, ContentProvider, GenerationRequest, ProviderError, SpeechRequest};
use crate::config::ProviderConfig;

/// Gemini `generateContent` client
pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    speech_model: String,
    voice: String,
}

impl GeminiProvider {
    /// Create a provider from configuration.
    ///
    /// The per-call timeout is enforced by [`ProviderAdapter`](super::ProviderAdapter);
    /// the HTTP client only gets the same bound as a backstop.
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            speech_model: config.speech_model.clone(),
            voice: config.voice.clone(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    async fn post(
        &self,
        model: &str,
        credential: &str,
        body: &GeminiRequest<'_>,
    ) -> Result<GeminiResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", credential)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Unknown(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Unknown(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let err = ProviderError::classify(Some(status.as_u16()), &text);
            tracing::debug!(
                status = status.as_u16(),
                class = ?err.class(),
                "Gemini returned an error status"
            );
            return Err(err);
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::MalformedOutput(format!("unexpected response envelope: {e}")))
    }
}

#[async_trait]
impl ContentProvider for GeminiProvider {
    async fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        let body = GeminiRequest {
            contents: vec![GeminiContentRequest {
                role: "user",
                parts: vec![GeminiPartRequest {
                    text: &request.prompt,
                }],
            }],
            generation_config: GenerationConfigRequest {
                response_mime_type: request
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json"),
                response_schema: request.response_schema.as_ref(),
                response_modalities: None,
                speech_config: None,
            },
        };

        let response = self.post(&self.model, credential, &body).await?;
        Ok(collect_text(response))
    }

    async fn synthesize(
        &self,
        credential: &str,
        request: &SpeechRequest,
    ) -> Result<AudioClip, ProviderError> {
        let body = GeminiRequest {
            contents: vec![GeminiContentRequest {
                role: "user",
                parts: vec![GeminiPartRequest {
                    text: &request.script,
                }],
            }],
            generation_config: GenerationConfigRequest {
                response_mime_type: None,
                response_schema: None,
                response_modalities: Some(vec!["AUDIO"]),
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: &self.voice,
                        },
                    },
                }),
            },
        };

        let response = self.post(&self.speech_model, credential, &body).await?;
        response
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .filter(|blob| !blob.data.is_empty())
            .map(|blob| AudioClip {
                mime_type: blob.mime_type,
                data: blob.data,
            })
            .ok_or_else(|| ProviderError::MalformedOutput("response contained no audio".into()))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

fn collect_text(response: GeminiResponse) -> String {
    for candidate in response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            match reason {
                "MAX_TOKENS" => tracing::warn!("Gemini response truncated due to max token limit"),
                "SAFETY" => tracing::warn!("Gemini response blocked by safety filters"),
                "RECITATION" => tracing::warn!("Gemini response blocked due to recitation"),
                _ => {}
            }
        }

        if let Some(content) = candidate.content {
            let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
            if !text.trim().is_empty() {
                return text;
            }
        }
    }
    String::new()
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContentRequest<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfigRequest<'a>,
}

#[derive(Serialize)]
struct GeminiContentRequest<'a> {
    role: &'static str,
    parts: Vec<GeminiPartRequest<'a>>,
}

#[derive(Serialize)]
struct GeminiPartRequest<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfigRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}
