//! Deterministic in-process provider
//!
//! Answers from a per-stage script instead of a network call. Used by the
//! crate's own tests and by embedders that need a provider without
//! credentials or network access.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::{AudioClip, ContentProvider, GenerationRequest, ProviderError, SpeechRequest};
use crate::types::Stage;

type Reply = Result<String, ProviderError>;

/// One call observed by a [`ScriptedProvider`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    /// Stage of the request
    pub stage: Stage,
    /// Credential the call was made with
    pub credential: String,
    /// Prompt text (the script for audio calls)
    pub prompt: String,
}

#[derive(Default)]
struct Script {
    queued: HashMap<Stage, VecDeque<Reply>>,
    fallback: HashMap<Stage, Reply>,
    rejected: HashMap<String, ProviderError>,
    calls: Vec<RecordedCall>,
}

/// Provider that replays scripted answers
///
/// For every call the provider records it, then answers with, in order:
/// the error registered for the credential, the next queued reply for the
/// stage, the stage's fallback reply, or [`ProviderError::Unknown`].
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
    latency: Duration,
}

impl ScriptedProvider {
    /// Create a provider with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that can generate a whole course for the given outline
    ///
    /// Every chapter gets the same content, one flashcard and one quiz question.
    pub fn course(titles: &[&str]) -> Self {
        let outline = serde_json::to_string(titles).unwrap_or_else(|_| "[]".to_string());
        Self::new()
            .with_fallback(Stage::Outline, Ok(outline))
            .with_fallback(
                Stage::ChapterContent,
                Ok("# Chapter\n\nScripted chapter text.".to_string()),
            )
            .with_fallback(
                Stage::Flashcards,
                Ok(r#"[{"front":"Scripted question","back":"Scripted answer"}]"#.to_string()),
            )
            .with_fallback(
                Stage::Quiz,
                Ok(r#"[{"question":"Pick A","options":["A","B","C","D"],"answer":"A","explanation":"A is first."}]"#
                    .to_string()),
            )
            .with_fallback(
                Stage::PodcastScript,
                Ok("HOST: Welcome.\nGUEST: Thanks for having me.".to_string()),
            )
            .with_fallback(Stage::Audio, Ok("UklGRiQAAABXQVZF".to_string()))
    }

    /// Queue a successful reply for the next call of `stage`
    pub fn with_reply(self, stage: Stage, reply: impl Into<String>) -> Self {
        self.with_result(stage, Ok(reply.into()))
    }

    /// Queue a failure for the next call of `stage`
    pub fn with_error(self, stage: Stage, error: ProviderError) -> Self {
        self.with_result(stage, Err(error))
    }

    /// Answer used for `stage` once its queue is empty
    pub fn with_fallback(self, stage: Stage, reply: Reply) -> Self {
        self.lock().fallback.insert(stage, reply);
        self
    }

    /// Fail every call made with `credential`
    pub fn reject_credential(self, credential: impl Into<String>, error: ProviderError) -> Self {
        self.lock().rejected.insert(credential.into(), error);
        self
    }

    /// Delay every answer
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Calls observed so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of calls observed for `stage`
    pub fn calls_for(&self, stage: Stage) -> usize {
        self.lock().calls.iter().filter(|c| c.stage == stage).count()
    }

    fn with_result(self, stage: Stage, reply: Reply) -> Self {
        self.lock().queued.entry(stage).or_default().push_back(reply);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panic while holding the lock only happens in a failing test; keep going.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn answer(&self, stage: Stage, credential: &str, prompt: &str) -> Reply {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut script = self.lock();
        script.calls.push(RecordedCall {
            stage,
            credential: credential.to_string(),
            prompt: prompt.to_string(),
        });

        if let Some(err) = script.rejected.get(credential) {
            return Err(err.clone());
        }
        if let Some(reply) = script.queued.get_mut(&stage).and_then(VecDeque::pop_front) {
            return reply;
        }
        script
            .fallback
            .get(&stage)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Unknown(format!("no scripted reply for {stage}"))))
    }
}

#[async_trait]
impl ContentProvider for ScriptedProvider {
    async fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        self.answer(request.stage, credential, &request.prompt).await
    }

    async fn synthesize(
        &self,
        credential: &str,
        request: &SpeechRequest,
    ) -> Result<AudioClip, ProviderError> {
        let data = self.answer(Stage::Audio, credential, &request.script).await?;
        Ok(AudioClip {
            mime_type: "audio/wav".to_string(),
            data,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
