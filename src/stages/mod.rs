//! Stage generators
//!
//! Each stage is one request/response contract on top of
//! [`run_with_rotation`]: build the prompt, call the provider through the
//! [`ProviderAdapter`], validate the answer. Stages never touch the store;
//! persisting results is the orchestrator's job.

mod prompts;

use serde::Deserialize;

use crate::credentials::CredentialPool;
use crate::error::{Error, Result};
use crate::provider::{AudioClip, GenerationRequest, ProviderAdapter, SpeechRequest};
use crate::retry::{Attempted, run_with_rotation};
use crate::types::{ChapterRef, Flashcard, Outline, QuizQuestion, Stage};

/// Flashcard as returned by the provider, before tagging
#[derive(Debug, Deserialize)]
struct FlashcardDraft {
    front: String,
    back: String,
}

/// Quiz question as returned by the provider, before validation and tagging
#[derive(Debug, Deserialize)]
struct QuizDraft {
    question: String,
    options: [String; 4],
    answer: String,
    #[serde(default)]
    explanation: String,
}

/// Runs single stages against the provider
#[derive(Clone)]
pub struct StageRunner {
    adapter: ProviderAdapter,
}

impl StageRunner {
    /// Create a runner over a provider adapter
    pub fn new(adapter: ProviderAdapter) -> Self {
        Self { adapter }
    }

    /// Generate the ordered chapter titles for a topic
    ///
    /// Blank titles are dropped; an outline with no titles left is
    /// [`Error::EmptyOutput`].
    pub async fn outline(
        &self,
        pool: &mut CredentialPool,
        topic: &str,
        language: &str,
    ) -> Result<Attempted<Outline>> {
        let request = GenerationRequest {
            stage: Stage::Outline,
            prompt: prompts::outline(topic, language),
            response_schema: Some(prompts::outline_schema()),
        };
        let adapter = &self.adapter;
        let request = &request;

        let attempted = run_with_rotation(pool, Stage::Outline, move |credential| async move {
            adapter.call_json::<Vec<String>>(&credential, request).await
        })
        .await?;

        let attempted = attempted.map(|titles| {
            Outline(
                titles
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            )
        });
        if attempted.value.is_empty() {
            return Err(Error::EmptyOutput {
                stage: Stage::Outline,
            });
        }
        Ok(attempted)
    }

    /// Generate the Markdown text of one chapter
    pub async fn chapter_content(
        &self,
        pool: &mut CredentialPool,
        topic: &str,
        chapter_title: &str,
        language: &str,
    ) -> Result<Attempted<String>> {
        let request = GenerationRequest {
            stage: Stage::ChapterContent,
            prompt: prompts::chapter_content(topic, chapter_title, language),
            response_schema: None,
        };
        self.text_stage(pool, &request).await
    }

    /// Generate flashcards for one chapter, tagged with `chapter`
    ///
    /// Zero cards is a valid answer.
    pub async fn flashcards(
        &self,
        pool: &mut CredentialPool,
        topic: &str,
        chapter: &ChapterRef,
        chapter_content: &str,
        language: &str,
        count: usize,
    ) -> Result<Attempted<Vec<Flashcard>>> {
        if count == 0 {
            return Ok(nothing_requested(pool));
        }

        let request = GenerationRequest {
            stage: Stage::Flashcards,
            prompt: prompts::flashcards(topic, &chapter.title, chapter_content, language, count),
            response_schema: Some(prompts::flashcards_schema()),
        };
        let adapter = &self.adapter;
        let request = &request;

        let attempted = run_with_rotation(pool, Stage::Flashcards, move |credential| async move {
            adapter
                .call_json::<Vec<FlashcardDraft>>(&credential, request)
                .await
        })
        .await?;

        Ok(attempted.map(|drafts| {
            drafts
                .into_iter()
                .map(|draft| Flashcard {
                    front: draft.front,
                    back: draft.back,
                    source_chapter: chapter.clone(),
                })
                .collect()
        }))
    }

    /// Generate multiple-choice questions for one chapter, tagged with `chapter`
    ///
    /// Questions whose answer is not one of their options are dropped. Zero
    /// questions is a valid answer; an options list that does not have exactly
    /// four entries fails the stage as [`Error::InvalidFormat`].
    pub async fn quiz(
        &self,
        pool: &mut CredentialPool,
        topic: &str,
        chapter: &ChapterRef,
        chapter_content: &str,
        language: &str,
        count: usize,
    ) -> Result<Attempted<Vec<QuizQuestion>>> {
        if count == 0 {
            return Ok(nothing_requested(pool));
        }

        let request = GenerationRequest {
            stage: Stage::Quiz,
            prompt: prompts::quiz(topic, &chapter.title, chapter_content, language, count),
            response_schema: Some(prompts::quiz_schema()),
        };
        let adapter = &self.adapter;
        let request = &request;

        let attempted = run_with_rotation(pool, Stage::Quiz, move |credential| async move {
            adapter.call_json::<Vec<QuizDraft>>(&credential, request).await
        })
        .await?;

        Ok(attempted.map(|drafts| {
            drafts
                .into_iter()
                .filter_map(|draft| {
                    let answer = draft.answer.trim();
                    if !draft.options.iter().any(|o| o.trim() == answer) {
                        tracing::warn!(
                            chapter_index = chapter.index,
                            question = %draft.question,
                            "Dropping quiz question whose answer is not among its options"
                        );
                        return None;
                    }
                    Some(QuizQuestion {
                        question: draft.question,
                        answer: answer.to_string(),
                        options: draft.options,
                        explanation: draft.explanation,
                        source_chapter: chapter.clone(),
                    })
                })
                .collect()
        }))
    }

    /// Generate a two-host podcast dialogue for one chapter
    pub async fn podcast_script(
        &self,
        pool: &mut CredentialPool,
        topic: &str,
        chapter_title: &str,
        chapter_content: &str,
        language: &str,
    ) -> Result<Attempted<String>> {
        let request = GenerationRequest {
            stage: Stage::PodcastScript,
            prompt: prompts::podcast_script(topic, chapter_title, chapter_content, language),
            response_schema: None,
        };
        self.text_stage(pool, &request).await
    }

    /// Synthesize audio for a podcast script
    pub async fn audio(
        &self,
        pool: &mut CredentialPool,
        script: &str,
    ) -> Result<Attempted<AudioClip>> {
        if script.trim().is_empty() {
            return Err(Error::MissingPrerequisite {
                stage: Stage::Audio,
                missing: "podcast script".to_string(),
            });
        }

        let request = SpeechRequest {
            script: script.to_string(),
        };
        let adapter = &self.adapter;
        let request = &request;

        run_with_rotation(pool, Stage::Audio, move |credential| async move {
            adapter.call_speech(&credential, request).await
        })
        .await
    }

    async fn text_stage(
        &self,
        pool: &mut CredentialPool,
        request: &GenerationRequest,
    ) -> Result<Attempted<String>> {
        let adapter = &self.adapter;
        let attempted = run_with_rotation(pool, request.stage, move |credential| async move {
            adapter.call_text(&credential, request).await
        })
        .await?;

        let attempted = attempted.map(|text| text.trim().to_string());
        if attempted.value.is_empty() {
            return Err(Error::EmptyOutput {
                stage: request.stage,
            });
        }
        Ok(attempted)
    }
}

fn nothing_requested<T>(pool: &CredentialPool) -> Attempted<Vec<T>> {
    Attempted {
        value: Vec::new(),
        index_used: pool.current_index(),
        attempts: 0,
    }
}
