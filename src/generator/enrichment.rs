//! On-demand podcast script and audio for one chapter

use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialPool;
use crate::error::{Error, Result};
use crate::store::{self, TopicStore};
use crate::types::{Chapter, Event, RunKind, Stage, StageStatus};

use super::CourseGenerator;

impl CourseGenerator {
    /// Generate the podcast script and audio of a chapter of the active topic
    ///
    /// See [`generate_enrichment_for`](Self::generate_enrichment_for).
    pub async fn generate_enrichment(
        &self,
        chapter_index: usize,
        language: Option<String>,
    ) -> Result<Option<Chapter>> {
        let topic = self
            .active_topic()
            .await?
            .ok_or_else(|| Error::NotFound("no active topic to enrich".to_string()))?;
        self.generate_enrichment_for(&topic, chapter_index, language)
            .await
    }

    /// Generate the podcast script and audio of one chapter
    ///
    /// Runs under the same single-flight lock as generation. Whatever is
    /// already stored is kept: an existing script is not regenerated, and
    /// audio is only synthesized when the chapter has no `audio_ref`. The
    /// chapter must have its content. Returns the updated chapter, or `None`
    /// when cancelled before the script or audio call.
    pub async fn generate_enrichment_for(
        &self,
        topic: &str,
        chapter_index: usize,
        language: Option<String>,
    ) -> Result<Option<Chapter>> {
        let (topic, credentials, guard) = self.admit(topic, RunKind::Enrichment).await?;
        let language = language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.config.generation.language.clone());

        let result = self
            .enrich_chapter(&topic, chapter_index, &language, credentials, guard.token())
            .await;

        drop(guard);

        match &result {
            Ok(Some(_)) => {
                tracing::info!(topic = %topic, chapter_index, "Enrichment complete");
                self.emit(Event::Done { topic });
            }
            Ok(None) => {
                tracing::info!(topic = %topic, chapter_index, "Enrichment cancelled");
                self.emit(Event::Cancelled { topic });
            }
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    chapter_index,
                    error = %e,
                    code = e.error_code(),
                    "Enrichment failed"
                );
                self.emit(Event::Failed {
                    topic,
                    error: e.detail(),
                });
            }
        }

        result
    }

    /// Script then audio; `Ok(None)` when cancelled before either call
    async fn enrich_chapter(
        &self,
        topic: &str,
        index: usize,
        language: &str,
        credentials: Vec<String>,
        token: &CancellationToken,
    ) -> Result<Option<Chapter>> {
        let store = self.store.as_ref();
        let topic_store: TopicStore = self.topic_store(topic);

        let outline = topic_store.outline().await?;
        let mut chapters = match &outline {
            Some(outline) => topic_store.chapters(outline).await?,
            None => Vec::new(),
        };

        // sent before the checks so a Failed event always follows a RunStarted
        self.emit(Event::RunStarted {
            topic: topic.to_string(),
            resumed: chapters
                .get(index)
                .is_some_and(|c| c.podcast_script.is_some()),
        });

        if outline.is_none() {
            return Err(Error::MissingPrerequisite {
                stage: Stage::PodcastScript,
                missing: format!("outline for '{topic}'"),
            });
        }
        let chapter = chapters
            .get(index)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chapter {index} of '{topic}'")))?;
        let Some(content) = chapter.content.clone() else {
            return Err(Error::MissingPrerequisite {
                stage: Stage::PodcastScript,
                missing: format!("content of chapter {index}"),
            });
        };

        let start_index = store::credential_index(store).await?;
        let mut pool =
            CredentialPool::new(credentials, start_index).ok_or(Error::CredentialsRequired)?;

        if token.is_cancelled() {
            return Ok(None);
        }

        let mut chapter = chapter;

        let script = match chapter.podcast_script.clone() {
            Some(script) => {
                self.emit_stage(topic, Stage::PodcastScript, Some(index), StageStatus::Skipped);
                script
            }
            None => {
                self.emit_stage(topic, Stage::PodcastScript, Some(index), StageStatus::Started);
                let script = self
                    .stages
                    .podcast_script(&mut pool, topic, &chapter.title, &content, language)
                    .await?
                    .value;
                chapter.podcast_script = Some(script.clone());
                topic_store
                    .save_chapter(&mut chapters, index, chapter.clone())
                    .await?;
                store::set_credential_index(store, pool.current_index()).await?;
                self.emit_stage(
                    topic,
                    Stage::PodcastScript,
                    Some(index),
                    StageStatus::Completed { items: 1 },
                );
                script
            }
        };

        if token.is_cancelled() {
            return Ok(None);
        }

        if chapter.audio_ref.is_some() {
            self.emit_stage(topic, Stage::Audio, Some(index), StageStatus::Skipped);
            return Ok(Some(chapter));
        }

        self.emit_stage(topic, Stage::Audio, Some(index), StageStatus::Started);
        let clip = self.stages.audio(&mut pool, &script).await?.value;
        let key = topic_store.put_audio(index, &clip).await?;
        chapter.audio_ref = Some(key);
        topic_store
            .save_chapter(&mut chapters, index, chapter.clone())
            .await?;
        store::set_credential_index(store, pool.current_index()).await?;

        tracing::debug!(topic, chapter_index = index, mime_type = %clip.mime_type, "Podcast audio stored");
        self.emit_stage(
            topic,
            Stage::Audio,
            Some(index),
            StageStatus::Completed { items: 1 },
        );

        Ok(Some(chapter))
    }
}
