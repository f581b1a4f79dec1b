//! Main generation loop: start, resume and cancel

use futures::{Stream, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialPool;
use crate::error::{Error, Result};
use crate::retry::add_jitter;
use crate::store::{self, TopicStore};
use crate::types::{
    Chapter, ChapterRef, Event, GenerationOptions, Outline, RunKind, RunOutcome, RunStatus, Stage,
    StageStatus, normalize_topic,
};

use super::CourseGenerator;
use super::run_state::RunGuard;

/// A generation run in progress
///
/// Yields the run's events until its terminal event, and the run's outcome
/// through [`GenerationHandle::wait`].
pub struct GenerationHandle {
    topic: String,
    events: BroadcastStream<Event>,
    task: JoinHandle<Result<RunOutcome>>,
    finished: bool,
}

impl GenerationHandle {
    /// Topic being generated (trimmed)
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event of this run; `None` after the terminal event
    ///
    /// Events of other topics on the shared channel are skipped.
    pub async fn next_event(&mut self) -> Option<Event> {
        if self.finished {
            return None;
        }
        while let Some(item) = self.events.next().await {
            match item {
                Ok(event) if event.topic() != self.topic => continue,
                Ok(event) => {
                    if event.is_terminal() {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged, events dropped");
                }
            }
        }
        None
    }

    /// Stream of this run's events, ending with the terminal event
    ///
    /// The run keeps going in the background; its outcome is only observable
    /// through the events.
    pub fn into_events(self) -> impl Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut handle| async move {
            handle.next_event().await.map(|event| (event, handle))
        })
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunOutcome> {
        self.task
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))?
    }
}

/// Per-run settings resolved from options and configuration
struct RunPlan {
    language: String,
    flashcards_per_chapter: usize,
    quiz_questions_per_chapter: usize,
    force_new: bool,
}

/// Mutable state of one run
struct RunContext {
    topic: TopicStore,
    pool: CredentialPool,
    token: CancellationToken,
    stages_generated: usize,
}

impl RunContext {
    fn cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn outcome(&self, status: RunStatus) -> RunOutcome {
        RunOutcome {
            topic: self.topic.topic().to_string(),
            status,
            stages_generated: self.stages_generated,
        }
    }

    async fn persist_credential_index(&self, store: &dyn store::ResumableStore) -> Result<()> {
        store::set_credential_index(store, self.pool.current_index()).await
    }
}

impl CourseGenerator {
    /// Start generating a topic in the background
    ///
    /// Entry guards run before this returns: an empty credential pool fails
    /// with [`Error::CredentialsRequired`], a blank topic with
    /// [`Error::InvalidTopic`], and a run already in flight with
    /// [`Error::AlreadyRunning`]. Everything after that is reported through
    /// the handle.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use lessonforge::*;
    /// # async fn example(generator: CourseGenerator) -> Result<()> {
    /// let mut run = generator
    ///     .start_generation("Roman History", GenerationOptions::default())
    ///     .await?;
    /// while let Some(event) = run.next_event().await {
    ///     println!("{event:?}");
    /// }
    /// let outcome = run.wait().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_generation(
        &self,
        topic: &str,
        options: GenerationOptions,
    ) -> Result<GenerationHandle> {
        let (topic, credentials, guard) = self.admit(topic, RunKind::Generation).await?;

        // Subscribe before spawning so the handle sees every event of the run
        let events = BroadcastStream::new(self.event_tx.subscribe());

        let generator = self.clone();
        let run_topic = topic.clone();
        let task = tokio::spawn(async move {
            generator
                .execute(guard, run_topic, options, credentials)
                .await
        });

        Ok(GenerationHandle {
            topic,
            events,
            task,
            finished: false,
        })
    }

    /// Generate a topic in the calling task
    ///
    /// Same semantics as [`start_generation`](Self::start_generation); events
    /// still reach receivers from [`subscribe`](Self::subscribe).
    pub async fn run_generation(
        &self,
        topic: &str,
        options: GenerationOptions,
    ) -> Result<RunOutcome> {
        let (topic, credentials, guard) = self.admit(topic, RunKind::Generation).await?;
        self.execute(guard, topic, options, credentials).await
    }

    /// Resume the most recently started topic
    pub async fn resume_active(&self) -> Result<GenerationHandle> {
        let topic = self
            .active_topic()
            .await?
            .ok_or_else(|| Error::NotFound("no active topic to resume".to_string()))?;
        self.start_generation(&topic, GenerationOptions::default())
            .await
    }

    /// Request cancellation of the in-flight run
    ///
    /// The run stops at its next checkpoint (between chapters, between stages,
    /// or during the inter-chapter pause). Persisted artifacts are kept.
    /// Returns false when nothing is running.
    pub fn cancel_generation(&self) -> bool {
        let requested = self.run_lock.cancel();
        if requested {
            tracing::info!("Cancellation requested");
        }
        requested
    }

    /// Entry guards shared by every generation-type operation
    pub(crate) async fn admit(
        &self,
        topic: &str,
        kind: RunKind,
    ) -> Result<(String, Vec<String>, RunGuard)> {
        let credentials = self.run_credentials().await?;
        let topic = normalize_topic(topic)?;
        let guard = self.run_lock.acquire(kind, &topic)?;
        Ok((topic, credentials, guard))
    }

    async fn execute(
        &self,
        guard: RunGuard,
        topic: String,
        options: GenerationOptions,
        credentials: Vec<String>,
    ) -> Result<RunOutcome> {
        let result = self
            .generate_course(&topic, &options, credentials, guard.token().clone())
            .await;

        // Release the lock before announcing the end so a listener can start the next run
        drop(guard);

        match &result {
            Ok(outcome) => {
                match outcome.status {
                    RunStatus::Done => {
                        tracing::info!(
                            topic = %topic,
                            stages_generated = outcome.stages_generated,
                            "Generation complete"
                        );
                        self.emit(Event::Done { topic });
                    }
                    RunStatus::Cancelled => {
                        tracing::info!(
                            topic = %topic,
                            stages_generated = outcome.stages_generated,
                            "Generation cancelled"
                        );
                        self.emit(Event::Cancelled { topic });
                    }
                }
            }
            Err(e) => {
                tracing::error!(
                    topic = %topic,
                    error = %e,
                    code = e.error_code(),
                    "Generation failed"
                );
                self.emit(Event::Failed {
                    topic,
                    error: e.detail(),
                });
            }
        }

        result
    }

    async fn generate_course(
        &self,
        topic: &str,
        options: &GenerationOptions,
        credentials: Vec<String>,
        token: CancellationToken,
    ) -> Result<RunOutcome> {
        let plan = self.plan(options);
        let store = self.store.as_ref();

        store::set_active_topic(store, topic).await?;
        let start_index = store::credential_index(store).await?;
        let pool = CredentialPool::new(credentials, start_index).ok_or(Error::CredentialsRequired)?;

        let mut ctx = RunContext {
            topic: self.topic_store(topic),
            pool,
            token,
            stages_generated: 0,
        };

        if ctx.cancelled() {
            return Ok(ctx.outcome(RunStatus::Cancelled));
        }

        let outline = self.ensure_outline(&mut ctx, &plan).await?;
        let mut chapters = ctx.topic.chapters(&outline).await?;

        let snapshot_cards = ctx.topic.flashcards().await?;
        let snapshot_quiz = ctx.topic.quiz().await?;
        let mut chapters_with_cards: HashSet<usize> = snapshot_cards
            .iter()
            .map(|c| c.source_chapter.index)
            .collect();
        let mut chapters_with_quiz: HashSet<usize> = snapshot_quiz
            .iter()
            .map(|q| q.source_chapter.index)
            .collect();

        for (index, title) in outline.titles().iter().enumerate() {
            if ctx.cancelled() {
                return Ok(ctx.outcome(RunStatus::Cancelled));
            }

            let chapter_ref = ChapterRef {
                index,
                title: title.clone(),
            };
            let generated_before = ctx.stages_generated;

            let content = self
                .ensure_content(&mut ctx, &plan, &mut chapters, &chapter_ref)
                .await?;

            if ctx.cancelled() {
                return Ok(ctx.outcome(RunStatus::Cancelled));
            }

            if chapters_with_cards.contains(&index) {
                self.emit_stage(topic, Stage::Flashcards, Some(index), StageStatus::Skipped);
            } else {
                self.emit_stage(topic, Stage::Flashcards, Some(index), StageStatus::Started);
                let attempted = self
                    .stages
                    .flashcards(
                        &mut ctx.pool,
                        topic,
                        &chapter_ref,
                        &content,
                        &plan.language,
                        plan.flashcards_per_chapter,
                    )
                    .await?;
                let cards = attempted.value;
                if cards.is_empty() {
                    tracing::warn!(topic, chapter_index = index, "No flashcards generated for chapter");
                } else {
                    ctx.topic.append_flashcards(&cards).await?;
                    chapters_with_cards.insert(index);
                }
                if attempted.attempts > 0 {
                    ctx.stages_generated += 1;
                }
                self.emit_stage(
                    topic,
                    Stage::Flashcards,
                    Some(index),
                    StageStatus::Completed { items: cards.len() },
                );
            }

            if ctx.cancelled() {
                return Ok(ctx.outcome(RunStatus::Cancelled));
            }

            if chapters_with_quiz.contains(&index) {
                self.emit_stage(topic, Stage::Quiz, Some(index), StageStatus::Skipped);
            } else {
                self.emit_stage(topic, Stage::Quiz, Some(index), StageStatus::Started);
                let attempted = self
                    .stages
                    .quiz(
                        &mut ctx.pool,
                        topic,
                        &chapter_ref,
                        &content,
                        &plan.language,
                        plan.quiz_questions_per_chapter,
                    )
                    .await?;
                let questions = attempted.value;
                if questions.is_empty() {
                    tracing::warn!(topic, chapter_index = index, "No quiz questions generated for chapter");
                } else {
                    ctx.topic.append_quiz(&questions).await?;
                    chapters_with_quiz.insert(index);
                }
                if attempted.attempts > 0 {
                    ctx.stages_generated += 1;
                }
                self.emit_stage(
                    topic,
                    Stage::Quiz,
                    Some(index),
                    StageStatus::Completed {
                        items: questions.len(),
                    },
                );
            }

            ctx.persist_credential_index(store).await?;

            let called_provider = ctx.stages_generated > generated_before;
            if called_provider && index + 1 < outline.len() && !self.pause(&ctx.token).await {
                return Ok(ctx.outcome(RunStatus::Cancelled));
            }
        }

        Ok(ctx.outcome(RunStatus::Done))
    }

    fn plan(&self, options: &GenerationOptions) -> RunPlan {
        let defaults = &self.config.generation;
        RunPlan {
            language: options
                .language
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .unwrap_or(defaults.language.as_str())
                .to_string(),
            flashcards_per_chapter: options
                .flashcards_per_chapter
                .unwrap_or(defaults.flashcards_per_chapter),
            quiz_questions_per_chapter: options
                .quiz_questions_per_chapter
                .unwrap_or(defaults.quiz_questions_per_chapter),
            force_new: options.force_new,
        }
    }

    /// Load the stored outline, or clear the topic and generate a new one
    async fn ensure_outline(&self, ctx: &mut RunContext, plan: &RunPlan) -> Result<Outline> {
        let topic = ctx.topic.topic().to_string();

        let existing = if plan.force_new {
            None
        } else {
            ctx.topic.outline().await?
        };

        self.emit(Event::RunStarted {
            topic: topic.clone(),
            resumed: existing.is_some(),
        });

        if let Some(outline) = existing {
            tracing::info!(topic = %topic, chapters = outline.len(), "Resuming topic");
            self.emit_stage(&topic, Stage::Outline, None, StageStatus::Skipped);
            return Ok(outline);
        }

        // Partial artifacts without an outline are stale; never let them leak into the new run
        ctx.topic.clear().await?;
        tracing::info!(topic = %topic, force_new = plan.force_new, "Starting topic from scratch");

        self.emit_stage(&topic, Stage::Outline, None, StageStatus::Started);
        let outline = self
            .stages
            .outline(&mut ctx.pool, &topic, &plan.language)
            .await?
            .value;

        ctx.topic.materialize(&outline).await?;
        ctx.persist_credential_index(self.store.as_ref()).await?;
        ctx.stages_generated += 1;
        self.emit_stage(
            &topic,
            Stage::Outline,
            None,
            StageStatus::Completed {
                items: outline.len(),
            },
        );

        Ok(outline)
    }

    /// Return the chapter text, generating and persisting it when absent
    async fn ensure_content(
        &self,
        ctx: &mut RunContext,
        plan: &RunPlan,
        chapters: &mut [Chapter],
        chapter_ref: &ChapterRef,
    ) -> Result<String> {
        let topic = ctx.topic.topic().to_string();
        let index = chapter_ref.index;

        let existing = chapters
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("chapter {index} of '{topic}'")))?;
        if let Some(content) = &existing.content {
            self.emit_stage(&topic, Stage::ChapterContent, Some(index), StageStatus::Skipped);
            return Ok(content.clone());
        }

        self.emit_stage(&topic, Stage::ChapterContent, Some(index), StageStatus::Started);
        let content = self
            .stages
            .chapter_content(&mut ctx.pool, &topic, &chapter_ref.title, &plan.language)
            .await?
            .value;

        let updated = Chapter {
            content: Some(content.clone()),
            ..existing.clone()
        };
        // Durable before flashcards or quiz for this chapter may start
        ctx.topic.save_chapter(chapters, index, updated).await?;
        ctx.stages_generated += 1;

        tracing::debug!(topic = %topic, chapter_index = index, "Chapter content stored");
        self.emit_stage(
            &topic,
            Stage::ChapterContent,
            Some(index),
            StageStatus::Completed { items: 1 },
        );

        Ok(content)
    }

    /// Sleep between chapters; returns false if cancelled meanwhile
    async fn pause(&self, token: &CancellationToken) -> bool {
        let delay = self.chapter_pause();
        if delay.is_zero() {
            return !token.is_cancelled();
        }
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn chapter_pause(&self) -> Duration {
        let generation = &self.config.generation;
        if generation.pause_jitter {
            add_jitter(generation.chapter_pause)
        } else {
            generation.chapter_pause
        }
    }

    pub(crate) fn emit_stage(
        &self,
        topic: &str,
        stage: Stage,
        chapter_index: Option<usize>,
        status: StageStatus,
    ) {
        self.emit(Event::Stage {
            topic: topic.to_string(),
            stage,
            chapter_index,
            status,
        });
    }
}
