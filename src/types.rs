//! Core types and events for lessonforge

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorDetail, Result};

/// Generation stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Ordered list of chapter titles for the topic
    Outline,
    /// Markdown theory text for one chapter
    ChapterContent,
    /// Flashcards for one chapter
    Flashcards,
    /// Quiz questions for one chapter
    Quiz,
    /// Two-voice podcast dialogue for one chapter
    PodcastScript,
    /// Synthesized audio for a podcast script
    Audio,
}

impl Stage {
    /// Human-readable label used in messages and logs
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Outline => "outline",
            Stage::ChapterContent => "chapter content",
            Stage::Flashcards => "flashcards",
            Stage::Quiz => "quiz",
            Stage::PodcastScript => "podcast script",
            Stage::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Validate and normalize a topic string.
///
/// Leading and trailing whitespace is not significant; a topic that is empty
/// after trimming is rejected.
pub fn normalize_topic(topic: &str) -> Result<String> {
    let trimmed = topic.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidTopic("topic must not be blank".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Ordered chapter titles for a topic
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outline(pub Vec<String>);

impl Outline {
    /// Chapter titles in order
    pub fn titles(&self) -> &[String] {
        &self.0
    }

    /// Number of chapters
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the outline has no chapters
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Reference from a generated item back to the chapter that produced it
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Position of the chapter in the outline (the foreign key)
    pub index: usize,
    /// Chapter title at generation time (for display)
    pub title: String,
}

/// One chapter of a topic
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Chapter title from the outline
    pub title: String,
    /// Markdown theory text; immutable once present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Podcast dialogue, generated on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_script: Option<String>,
    /// Store key of the synthesized podcast audio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_ref: Option<String>,
}

impl Chapter {
    /// Create an empty chapter for an outline entry
    pub fn empty(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Whether the chapter text has been generated
    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }
}

/// A flashcard tagged with its originating chapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    /// Prompt side
    pub front: String,
    /// Answer side
    pub back: String,
    /// Chapter that produced this card
    pub source_chapter: ChapterRef,
}

/// A multiple-choice quiz question tagged with its originating chapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    /// Question text
    pub question: String,
    /// Exactly four answer options
    pub options: [String; 4],
    /// The correct option (one of `options`)
    pub answer: String,
    /// Why the answer is correct
    pub explanation: String,
    /// Chapter that produced this question
    pub source_chapter: ChapterRef,
}

/// Everything stored for a topic
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicSnapshot {
    /// Topic name
    pub topic: String,
    /// Outline, if generated
    pub outline: Option<Outline>,
    /// One entry per outline chapter, in outline order
    pub chapters: Vec<Chapter>,
    /// Accumulated flashcards
    pub flashcards: Vec<Flashcard>,
    /// Accumulated quiz questions
    pub quiz: Vec<QuizQuestion>,
}

impl TopicSnapshot {
    /// Whether any flashcard is tagged with the given chapter index
    pub fn has_flashcards_for(&self, index: usize) -> bool {
        self.flashcards
            .iter()
            .any(|card| card.source_chapter.index == index)
    }

    /// Whether any quiz question is tagged with the given chapter index
    pub fn has_quiz_for(&self, index: usize) -> bool {
        self.quiz.iter().any(|q| q.source_chapter.index == index)
    }
}

/// Run position of a topic, recomputed from stored artifacts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// Whether an outline exists
    pub has_outline: bool,
    /// Number of chapters in the outline
    pub chapters_total: usize,
    /// Chapters whose content is present
    pub chapters_with_content: usize,
    /// Chapters with at least one flashcard
    pub chapters_with_flashcards: usize,
    /// Chapters with at least one quiz question
    pub chapters_with_quiz: usize,
    /// First chapter still missing content, if any
    pub next_pending_chapter: Option<usize>,
}

impl GenerationProgress {
    /// Derive the run position from a snapshot
    ///
    /// There is no stored cursor: the position is always a function of the
    /// outline, chapter array and artifact tags.
    pub fn derive(snapshot: &TopicSnapshot) -> Self {
        let chapters_total = snapshot.chapters.len();
        let chapters_with_content = snapshot
            .chapters
            .iter()
            .filter(|c| c.has_content())
            .count();
        let chapters_with_flashcards = (0..chapters_total)
            .filter(|i| snapshot.has_flashcards_for(*i))
            .count();
        let chapters_with_quiz = (0..chapters_total)
            .filter(|i| snapshot.has_quiz_for(*i))
            .count();
        let next_pending_chapter = snapshot.chapters.iter().position(|c| !c.has_content());

        Self {
            has_outline: snapshot.outline.is_some(),
            chapters_total,
            chapters_with_content,
            chapters_with_flashcards,
            chapters_with_quiz,
            next_pending_chapter,
        }
    }

    /// Whether every chapter has its content
    pub fn is_complete(&self) -> bool {
        self.has_outline && self.next_pending_chapter.is_none()
    }
}

/// Options for a generation run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    /// Output language (defaults to the configured language)
    #[serde(default)]
    pub language: Option<String>,
    /// Flashcards to request per chapter (defaults to config)
    #[serde(default)]
    pub flashcards_per_chapter: Option<usize>,
    /// Quiz questions to request per chapter (defaults to config)
    #[serde(default)]
    pub quiz_questions_per_chapter: Option<usize>,
    /// Discard existing artifacts for the topic and start over
    #[serde(default)]
    pub force_new: bool,
}

/// Status of a stage within a progress event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    /// Provider call(s) for the stage are starting
    Started,
    /// Stage finished and its output is persisted
    Completed {
        /// Number of items produced (1 for text stages)
        items: usize,
    },
    /// Stage output already existed and was not regenerated
    Skipped,
}

/// Event emitted during a generation or enrichment run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run was admitted; always the first event of a run
    RunStarted {
        /// Topic being generated
        topic: String,
        /// True when an existing outline is being resumed, or for enrichment
        /// when the chapter already has its script
        resumed: bool,
    },

    /// Stage progress
    Stage {
        /// Topic being generated
        topic: String,
        /// Stage concerned
        stage: Stage,
        /// Chapter index (None for the outline)
        #[serde(skip_serializing_if = "Option::is_none")]
        chapter_index: Option<usize>,
        /// What happened
        #[serde(flatten)]
        status: StageStatus,
    },

    /// Run finished with every chapter processed
    Done {
        /// Topic generated
        topic: String,
    },

    /// Run stopped cooperatively; persisted artifacts remain resumable
    Cancelled {
        /// Topic being generated
        topic: String,
    },

    /// Run aborted
    Failed {
        /// Topic being generated
        topic: String,
        /// Failure summary
        error: ErrorDetail,
    },
}

impl Event {
    /// Topic the event belongs to
    pub fn topic(&self) -> &str {
        match self {
            Event::RunStarted { topic, .. }
            | Event::Stage { topic, .. }
            | Event::Done { topic }
            | Event::Cancelled { topic }
            | Event::Failed { topic, .. } => topic,
        }
    }

    /// Whether the event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::Done { .. } | Event::Cancelled { .. } | Event::Failed { .. }
        )
    }
}

/// Terminal status of a run that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All requested work completed
    Done,
    /// Stopped by cancellation
    Cancelled,
}

/// Summary returned by a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Topic that was processed
    pub topic: String,
    /// How the run ended
    pub status: RunStatus,
    /// Number of provider-backed stages executed (skipped stages excluded)
    pub stages_generated: usize,
}

/// Kind of generation-type operation holding the single-flight lock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Outline → content → flashcards → quiz
    Generation,
    /// Podcast script → audio for one chapter
    Enrichment,
    /// Clearing every artifact of a topic
    Discard,
}
