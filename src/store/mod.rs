//! Resumable store
//!
//! [`ResumableStore`] is the storage seam: a durable key/value map
//! partitioned by topic, plus a handful of process-wide runtime values. The
//! orchestrator treats it as its only source of truth for what has already
//! been produced, so every `put` must be durable when it returns.
//!
//! [`TopicStore`] layers the typed artifact layout on top:
//!
//! | key           | value                         |
//! |---------------|-------------------------------|
//! | `outline`     | [`Outline`]                   |
//! | `chapters`    | `Vec<`[`Chapter`]`>`          |
//! | `flashcards`  | `Vec<`[`Flashcard`]`>`        |
//! | `quiz`        | `Vec<`[`QuizQuestion`]`>`     |
//! | `audio/<i>`   | [`AudioClip`] for chapter `i` |

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result, StorageError};
use crate::provider::AudioClip;
use crate::types::{Chapter, Flashcard, Outline, QuizQuestion, TopicSnapshot};

const OUTLINE_KEY: &str = "outline";
const CHAPTERS_KEY: &str = "chapters";
const FLASHCARDS_KEY: &str = "flashcards";
const QUIZ_KEY: &str = "quiz";

const CREDENTIAL_INDEX_KEY: &str = "credential_index";
const ACTIVE_TOPIC_KEY: &str = "active_topic";

/// Durable key/value persistence partitioned by topic
#[async_trait]
pub trait ResumableStore: Send + Sync {
    /// Read one artifact of a topic
    async fn get(&self, topic: &str, key: &str) -> Result<Option<Value>>;

    /// Write one artifact of a topic; durable when this returns
    async fn put(&self, topic: &str, key: &str, value: &Value) -> Result<()>;

    /// Delete every artifact of a topic in one step
    async fn clear(&self, topic: &str) -> Result<()>;

    /// Read a process-wide runtime value
    async fn get_state(&self, key: &str) -> Result<Option<String>>;

    /// Write a process-wide runtime value
    async fn put_state(&self, key: &str, value: &str) -> Result<()>;

    /// Topics that have at least one stored artifact, in a store-defined order
    async fn topics(&self) -> Result<Vec<String>>;
}

/// Key under which the audio of chapter `index` is stored
pub fn audio_key(index: usize) -> String {
    format!("audio/{index}")
}

/// Typed view of one topic's artifacts
#[derive(Clone)]
pub struct TopicStore {
    store: Arc<dyn ResumableStore>,
    topic: String,
}

impl TopicStore {
    /// Bind a store to a topic
    pub fn new(store: Arc<dyn ResumableStore>, topic: impl Into<String>) -> Self {
        Self {
            store,
            topic: topic.into(),
        }
    }

    /// Topic this view is bound to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stored outline, if any
    pub async fn outline(&self) -> Result<Option<Outline>> {
        self.get_typed(OUTLINE_KEY).await
    }

    /// Chapters aligned with `outline`
    ///
    /// Missing trailing entries are filled with empty chapters, so a crash
    /// between writing the outline and the chapter array is harmless.
    pub async fn chapters(&self, outline: &Outline) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> = self.get_typed(CHAPTERS_KEY).await?.unwrap_or_default();
        if chapters.len() > outline.len() {
            return Err(StorageError::Corrupt {
                key: CHAPTERS_KEY.to_string(),
                reason: format!(
                    "{} chapters stored for an outline of {}",
                    chapters.len(),
                    outline.len()
                ),
            }
            .into());
        }
        for title in &outline.titles()[chapters.len()..] {
            chapters.push(Chapter::empty(title.clone()));
        }
        Ok(chapters)
    }

    /// Replace chapter `index` and persist the chapter array
    pub async fn save_chapter(
        &self,
        chapters: &mut [Chapter],
        index: usize,
        chapter: Chapter,
    ) -> Result<()> {
        let slot = chapters
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("chapter {index} of '{}'", self.topic)))?;
        *slot = chapter;
        self.put_typed(CHAPTERS_KEY, &*chapters).await
    }

    /// Persist a fresh outline with empty chapter, flashcard and quiz records
    ///
    /// The outline is written last: it is the marker a later run uses to
    /// decide between resuming and starting over.
    pub async fn materialize(&self, outline: &Outline) -> Result<Vec<Chapter>> {
        let chapters: Vec<Chapter> = outline.titles().iter().map(Chapter::empty).collect();
        self.put_typed(CHAPTERS_KEY, &chapters).await?;
        self.put_typed(FLASHCARDS_KEY, &Vec::<Flashcard>::new()).await?;
        self.put_typed(QUIZ_KEY, &Vec::<QuizQuestion>::new()).await?;
        self.put_typed(OUTLINE_KEY, outline).await?;
        Ok(chapters)
    }

    /// Accumulated flashcards
    pub async fn flashcards(&self) -> Result<Vec<Flashcard>> {
        Ok(self.get_typed(FLASHCARDS_KEY).await?.unwrap_or_default())
    }

    /// Append flashcards; an empty batch writes nothing
    pub async fn append_flashcards(&self, cards: &[Flashcard]) -> Result<usize> {
        if cards.is_empty() {
            return Ok(0);
        }
        let mut all = self.flashcards().await?;
        all.extend_from_slice(cards);
        self.put_typed(FLASHCARDS_KEY, &all).await?;
        Ok(all.len())
    }

    /// Accumulated quiz questions
    pub async fn quiz(&self) -> Result<Vec<QuizQuestion>> {
        Ok(self.get_typed(QUIZ_KEY).await?.unwrap_or_default())
    }

    /// Append quiz questions; an empty batch writes nothing
    pub async fn append_quiz(&self, questions: &[QuizQuestion]) -> Result<usize> {
        if questions.is_empty() {
            return Ok(0);
        }
        let mut all = self.quiz().await?;
        all.extend_from_slice(questions);
        self.put_typed(QUIZ_KEY, &all).await?;
        Ok(all.len())
    }

    /// Store the audio of chapter `index`; returns its key
    pub async fn put_audio(&self, index: usize, clip: &AudioClip) -> Result<String> {
        let key = audio_key(index);
        self.put_typed(&key, clip).await?;
        Ok(key)
    }

    /// Audio stored under `key`
    pub async fn audio(&self, key: &str) -> Result<Option<AudioClip>> {
        self.get_typed(key).await
    }

    /// Everything stored for the topic
    pub async fn snapshot(&self) -> Result<TopicSnapshot> {
        let outline = self.outline().await?;
        let chapters = match &outline {
            Some(outline) => self.chapters(outline).await?,
            None => Vec::new(),
        };
        Ok(TopicSnapshot {
            topic: self.topic.clone(),
            outline,
            chapters,
            flashcards: self.flashcards().await?,
            quiz: self.quiz().await?,
        })
    }

    /// Delete every artifact of the topic
    pub async fn clear(&self) -> Result<()> {
        self.store.clear(&self.topic).await
    }

    async fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.store.get(&self.topic, key).await? else {
            return Ok(None);
        };
        serde_json::from_value(value).map(Some).map_err(|e| {
            StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn put_typed<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.store.put(&self.topic, key, &value).await
    }
}

/// Persisted credential rotation index (0 when never stored or unreadable)
pub async fn credential_index(store: &dyn ResumableStore) -> Result<usize> {
    let Some(raw) = store.get_state(CREDENTIAL_INDEX_KEY).await? else {
        return Ok(0);
    };
    Ok(raw.parse().unwrap_or_else(|_| {
        tracing::warn!(value = %raw, "Ignoring unreadable credential index");
        0
    }))
}

/// Persist the credential rotation index
pub async fn set_credential_index(store: &dyn ResumableStore, index: usize) -> Result<()> {
    store
        .put_state(CREDENTIAL_INDEX_KEY, &index.to_string())
        .await
}

/// Most recently started topic
pub async fn active_topic(store: &dyn ResumableStore) -> Result<Option<String>> {
    Ok(store
        .get_state(ACTIVE_TOPIC_KEY)
        .await?
        .filter(|t| !t.trim().is_empty()))
}

/// Remember the most recently started topic
pub async fn set_active_topic(store: &dyn ResumableStore, topic: &str) -> Result<()> {
    store.put_state(ACTIVE_TOPIC_KEY, topic).await
}

/// Forget the active topic
pub async fn clear_active_topic(store: &dyn ResumableStore) -> Result<()> {
    store.put_state(ACTIVE_TOPIC_KEY, "").await
}
