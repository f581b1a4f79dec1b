//! Course generation orchestrator
//!
//! [`CourseGenerator`] sequences the stages for one topic, using the
//! resumable store to decide what is left to do.
//!
//! ## Submodules
//!
//! Methods on [`CourseGenerator`] are organized by concern:
//! - [`generation`]: Start, resume and cancel the main outline → chapter loop
//! - [`enrichment`]: On-demand podcast script and audio for one chapter
//! - [`run_state`]: Single-flight lock shared by both flows

mod enrichment;
mod generation;
mod run_state;

pub use generation::GenerationHandle;
pub use run_state::RunState;

use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::provider::{ContentProvider, GeminiProvider, ProviderAdapter};
use crate::stages::StageRunner;
use crate::store::{self, ResumableStore, TopicStore};
use crate::types::{Event, GenerationProgress, RunKind, TopicSnapshot, normalize_topic};

use run_state::RunLock;

/// Course generator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct CourseGenerator {
    /// Resumable store; the only source of truth for produced artifacts
    pub(crate) store: Arc<dyn ResumableStore>,
    /// Stage generators over the provider adapter
    pub(crate) stages: StageRunner,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Runtime-replaceable provider credentials, in rotation order
    pub(crate) credentials: Arc<RwLock<Vec<String>>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Single-flight lock shared by generation, enrichment and discard
    pub(crate) run_lock: RunLock,
}

impl CourseGenerator {
    /// Create a generator over an explicit provider and store
    pub fn new(
        config: Config,
        provider: Arc<dyn ContentProvider>,
        store: Arc<dyn ResumableStore>,
    ) -> Result<Self> {
        config.validate()?;

        let adapter = ProviderAdapter::new(provider, config.provider.request_timeout);
        let (event_tx, _rx) = broadcast::channel(1000);

        tracing::debug!(
            provider = adapter.provider_name(),
            credentials = config.provider.credentials.len(),
            "Course generator created"
        );

        Ok(Self {
            store,
            stages: StageRunner::new(adapter),
            credentials: Arc::new(RwLock::new(config.provider.credentials.clone())),
            config: Arc::new(config),
            event_tx,
            run_lock: RunLock::new(),
        })
    }

    /// Create a generator backed by the Gemini API and the SQLite database
    /// named in `config.persistence.database_path`
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let provider = GeminiProvider::new(&config.provider).map_err(|e| Error::Config {
            message: e.to_string(),
            key: Some("provider".to_string()),
        })?;
        let db = Database::new(&config.persistence.database_path).await?;

        Self::new(config, Arc::new(provider), Arc::new(db))
    }

    /// Subscribe to generation events
    ///
    /// Every run emits [`Event::RunStarted`], stage progress, and exactly one
    /// terminal event (`Done`, `Cancelled` or `Failed`).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn config(&self) -> Arc<Config> {
        self.config.clone()
    }

    /// Replace the provider credentials
    ///
    /// Takes effect for the next run; an in-flight run keeps the pool it
    /// started with.
    pub async fn set_credentials(&self, credentials: Vec<String>) -> Result<()> {
        if credentials.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::Config {
                message: "credentials must not contain blank entries".to_string(),
                key: Some("provider.credentials".to_string()),
            });
        }

        let count = credentials.len();
        *self.credentials.write().await = credentials;
        tracing::info!(count, "Provider credentials replaced");
        Ok(())
    }

    /// Number of configured credentials
    pub async fn credential_count(&self) -> usize {
        self.credentials.read().await.len()
    }

    /// Current state of the single-flight lock
    pub fn run_state(&self) -> RunState {
        self.run_lock.current()
    }

    /// Most recently started topic, if any
    pub async fn active_topic(&self) -> Result<Option<String>> {
        store::active_topic(self.store.as_ref()).await
    }

    /// Topics with stored artifacts
    ///
    /// SQLite lists the most recently updated topic first; [`MemoryStore`]
    /// sorts by name.
    ///
    /// [`MemoryStore`]: crate::store::MemoryStore
    pub async fn topics(&self) -> Result<Vec<String>> {
        self.store.topics().await
    }

    /// Everything stored for a topic
    pub async fn snapshot(&self, topic: &str) -> Result<TopicSnapshot> {
        let topic = normalize_topic(topic)?;
        self.topic_store(&topic).snapshot().await
    }

    /// Run position of a topic, derived from its stored artifacts
    pub async fn progress(&self, topic: &str) -> Result<GenerationProgress> {
        Ok(GenerationProgress::derive(&self.snapshot(topic).await?))
    }

    /// Delete every artifact of a topic
    ///
    /// Refused with [`Error::AlreadyRunning`] while any run is in flight.
    pub async fn discard_topic(&self, topic: &str) -> Result<()> {
        let topic = normalize_topic(topic)?;
        let _guard = self.run_lock.acquire(RunKind::Discard, &topic)?;

        self.topic_store(&topic).clear().await?;
        if self.active_topic().await?.as_deref() == Some(topic.as_str()) {
            store::clear_active_topic(self.store.as_ref()).await?;
        }

        tracing::info!(topic = %topic, "Topic discarded");
        Ok(())
    }

    pub(crate) fn topic_store(&self, topic: &str) -> TopicStore {
        TopicStore::new(self.store.clone(), topic)
    }

    /// Snapshot of the credentials for one run; fails fast when empty
    pub(crate) async fn run_credentials(&self) -> Result<Vec<String>> {
        let credentials = self.credentials.read().await.clone();
        if credentials.is_empty() {
            return Err(Error::CredentialsRequired);
        }
        Ok(credentials)
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
