//! Configuration types for lessonforge

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::error::{Error, Result};

/// Generative-AI provider settings
///
/// Credentials are kept in configuration order; that order is the rotation
/// order of the credential pool.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL (default: Google generative language endpoint)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for structured text generation
    #[serde(default = "default_model")]
    pub model: String,

    /// Model used for text-to-speech
    #[serde(default = "default_speech_model")]
    pub speech_model: String,

    /// Prebuilt voice name for podcast audio
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Upper bound for a single provider call (default: 120 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// API credentials, tried in order
    #[serde(default)]
    pub credentials: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            speech_model: default_speech_model(),
            voice: default_voice(),
            request_timeout: default_request_timeout(),
            credentials: Vec::new(),
        }
    }
}

// Credentials are secrets; only their count is printed.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("speech_model", &self.speech_model)
            .field("voice", &self.voice)
            .field("request_timeout", &self.request_timeout)
            .field("credentials", &format_args!("[{} redacted]", self.credentials.len()))
            .finish()
    }
}

/// Generation behavior (language, batch sizes, pacing)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Default output language (default: "English")
    #[serde(default = "default_language")]
    pub language: String,

    /// Flashcards requested per chapter (default: 10)
    #[serde(default = "default_flashcards_per_chapter")]
    pub flashcards_per_chapter: usize,

    /// Quiz questions requested per chapter (default: 5)
    #[serde(default = "default_quiz_questions_per_chapter")]
    pub quiz_questions_per_chapter: usize,

    /// Pause between chapters to avoid bursting the provider (default: 1500 ms)
    #[serde(default = "default_chapter_pause", with = "millis_serde")]
    pub chapter_pause: Duration,

    /// Randomize the pause between 1x and 2x its value (default: true)
    #[serde(default = "default_true")]
    pub pause_jitter: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            flashcards_per_chapter: default_flashcards_per_chapter(),
            quiz_questions_per_chapter: default_quiz_questions_per_chapter(),
            chapter_pause: default_chapter_pause(),
            pause_jitter: true,
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./lessonforge.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`CourseGenerator`](crate::CourseGenerator)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider endpoint, models and credentials
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Generation behavior
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Storage settings
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse a configuration from JSON, applying defaults for missing fields
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check structural validity
    ///
    /// An empty credential list is allowed here; generation refuses to start
    /// with [`Error::CredentialsRequired`] instead, so credentials can be
    /// supplied later at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.provider.base_url.trim().is_empty() {
            return Err(config_error("base_url must not be empty", "provider.base_url"));
        }
        if self.provider.model.trim().is_empty() {
            return Err(config_error("model must not be empty", "provider.model"));
        }
        if self.provider.request_timeout.is_zero() {
            return Err(config_error(
                "request_timeout must be greater than zero",
                "provider.request_timeout",
            ));
        }
        if self
            .provider
            .credentials
            .iter()
            .any(|c| c.trim().is_empty())
        {
            return Err(config_error(
                "credentials must not contain blank entries",
                "provider.credentials",
            ));
        }
        if self.generation.language.trim().is_empty() {
            return Err(config_error(
                "language must not be empty",
                "generation.language",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_speech_model() -> String {
    "gemini-2.5-flash-preview-tts".to_string()
}

fn default_voice() -> String {
    "Kore".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_language() -> String {
    "English".to_string()
}

fn default_flashcards_per_chapter() -> usize {
    10
}

fn default_quiz_questions_per_chapter() -> usize {
    5
}

fn default_chapter_pause() -> Duration {
    Duration::from_millis(1500)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./lessonforge.db")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
