//! Common test utilities for lessonforge integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use lessonforge::{
    Config, ContentProvider, CourseGenerator, Database, Event, GenerationHandle,
    ScriptedProvider,
};

/// Configuration with the given credentials and no inter-chapter pause
pub fn test_config(credentials: &[&str], temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.provider.credentials = credentials.iter().map(|c| c.to_string()).collect();
    config.generation.chapter_pause = Duration::ZERO;
    config.generation.pause_jitter = false;
    config.persistence.database_path = temp_dir.path().join("lessonforge.db");
    config
}

/// Open the SQLite store named in `config` and build a generator over `provider`
///
/// Each call opens a fresh connection pool, which is how a restarted process
/// sees the database.
pub async fn open_generator(
    config: &Config,
    provider: Arc<dyn ContentProvider>,
) -> CourseGenerator {
    let db = Database::new(&config.persistence.database_path)
        .await
        .expect("database must open");
    CourseGenerator::new(config.clone(), provider, Arc::new(db))
        .expect("generator must build")
}

/// Provider scripted for a two-chapter course
pub fn roman_history() -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::course(&["Founding", "Punic Wars"]))
}

/// Drain a run's events up to and including the terminal one
pub async fn collect_events(handle: &mut GenerationHandle) -> Vec<Event> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

/// Load Gemini credentials from the environment (and .env)
///
/// `GEMINI_API_KEY` holds one key; `GEMINI_API_KEYS` may hold several,
/// comma-separated.
pub fn load_gemini_credentials() -> Option<Vec<String>> {
    dotenvy::dotenv().ok();

    let keys: Vec<String> = std::env::var("GEMINI_API_KEYS")
        .or_else(|_| std::env::var("GEMINI_API_KEY"))
        .ok()?
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();

    (!keys.is_empty()).then_some(keys)
}

/// Check if live provider credentials are available
pub fn has_live_credentials() -> bool {
    load_gemini_credentials().is_some()
}
