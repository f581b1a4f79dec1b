//! In-memory store for tests and ephemeral use

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ResumableStore;
use crate::error::Result;

#[derive(Debug, Default)]
struct Inner {
    artifacts: HashMap<String, HashMap<String, Value>>,
    state: HashMap<String, String>,
}

/// Thread-safe in-memory [`ResumableStore`]
///
/// Clones share the same data. Nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumableStore for MemoryStore {
    async fn get(&self, topic: &str, key: &str) -> Result<Option<Value>> {
        let inner = self.inner.read().await;
        Ok(inner
            .artifacts
            .get(topic)
            .and_then(|artifacts| artifacts.get(key))
            .cloned())
    }

    async fn put(&self, topic: &str, key: &str, value: &Value) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .artifacts
            .entry(topic.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn clear(&self, topic: &str) -> Result<()> {
        self.inner.write().await.artifacts.remove(topic);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.state.get(key).cloned())
    }

    async fn put_state(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .state
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Sorted by name
    async fn topics(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut topics: Vec<String> = inner
            .artifacts
            .iter()
            .filter(|(_, artifacts)| !artifacts.is_empty())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        Ok(topics)
    }
}
