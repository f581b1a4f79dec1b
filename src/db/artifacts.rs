//! Per-topic artifacts and the [`ResumableStore`] implementation.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::store::ResumableStore;
use crate::{Error, Result};

use super::Database;

impl Database {
    /// Read one artifact of a topic
    pub async fn get_artifact(&self, topic: &str, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT value FROM artifacts WHERE topic = ? AND key = ?")
                .bind(topic)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Storage(StorageError::QueryFailed(format!(
                        "Failed to read artifact '{}': {}",
                        key, e
                    )))
                })?;

        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| {
                Error::Storage(StorageError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
        })
        .transpose()
    }

    /// Insert or replace one artifact of a topic
    pub async fn put_artifact(&self, topic: &str, key: &str, value: &Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let raw = serde_json::to_string(value)?;

        sqlx::query(
            r#"
            INSERT INTO artifacts (topic, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(topic, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(topic)
        .bind(key)
        .bind(raw)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Storage(StorageError::QueryFailed(format!(
                "Failed to write artifact '{}': {}",
                key, e
            )))
        })?;

        Ok(())
    }

    /// Delete every artifact of a topic
    ///
    /// Returns the number of artifacts removed.
    pub async fn delete_topic(&self, topic: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM artifacts WHERE topic = ?")
            .bind(topic)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Storage(StorageError::QueryFailed(format!(
                    "Failed to delete topic artifacts: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Topics with at least one stored artifact, most recently updated first
    pub async fn list_topics(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(
            r#"
            SELECT topic FROM artifacts
            GROUP BY topic
            ORDER BY MAX(updated_at) DESC, topic ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Storage(StorageError::QueryFailed(format!(
                "Failed to list topics: {}",
                e
            )))
        })
    }
}

#[async_trait]
impl ResumableStore for Database {
    async fn get(&self, topic: &str, key: &str) -> Result<Option<Value>> {
        self.get_artifact(topic, key).await
    }

    async fn put(&self, topic: &str, key: &str, value: &Value) -> Result<()> {
        self.put_artifact(topic, key, value).await
    }

    async fn clear(&self, topic: &str) -> Result<()> {
        let removed = self.delete_topic(topic).await?;
        tracing::debug!(topic, removed, "Cleared topic artifacts");
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        self.get_runtime_value(key).await
    }

    async fn put_state(&self, key: &str, value: &str) -> Result<()> {
        self.set_runtime_value(key, value).await
    }

    async fn topics(&self) -> Result<Vec<String>> {
        self.list_topics().await
    }
}
