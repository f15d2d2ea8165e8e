//! SQLite backend for chat histories

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use citechat_core::{ChatError, ChatHistoryBackend, ChatMessage, HistoryKey, Result};

pub struct SqliteHistoryBackend {
    pool: sqlx::SqlitePool,
}

impl SqliteHistoryBackend {
    pub async fn new(path: &str) -> Result<Self> {
        let pool = Self::connect(path).await?;
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    async fn connect(path: &str) -> Result<sqlx::SqlitePool> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(path)
            .map_err(|e| ChatError::Persistence(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // A single connection keeps ":memory:" databases shared.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_histories (
                library_path TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                messages TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (library_path, kind, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| ChatError::Persistence(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ChatHistoryBackend for SqliteHistoryBackend {
    async fn load_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
    ) -> Result<Vec<ChatMessage>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT messages FROM chat_histories WHERE library_path = ? AND kind = ? AND name = ?",
        )
        .bind(library_path.to_string_lossy().as_ref())
        .bind(key.namespace())
        .bind(key.name())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ChatError::Persistence(e.to_string()))?;

        match row {
            Some((data,)) => serde_json::from_str(&data)
                .map_err(|e| ChatError::Persistence(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn store_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let library_path = library_path.to_string_lossy();

        if messages.is_empty() {
            sqlx::query(
                "DELETE FROM chat_histories WHERE library_path = ? AND kind = ? AND name = ?",
            )
            .bind(library_path.as_ref())
            .bind(key.namespace())
            .bind(key.name())
            .execute(&self.pool)
            .await
            .map_err(|e| ChatError::Persistence(e.to_string()))?;
            return Ok(());
        }

        let data = serde_json::to_string(messages)?;
        sqlx::query(
            r#"
            INSERT INTO chat_histories (library_path, kind, name, messages, message_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(library_path, kind, name) DO UPDATE SET
                messages = excluded.messages,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(library_path.as_ref())
        .bind(key.namespace())
        .bind(key.name())
        .bind(&data)
        .bind(messages.len() as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| ChatError::Persistence(e.to_string()))?;

        debug!(key = %key, messages = messages.len(), "Stored chat history");
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        // Each statement runs in autocommit mode.
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
