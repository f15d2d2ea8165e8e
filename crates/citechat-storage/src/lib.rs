//! Persistence backends for conversation histories

mod file;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use citechat_core::{ChatError, ChatHistoryBackend, HistoryKey, Result};
pub use file::FileHistoryBackend;
pub use memory::InMemoryHistoryBackend;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHistoryBackend;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "file")]
    File { path: String },
    #[serde(rename = "sqlite")]
    Sqlite { path: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

pub async fn create_backend(config: &StorageConfig) -> Result<Arc<dyn ChatHistoryBackend>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryHistoryBackend::new())),
        StorageConfig::File { path } => Ok(Arc::new(FileHistoryBackend::new(path))),

        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let backend = SqliteHistoryBackend::new(path).await?;
            Ok(Arc::new(backend))
        }

        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(ChatError::Config(
            "SQLite storage requires 'sqlite' feature".into(),
        )),
    }
}
