//! Storage trait for chat history persistence

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::identity::HistoryKey;
use crate::message::ChatMessage;

/// Persistence backend for conversation histories.
///
/// Histories are addressed by the library file path and a key naming either
/// an entry (citation key) or a group (group name). Storing an empty list
/// clears the key.
///
/// Built-in backends: `InMemoryHistoryBackend`, `FileHistoryBackend` and
/// `SqliteHistoryBackend`.
#[async_trait]
pub trait ChatHistoryBackend: Send + Sync {
    /// Load the messages stored under a key. Unknown keys yield an empty list.
    async fn load_messages(&self, library_path: &Path, key: &HistoryKey)
    -> Result<Vec<ChatMessage>>;

    async fn store_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
        messages: &[ChatMessage],
    ) -> Result<()>;

    /// Make every store so far durable.
    async fn commit(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
