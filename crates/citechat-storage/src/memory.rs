use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use citechat_core::{ChatHistoryBackend, ChatMessage, HistoryKey, Result};

/// Volatile backend. Clones share contents, so a test can keep a handle
/// and inspect what was stored.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryBackend {
    histories: Arc<RwLock<HashMap<(PathBuf, HistoryKey), Vec<ChatMessage>>>>,
}

impl InMemoryHistoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently holding a non-empty history for `library_path`.
    pub fn keys(&self, library_path: &Path) -> Vec<HistoryKey> {
        let mut keys: Vec<HistoryKey> = self
            .histories
            .read()
            .keys()
            .filter(|(path, _)| path == library_path)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.histories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.read().is_empty()
    }
}

#[async_trait]
impl ChatHistoryBackend for InMemoryHistoryBackend {
    async fn load_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
    ) -> Result<Vec<ChatMessage>> {
        Ok(self
            .histories
            .read()
            .get(&(library_path.to_path_buf(), key.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn store_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let slot = (library_path.to_path_buf(), key.clone());
        let mut histories = self.histories.write();
        if messages.is_empty() {
            histories.remove(&slot);
        } else {
            histories.insert(slot, messages.to_vec());
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
