//! JSON file backend, one file per library

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use citechat_core::{ChatHistoryBackend, ChatMessage, HistoryKey, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LibraryHistories {
    library_path: PathBuf,
    #[serde(default)]
    entries: BTreeMap<String, Vec<ChatMessage>>,
    #[serde(default)]
    groups: BTreeMap<String, Vec<ChatMessage>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl LibraryHistories {
    fn new(library_path: &Path) -> Self {
        Self {
            library_path: library_path.to_path_buf(),
            ..Default::default()
        }
    }

    fn slot(&self, key: &HistoryKey) -> Option<&Vec<ChatMessage>> {
        match key {
            HistoryKey::Entry(name) => self.entries.get(name),
            HistoryKey::Group(name) => self.groups.get(name),
        }
    }

    fn set(&mut self, key: &HistoryKey, messages: &[ChatMessage]) {
        let map = match key {
            HistoryKey::Entry(_) => &mut self.entries,
            HistoryKey::Group(_) => &mut self.groups,
        };
        if messages.is_empty() {
            map.remove(key.name());
        } else {
            map.insert(key.name().to_string(), messages.to_vec());
        }
    }
}

/// Stores histories as `<base>/<uuid-v5 of library path>.json`.
///
/// Writes are staged in memory and reach disk on `commit` (or `close`);
/// reads see staged writes.
pub struct FileHistoryBackend {
    base_path: PathBuf,
    staged: Mutex<HashMap<PathBuf, LibraryHistories>>,
}

impl FileHistoryBackend {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn library_file(&self, library_path: &Path) -> PathBuf {
        let id = Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            library_path.to_string_lossy().as_bytes(),
        );
        self.base_path.join(format!("{}.json", id))
    }

    async fn read_file(&self, library_path: &Path) -> Result<LibraryHistories> {
        let path = self.library_file(library_path);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(LibraryHistories::new(library_path));
        }
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}

#[async_trait]
impl ChatHistoryBackend for FileHistoryBackend {
    async fn load_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
    ) -> Result<Vec<ChatMessage>> {
        {
            let staged = self.staged.lock().await;
            if let Some(histories) = staged.get(library_path) {
                return Ok(histories.slot(key).cloned().unwrap_or_default());
            }
        }
        let histories = self.read_file(library_path).await?;
        Ok(histories.slot(key).cloned().unwrap_or_default())
    }

    async fn store_messages(
        &self,
        library_path: &Path,
        key: &HistoryKey,
        messages: &[ChatMessage],
    ) -> Result<()> {
        let mut staged = self.staged.lock().await;
        if !staged.contains_key(library_path) {
            let histories = self.read_file(library_path).await?;
            staged.insert(library_path.to_path_buf(), histories);
        }
        if let Some(histories) = staged.get_mut(library_path) {
            histories.set(key, messages);
            histories.updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut staged = self.staged.lock().await;
        if staged.is_empty() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.base_path).await?;
        for (library_path, histories) in staged.iter() {
            let path = self.library_file(library_path);
            let tmp = path.with_extension("json.tmp");
            let json = serde_json::to_string_pretty(histories)?;
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await?;
            debug!(library = %library_path.display(), file = %path.display(), "Committed chat histories");
        }
        staged.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.commit().await
    }
}
