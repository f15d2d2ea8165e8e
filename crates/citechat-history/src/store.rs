//! Lazily populated, write-back cache of conversation histories

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use citechat_core::{
    ChatError, ChatHistory, ChatHistoryBackend, ChatMessage, CitationKeyGenerator, EntryId,
    GroupId, HistoryKey, LibraryContext, LibraryEvent, LibraryId, Persistence, Result,
};

use crate::record::HistoryRecord;

/// Cache keyed by stable entry/group ids. Citation keys and group names are
/// only used to address the backend, so renames never re-key the cache.
#[derive(Default)]
struct Registry {
    entries: HashMap<EntryId, HistoryRecord>,
    groups: HashMap<GroupId, HistoryRecord>,
}

struct StoreInner {
    backend: Arc<dyn ChatHistoryBackend>,
    // Every change to the registry shape and every backend write it implies
    // happen under this lock, so a rename and a close never interleave.
    registry: Mutex<Registry>,
    subscriptions: SyncMutex<HashMap<LibraryId, JoinHandle<()>>>,
    key_generator: CitationKeyGenerator,
    generate_missing_keys: AtomicBool,
    closed: AtomicBool,
}

/// Conversation histories for entries and groups.
///
/// `history_for_*` returns the same live [`ChatHistory`] for an entity until
/// it is closed; `close_*` writes it back if the entity currently has a
/// valid persistence identity, then evicts it. Clones share the cache.
#[derive(Clone)]
pub struct ChatHistoryStore {
    inner: Arc<StoreInner>,
}

impl ChatHistoryStore {
    pub fn new(backend: Arc<dyn ChatHistoryBackend>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                registry: Mutex::new(Registry::default()),
                subscriptions: SyncMutex::new(HashMap::new()),
                key_generator: CitationKeyGenerator::new(),
                generate_missing_keys: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether opening a chat for an entry without a citation key first
    /// tries to generate one.
    pub fn set_generate_missing_citation_keys(&self, enabled: bool) {
        self.inner
            .generate_missing_keys
            .store(enabled, Ordering::Relaxed);
    }

    pub fn backend(&self) -> &Arc<dyn ChatHistoryBackend> {
        &self.inner.backend
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ChatError::StoreClosed)
        } else {
            Ok(())
        }
    }

    pub async fn history_for_entry(
        &self,
        library: &Arc<LibraryContext>,
        entry: EntryId,
    ) -> Result<ChatHistory> {
        let mut registry = self.inner.registry.lock().await;
        self.ensure_open()?;

        if let Some(record) = registry.entries.get(&entry) {
            return Ok(record.history.clone());
        }
        if library.entry(entry).is_none() {
            return Err(ChatError::UnknownEntry(entry.to_string()));
        }

        if self.inner.generate_missing_keys.load(Ordering::Relaxed) {
            if let Some(key) = library.ensure_citation_key(entry, &self.inner.key_generator)? {
                debug!(entry = %entry, citation_key = %key, "Citation key available");
            }
        }

        let messages = match library.entry_identity(entry) {
            Persistence::Persistable(identity) => {
                self.load(&identity.library_path, &identity.history_key())
                    .await
            }
            Persistence::NonPersistable(reason) => {
                debug!(entry = %entry, %reason, "Entry chat will not be persisted");
                Vec::new()
            }
        };

        debug!(entry = %entry, messages = messages.len(), "Opened entry history");
        let history = ChatHistory::with_messages(messages);
        registry
            .entries
            .insert(entry, HistoryRecord::new(history.clone(), library));
        Ok(history)
    }

    pub async fn history_for_group(
        &self,
        library: &Arc<LibraryContext>,
        group: GroupId,
    ) -> Result<ChatHistory> {
        let mut registry = self.inner.registry.lock().await;
        self.ensure_open()?;

        if let Some(record) = registry.groups.get(&group) {
            return Ok(record.history.clone());
        }
        if library.group(group).is_none() {
            return Err(ChatError::UnknownGroup(group.to_string()));
        }

        let messages = match library.group_identity(group) {
            Persistence::Persistable(identity) => {
                self.load(&identity.library_path, &identity.history_key())
                    .await
            }
            Persistence::NonPersistable(reason) => {
                debug!(group = %group, %reason, "Group chat will not be persisted");
                Vec::new()
            }
        };

        debug!(group = %group, messages = messages.len(), "Opened group history");
        let history = ChatHistory::with_messages(messages);
        registry
            .groups
            .insert(group, HistoryRecord::new(history.clone(), library));
        Ok(history)
    }

    pub async fn is_entry_open(&self, entry: EntryId) -> bool {
        self.inner.registry.lock().await.entries.contains_key(&entry)
    }

    pub async fn is_group_open(&self, group: GroupId) -> bool {
        self.inner.registry.lock().await.groups.contains_key(&group)
    }

    /// Write back and evict. Closing an entity that is not open does nothing.
    pub async fn close_entry(&self, entry: EntryId) {
        let mut registry = self.inner.registry.lock().await;
        if let Some(record) = registry.entries.remove(&entry) {
            self.flush_entry(entry, &record).await;
        }
    }

    pub async fn close_group(&self, group: GroupId) {
        let mut registry = self.inner.registry.lock().await;
        if let Some(record) = registry.groups.remove(&group) {
            self.flush_group(group, &record).await;
        }
    }

    /// Flush every open history, then commit and close the backend. Later
    /// `history_for_*` calls fail with [`ChatError::StoreClosed`].
    pub async fn close_all(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .subscriptions
            .lock()
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in handles {
            handle.abort();
        }

        let mut registry = self.inner.registry.lock().await;
        let entries: Vec<(EntryId, HistoryRecord)> = registry.entries.drain().collect();
        let groups: Vec<(GroupId, HistoryRecord)> = registry.groups.drain().collect();
        let flushed = entries.len() + groups.len();

        for (entry, record) in &entries {
            self.flush_entry(*entry, record).await;
        }
        for (group, record) in &groups {
            self.flush_group(*group, record).await;
        }

        if let Err(e) = self.inner.backend.commit().await {
            warn!(error = %e, "Failed to commit chat histories");
        }
        if let Err(e) = self.inner.backend.close().await {
            warn!(error = %e, "Failed to close chat history backend");
        }
        info!(histories = flushed, "Chat history store closed");
    }

    /// Move the stored history of an entry whose citation key changed from
    /// `old` to its current key, leaving an empty history under `old`.
    ///
    /// If the entry is open its live messages are written under the new key.
    /// Otherwise whatever is persisted under `old` is migrated.
    pub async fn on_citation_key_changed(
        &self,
        library: &Arc<LibraryContext>,
        entry: EntryId,
        old: Option<&str>,
    ) {
        let registry = self.inner.registry.lock().await;
        if self.is_closed() {
            return;
        }
        let Some(library_path) = library.path() else {
            return;
        };

        // An old key still held by another entry was a duplicate and never
        // owned a stored history.
        let old_key = old
            .map(str::trim)
            .filter(|k| !k.is_empty() && library.citation_key_count(k) == 0)
            .map(|k| HistoryKey::Entry(k.to_string()));
        let target = library.entry_identity(entry).into_identity();

        match registry.entries.get(&entry) {
            Some(record) => {
                if let Some(old_key) = &old_key {
                    self.store(&library_path, old_key, &[]).await;
                }
                if let Some(identity) = &target {
                    let messages = record.history.conversational_messages();
                    self.store(&identity.library_path, &identity.history_key(), &messages)
                        .await;
                }
            }
            None => {
                if let (Some(old_key), Some(identity)) = (&old_key, &target) {
                    self.migrate(&library_path, old_key, &identity.history_key())
                        .await;
                }
            }
        }

        info!(
            entry = %entry,
            old = old.unwrap_or_default(),
            new = target.as_ref().map(|i| i.citation_key.as_str()).unwrap_or_default(),
            "Citation key change applied to chat history"
        );
    }

    pub async fn on_group_renamed(
        &self,
        library: &Arc<LibraryContext>,
        group: GroupId,
        old_name: &str,
    ) {
        let registry = self.inner.registry.lock().await;
        if self.is_closed() {
            return;
        }
        let Some(library_path) = library.path() else {
            return;
        };

        let old_key = (!library.groups().iter().any(|g| g.name == old_name))
            .then(|| HistoryKey::Group(old_name.to_string()));
        let target = library.group_identity(group).into_identity();

        match registry.groups.get(&group) {
            Some(record) => {
                if let Some(old_key) = &old_key {
                    self.store(&library_path, old_key, &[]).await;
                }
                if let Some(identity) = &target {
                    let messages = record.history.conversational_messages();
                    self.store(&identity.library_path, &identity.history_key(), &messages)
                        .await;
                }
            }
            None => {
                if let (Some(old_key), Some(identity)) = (&old_key, &target) {
                    self.migrate(&library_path, old_key, &identity.history_key())
                        .await;
                }
            }
        }

        info!(
            group = %group,
            old = old_name,
            new = target.as_ref().map(|i| i.group_name.as_str()).unwrap_or_default(),
            "Group rename applied to chat history"
        );
    }

    pub async fn handle_event(&self, library: &Arc<LibraryContext>, event: &LibraryEvent) {
        match event {
            LibraryEvent::CitationKeyChanged { entry, old, .. } => {
                self.on_citation_key_changed(library, *entry, old.as_deref())
                    .await
            }
            LibraryEvent::GroupRenamed {
                group, old_name, ..
            } => self.on_group_renamed(library, *group, old_name).await,
            _ => {}
        }
    }

    /// Follow rename events of `library` until it is dropped, untracked or
    /// the store is closed.
    pub fn track_library(&self, library: &Arc<LibraryContext>) {
        let mut events = library.subscribe();
        let store = Arc::downgrade(&self.inner);
        let weak_library = Arc::downgrade(library);
        let library_id = library.id();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let (Some(inner), Some(library)) =
                            (Weak::upgrade(&store), weak_library.upgrade())
                        else {
                            break;
                        };
                        ChatHistoryStore { inner }
                            .handle_event(&library, &event)
                            .await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(library = %library_id, skipped, "Missed library events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(library = %library_id, "Stopped tracking library");
        });

        if let Some(previous) = self.inner.subscriptions.lock().insert(library_id, handle) {
            previous.abort();
        }
    }

    pub fn untrack_library(&self, library: LibraryId) {
        if let Some(handle) = self.inner.subscriptions.lock().remove(&library) {
            handle.abort();
        }
    }

    async fn flush_entry(&self, entry: EntryId, record: &HistoryRecord) {
        let Some(library) = record.library() else {
            debug!(entry = %entry, "Library gone, entry chat not persisted");
            return;
        };
        match library.entry_identity(entry) {
            Persistence::Persistable(identity) => {
                let messages = record.history.conversational_messages();
                self.store(&identity.library_path, &identity.history_key(), &messages)
                    .await;
            }
            Persistence::NonPersistable(reason) => {
                debug!(entry = %entry, %reason, "Entry chat not persisted");
            }
        }
    }

    async fn flush_group(&self, group: GroupId, record: &HistoryRecord) {
        let Some(library) = record.library() else {
            debug!(group = %group, "Library gone, group chat not persisted");
            return;
        };
        match library.group_identity(group) {
            Persistence::Persistable(identity) => {
                let messages = record.history.conversational_messages();
                self.store(&identity.library_path, &identity.history_key(), &messages)
                    .await;
            }
            Persistence::NonPersistable(reason) => {
                debug!(group = %group, %reason, "Group chat not persisted");
            }
        }
    }

    async fn migrate(&self, library_path: &Path, from: &HistoryKey, to: &HistoryKey) {
        let messages = self.load(library_path, from).await;
        if messages.is_empty() {
            return;
        }
        // A close flushed under the new key before this rename was handled;
        // that copy is the newer one.
        if !self.load(library_path, to).await.is_empty() {
            self.store(library_path, from, &[]).await;
            debug!(from = %from, to = %to, "Dropped stale history under old key");
            return;
        }
        self.store(library_path, to, &messages).await;
        self.store(library_path, from, &[]).await;
        debug!(from = %from, to = %to, messages = messages.len(), "Migrated stored history");
    }

    /// Best effort: a failing backend yields an empty history.
    async fn load(&self, library_path: &Path, key: &HistoryKey) -> Vec<ChatMessage> {
        match self.inner.backend.load_messages(library_path, key).await {
            Ok(messages) => messages
                .into_iter()
                .filter(ChatMessage::is_conversational)
                .collect(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load chat history, starting empty");
                Vec::new()
            }
        }
    }

    /// Best effort: failures are logged and not retried.
    async fn store(&self, library_path: &Path, key: &HistoryKey, messages: &[ChatMessage]) {
        match self
            .inner
            .backend
            .store_messages(library_path, key, messages)
            .await
        {
            Ok(()) => debug!(key = %key, messages = messages.len(), "Stored chat history"),
            Err(e) => warn!(key = %key, error = %e, "Failed to store chat history"),
        }
    }
}

impl std::fmt::Debug for ChatHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHistoryStore")
            .field("closed", &self.is_closed())
            .finish()
    }
}
