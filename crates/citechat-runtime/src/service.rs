//! Entry point that hands out chat sessions

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use citechat_core::{ChatHistoryBackend, EntryId, GroupId, LibraryContext, LibraryId, Result};
use citechat_history::ChatHistoryStore;
use citechat_template::AiTemplates;

use crate::config::PreferencesHandle;
use crate::orchestrator::ChatCollaborators;
use crate::session::ChatSession;
use crate::subject::ChatSubject;

/// Owns the collaborators, preferences, templates and history store, and
/// opens one session per entry or group.
///
/// Opening the same subject twice returns the same session. Libraries a
/// chat is opened for are tracked so renames migrate their histories.
pub struct AiService {
    collaborators: ChatCollaborators,
    templates: AiTemplates,
    preferences: PreferencesHandle,
    store: ChatHistoryStore,
    sessions: Mutex<HashMap<ChatSubject, ChatSession>>,
    tracked: Mutex<HashSet<LibraryId>>,
}

impl AiService {
    pub fn new(
        collaborators: ChatCollaborators,
        templates: AiTemplates,
        preferences: PreferencesHandle,
        backend: Arc<dyn ChatHistoryBackend>,
    ) -> Self {
        Self {
            collaborators,
            templates,
            preferences,
            store: ChatHistoryStore::new(backend),
            sessions: Mutex::new(HashMap::new()),
            tracked: Mutex::new(HashSet::new()),
        }
    }

    pub async fn open_entry_chat(
        &self,
        library: &Arc<LibraryContext>,
        entry: EntryId,
    ) -> Result<ChatSession> {
        let subject = ChatSubject::Entry(entry);
        if let Some(session) = self.sessions.lock().get(&subject) {
            return Ok(session.clone());
        }

        self.track(library);
        self.store.set_generate_missing_citation_keys(
            self.preferences.get().generate_missing_citation_keys,
        );
        let history = self.store.history_for_entry(library, entry).await?;
        self.start_session(subject, library, history)
    }

    pub async fn open_group_chat(
        &self,
        library: &Arc<LibraryContext>,
        group: GroupId,
    ) -> Result<ChatSession> {
        let subject = ChatSubject::Group(group);
        if let Some(session) = self.sessions.lock().get(&subject) {
            return Ok(session.clone());
        }

        self.track(library);
        let history = self.store.history_for_group(library, group).await?;
        self.start_session(subject, library, history)
    }

    fn start_session(
        &self,
        subject: ChatSubject,
        library: &Arc<LibraryContext>,
        history: citechat_core::ChatHistory,
    ) -> Result<ChatSession> {
        let mut sessions = self.sessions.lock();
        // A concurrent open of the same subject may have finished first.
        if let Some(session) = sessions.get(&subject) {
            return Ok(session.clone());
        }

        let session = ChatSession::start(
            subject,
            Arc::clone(library),
            history,
            self.collaborators.clone(),
            self.templates.clone(),
            &self.preferences,
        )?;
        info!(chat = %session.name(), messages = session.history().len(), "Opened chat");
        sessions.insert(subject, session.clone());
        Ok(session)
    }

    fn track(&self, library: &Arc<LibraryContext>) {
        if self.tracked.lock().insert(library.id()) {
            self.store.track_library(library);
        }
    }

    /// Forget the session and write its history back. Clones of the session
    /// still held elsewhere keep working but are no longer persisted.
    pub async fn close_chat(&self, subject: ChatSubject) {
        self.sessions.lock().remove(&subject);
        match subject {
            ChatSubject::Entry(entry) => self.store.close_entry(entry).await,
            ChatSubject::Group(group) => self.store.close_group(group).await,
        }
    }

    /// Stop following a library. Open chats of it stay open.
    pub fn untrack_library(&self, library: LibraryId) {
        if self.tracked.lock().remove(&library) {
            self.store.untrack_library(library);
        }
    }

    pub fn open_chats(&self) -> Vec<ChatSubject> {
        self.sessions.lock().keys().copied().collect()
    }

    /// Persist every open history and close the backend.
    pub async fn shutdown(&self) {
        let closed = {
            let mut sessions = self.sessions.lock();
            let count = sessions.len();
            sessions.clear();
            count
        };
        self.tracked.lock().clear();
        self.store.close_all().await;
        info!(sessions = closed, "AI service shut down");
    }

    pub fn preferences(&self) -> &PreferencesHandle {
        &self.preferences
    }

    pub fn templates(&self) -> &AiTemplates {
        &self.templates
    }

    pub fn history_store(&self) -> &ChatHistoryStore {
        &self.store
    }
}
