//! Shareable handle to a running conversation

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use citechat_core::{ChatHistory, ChatMessage, LibraryContext, Result};
use citechat_template::AiTemplates;

use crate::config::PreferencesHandle;
use crate::orchestrator::{ChatCollaborators, ChatOrchestrator};
use crate::subject::ChatSubject;

struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A conversation that can be driven from any task.
///
/// Turns are serialized by an async mutex: a second `answer` waits for the
/// one in flight. Different sessions run independently. A failed turn
/// leaves an error-marked message after the user's message in the visible
/// history. Clones share the conversation.
#[derive(Clone)]
pub struct ChatSession {
    orchestrator: Arc<Mutex<ChatOrchestrator>>,
    subject: ChatSubject,
    history: ChatHistory,
    name: watch::Receiver<String>,
    follow_ups: watch::Receiver<Vec<String>>,
    _listener: Arc<ListenerGuard>,
}

impl ChatSession {
    /// Build the orchestrator and start following library changes that
    /// affect the subject. Must be called inside a tokio runtime.
    pub fn start(
        subject: ChatSubject,
        library: Arc<LibraryContext>,
        history: ChatHistory,
        collaborators: ChatCollaborators,
        templates: AiTemplates,
        preferences: &PreferencesHandle,
    ) -> Result<Self> {
        let events = library.subscribe();
        let orchestrator = ChatOrchestrator::new(
            subject,
            library,
            history.clone(),
            collaborators,
            templates,
            preferences,
        )?;
        let name = orchestrator.subscribe_name();
        let follow_ups = orchestrator.subscribe_follow_ups();
        let orchestrator = Arc::new(Mutex::new(orchestrator));

        let listener = tokio::spawn(Self::follow_library(
            Arc::downgrade(&orchestrator),
            events,
        ));

        Ok(Self {
            orchestrator,
            subject,
            history,
            name,
            follow_ups,
            _listener: Arc::new(ListenerGuard(listener)),
        })
    }

    async fn follow_library(
        orchestrator: Weak<Mutex<ChatOrchestrator>>,
        mut events: tokio::sync::broadcast::Receiver<citechat_core::LibraryEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(orchestrator) = orchestrator.upgrade() else {
                        break;
                    };
                    let mut orchestrator = orchestrator.lock().await;
                    if let Err(e) = orchestrator.handle_library_event(&event) {
                        warn!(error = %e, "Failed to refresh chat subject");
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed library events, refreshing chat subject");
                    let Some(orchestrator) = orchestrator.upgrade() else {
                        break;
                    };
                    if let Err(e) = orchestrator.lock().await.refresh_subject() {
                        warn!(error = %e, "Failed to refresh chat subject");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
        debug!("Chat session stopped following library");
    }

    /// Run one turn. On failure an error message follows the user's message
    /// in the visible history and the error is returned.
    pub async fn answer(&self, text: &str) -> Result<ChatMessage> {
        self.orchestrator.lock().await.answer(text).await
    }

    /// Run a turn on a background task.
    pub fn spawn_answer(&self, text: impl Into<String>) -> JoinHandle<Result<ChatMessage>> {
        let session = self.clone();
        let text = text.into();
        tokio::spawn(async move { session.answer(&text).await })
    }

    /// Apply pending preference and template changes without waiting for
    /// the next turn.
    pub async fn sync_settings(&self) -> Result<()> {
        self.orchestrator.lock().await.sync_settings()
    }

    pub async fn refresh_subject(&self) -> Result<()> {
        self.orchestrator.lock().await.refresh_subject()
    }

    pub async fn memory_messages(&self) -> Vec<ChatMessage> {
        self.orchestrator.lock().await.memory().messages()
    }

    pub fn subject(&self) -> ChatSubject {
        self.subject
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn subscribe_name(&self) -> watch::Receiver<String> {
        self.name.clone()
    }

    pub fn follow_up_questions(&self) -> Vec<String> {
        self.follow_ups.borrow().clone()
    }

    pub fn subscribe_follow_ups(&self) -> watch::Receiver<Vec<String>> {
        self.follow_ups.clone()
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("subject", &self.subject)
            .field("name", &self.name())
            .field("messages", &self.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use citechat_core::{BibEntry, LinkedFile, Role};
    use citechat_llm::{MockChatModel, MockEmbeddingModel};
    use citechat_retrieval::InMemoryEmbeddingStore;

    use crate::config::AiPreferences;

    fn preferences() -> PreferencesHandle {
        let mut prefs = AiPreferences::default();
        prefs.follow_up.enabled = false;
        PreferencesHandle::new(prefs)
    }

    fn collaborators(chat: &MockChatModel) -> ChatCollaborators {
        ChatCollaborators::new(
            Arc::new(chat.clone()),
            Arc::new(MockEmbeddingModel::new()),
            Arc::new(InMemoryEmbeddingStore::new()),
        )
    }

    fn start(
        chat: &MockChatModel,
        library: &Arc<LibraryContext>,
        subject: ChatSubject,
        history: ChatHistory,
    ) -> ChatSession {
        ChatSession::start(
            subject,
            Arc::clone(library),
            history,
            collaborators(chat),
            AiTemplates::new(),
            &preferences(),
        )
        .unwrap()
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_failed_turn_records_error_after_user_message() {
        let chat = MockChatModel::new("chat");
        chat.set_error("boom");
        let library = Arc::new(LibraryContext::new());
        let entry = library.add_entry(BibEntry::new("article").with_citation_key("A"));
        let history = ChatHistory::new();
        let session = start(&chat, &library, ChatSubject::Entry(entry), history.clone());

        assert!(session.answer("hello?").await.is_err());

        let messages = history.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello?");
        assert!(messages[1].error);
        assert!(messages[1].content.contains("boom"));

        chat.clear_error();
        session.answer("again").await.unwrap();
        let memory = session.memory_messages().await;
        assert!(memory.iter().all(|m| !m.error));
    }

    #[tokio::test]
    async fn test_turns_are_serialized() {
        let chat = MockChatModel::new("chat");
        chat.set_latency(30);
        let library = Arc::new(LibraryContext::new());
        let entry = library.add_entry(BibEntry::new("article").with_citation_key("A"));
        let history = ChatHistory::new();
        let session = start(&chat, &library, ChatSubject::Entry(entry), history.clone());

        let first = session.spawn_answer("one");
        let second = session.spawn_answer("two");
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_sessions_run_concurrently() {
        let chat = MockChatModel::new("chat");
        chat.set_latency(50);
        let library = Arc::new(LibraryContext::new());
        let a = library.add_entry(BibEntry::new("article").with_citation_key("A"));
        let b = library.add_entry(BibEntry::new("article").with_citation_key("B"));
        let first = start(&chat, &library, ChatSubject::Entry(a), ChatHistory::new());
        let second = start(&chat, &library, ChatSubject::Entry(b), ChatHistory::new());

        let started = tokio::time::Instant::now();
        let (x, y) = tokio::join!(first.answer("q"), second.answer("q"));
        x.unwrap();
        y.unwrap();
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_session_follows_library_events() {
        let chat = MockChatModel::new("chat");
        let library = Arc::new(LibraryContext::new());
        let entry = library.add_entry(BibEntry::new("article").with_citation_key("Old2020"));
        let session = start(&chat, &library, ChatSubject::Entry(entry), ChatHistory::new());
        assert_eq!(session.name(), "Old2020");

        library
            .set_citation_key(entry, Some("New2021".into()))
            .unwrap();
        assert!(eventually(|| session.name() == "New2021").await);

        library
            .add_file(entry, LinkedFile::new("paper.pdf"))
            .unwrap();
        let mut filtered = false;
        for _ in 0..100 {
            if session.orchestrator.lock().await.filter().is_some() {
                filtered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(filtered);
    }

    #[tokio::test]
    async fn test_follow_ups_observable() {
        let chat = MockChatModel::new("chat");
        chat.set_responses(
            vec!["An answer.".into(), "1. Is there a follow-up?".into()],
            false,
        );
        let library = Arc::new(LibraryContext::new());
        let entry = library.add_entry(BibEntry::new("article").with_citation_key("A"));

        let session = ChatSession::start(
            ChatSubject::Entry(entry),
            Arc::clone(&library),
            ChatHistory::new(),
            collaborators(&chat),
            AiTemplates::new(),
            &PreferencesHandle::default(),
        )
        .unwrap();
        let mut follow_ups = session.subscribe_follow_ups();

        session.answer("question").await.unwrap();
        assert!(follow_ups.has_changed().unwrap());
        assert_eq!(
            session.follow_up_questions(),
            vec!["Is there a follow-up?"]
        );
    }
}
