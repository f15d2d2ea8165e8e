//! The retrieval-augmented turn loop of one conversation

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use citechat_core::{
    BibEntry, ChatHistory, ChatMessage, ChatModel, EmbeddingModel, EmbeddingSearchRequest,
    EmbeddingStore, FinishReason, LibraryContext, LibraryEvent, MetadataFilter, Result,
};
use citechat_memory::ChatMemoryWindow;
use citechat_retrieval::{Excerpt, RetrievalFilterBuilder, resolve_excerpts};
use citechat_template::AiTemplates;

use crate::config::{AiPreferences, PreferencesHandle};
use crate::follow_up::FollowUpGenerator;
use crate::subject::ChatSubject;

/// External services a conversation talks to.
#[derive(Clone)]
pub struct ChatCollaborators {
    pub chat_model: Arc<dyn ChatModel>,
    pub embedding_model: Arc<dyn EmbeddingModel>,
    pub embedding_store: Arc<dyn EmbeddingStore>,
}

impl ChatCollaborators {
    pub fn new(
        chat_model: Arc<dyn ChatModel>,
        embedding_model: Arc<dyn EmbeddingModel>,
        embedding_store: Arc<dyn EmbeddingStore>,
    ) -> Self {
        Self {
            chat_model,
            embedding_model,
            embedding_store,
        }
    }
}

/// Drives one conversation: retrieval, prompt building, the model call and
/// the memory/history bookkeeping around it.
///
/// `answer` takes `&mut self`, so turns of one conversation are sequential.
pub struct ChatOrchestrator {
    subject: ChatSubject,
    library: Arc<LibraryContext>,
    entries: Vec<BibEntry>,
    filter: Option<MetadataFilter>,
    memory: ChatMemoryWindow,
    name: watch::Sender<String>,
    follow_ups: watch::Sender<Vec<String>>,
    collaborators: ChatCollaborators,
    follow_up_generator: FollowUpGenerator,
    templates: AiTemplates,
    template_changes: watch::Receiver<u64>,
    preferences: watch::Receiver<AiPreferences>,
}

impl ChatOrchestrator {
    pub fn new(
        subject: ChatSubject,
        library: Arc<LibraryContext>,
        history: ChatHistory,
        collaborators: ChatCollaborators,
        templates: AiTemplates,
        preferences: &PreferencesHandle,
    ) -> Result<Self> {
        let entries = subject.entries(&library);
        let filter = RetrievalFilterBuilder::build(&entries);

        let template_changes = templates.subscribe();
        let mut preferences = preferences.subscribe();
        let budget = preferences.borrow_and_update().context_window_size;

        let system = templates.render_system_message(&entries)?;
        let memory = ChatMemoryWindow::new(history, budget, system);
        let (name, _) = watch::channel(subject.display_name(&library));
        let (follow_ups, _) = watch::channel(Vec::new());
        let follow_up_generator =
            FollowUpGenerator::new(Arc::clone(&collaborators.chat_model), templates.clone());

        Ok(Self {
            subject,
            library,
            entries,
            filter,
            memory,
            name,
            follow_ups,
            collaborators,
            follow_up_generator,
            templates,
            template_changes,
            preferences,
        })
    }

    /// Run one turn and return the assistant's reply.
    ///
    /// The user message is in the visible history before anything can fail.
    /// Embedding, search and model errors propagate after an error-marked
    /// message is recorded behind the question; follow-up generation never
    /// fails the turn.
    pub async fn answer(&mut self, text: &str) -> Result<ChatMessage> {
        // Applied before the question is recorded, so a rebuild never sees a
        // question that is still being answered.
        let settings = self.sync_settings();

        let user_message = ChatMessage::user(text);
        self.memory.history().push(user_message.clone());
        self.follow_ups.send_replace(Vec::new());

        let result = match settings {
            Ok(()) => self.complete_turn(user_message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(chat = %self.name.borrow().as_str(), error = %e, "Chat turn failed");
            self.memory.history().push(ChatMessage::error(e.to_string()));
        }
        result
    }

    async fn complete_turn(&mut self, user_message: ChatMessage) -> Result<ChatMessage> {
        let preferences = self.preferences.borrow().clone();
        let text = user_message.content.clone();

        let excerpts = self.retrieve(&text, &preferences).await?;
        let prompt = self.templates.render_user_message(&text, &excerpts)?;

        // The rendered prompt only goes to the model; memory keeps the raw text.
        let request = self.memory.snapshot_with(ChatMessage::user(prompt));
        let response = self.collaborators.chat_model.chat(&request).await?;
        if response.finish_reason == FinishReason::Length {
            warn!(chat = %self.name.borrow().as_str(), "Model reply was truncated");
        }
        let assistant = response.into_message();

        // Question and reply enter the window together, which is what a
        // rebuild from the history yields.
        self.memory.remember(user_message);
        self.memory.append(assistant.clone());

        info!(
            chat = %self.name.borrow().as_str(),
            excerpts = excerpts.len(),
            history = self.memory.history().len(),
            "Answered chat message"
        );

        if preferences.follow_up.enabled {
            let questions = self
                .follow_up_generator
                .generate_or_empty(&text, &assistant.content, &preferences.follow_up)
                .await;
            self.follow_ups.send_replace(questions);
        }

        Ok(assistant)
    }

    async fn retrieve(&self, text: &str, preferences: &AiPreferences) -> Result<Vec<Excerpt>> {
        let query = self.collaborators.embedding_model.embed(text).await?;
        let request = EmbeddingSearchRequest {
            query,
            max_results: preferences.rag_max_results_count,
            min_score: preferences.rag_min_score,
            filter: self.filter.clone(),
        };
        let matches = self.collaborators.embedding_store.search(&request).await?;
        debug!(
            matches = matches.len(),
            filtered = self.filter.is_some(),
            "Retrieved excerpts"
        );
        Ok(resolve_excerpts(&self.library, matches))
    }

    /// Apply pending preference and template changes.
    ///
    /// A new context window size rebuilds memory from the visible history;
    /// a template change re-renders the system message.
    pub fn sync_settings(&mut self) -> Result<()> {
        if self.preferences.has_changed().unwrap_or(false) {
            let budget = self.preferences.borrow_and_update().context_window_size;
            self.memory.set_budget(budget);
        }

        if self.template_changes.has_changed().unwrap_or(false) {
            self.template_changes.borrow_and_update();
            let system = self.templates.render_system_message(&self.entries)?;
            self.memory.set_system_message(system);
        }
        Ok(())
    }

    /// React to a library change. Returns whether the subject was refreshed.
    pub fn handle_library_event(&mut self, event: &LibraryEvent) -> Result<bool> {
        if !self.subject.is_affected_by(event, &self.entries) {
            return Ok(false);
        }
        self.refresh_subject()?;
        Ok(true)
    }

    /// Re-read the subject entries: rebuilds the retrieval filter, replaces
    /// the system message and updates the conversation name. Past messages
    /// are untouched.
    pub fn refresh_subject(&mut self) -> Result<()> {
        self.entries = self.subject.entries(&self.library);
        self.filter = RetrievalFilterBuilder::build(&self.entries);

        let system = self.templates.render_system_message(&self.entries)?;
        self.memory.set_system_message(system);

        let name = self.subject.display_name(&self.library);
        self.name.send_if_modified(|current| {
            if *current == name {
                false
            } else {
                *current = name;
                true
            }
        });

        debug!(
            entries = self.entries.len(),
            filtered = self.filter.is_some(),
            "Refreshed chat subject"
        );
        Ok(())
    }

    pub fn subject(&self) -> ChatSubject {
        self.subject
    }

    pub fn library(&self) -> &Arc<LibraryContext> {
        &self.library
    }

    pub fn entries(&self) -> &[BibEntry] {
        &self.entries
    }

    pub fn filter(&self) -> Option<&MetadataFilter> {
        self.filter.as_ref()
    }

    pub fn memory(&self) -> &ChatMemoryWindow {
        &self.memory
    }

    pub fn history(&self) -> &ChatHistory {
        self.memory.history()
    }

    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub fn subscribe_name(&self) -> watch::Receiver<String> {
        self.name.subscribe()
    }

    pub fn follow_up_questions(&self) -> Vec<String> {
        self.follow_ups.borrow().clone()
    }

    pub fn subscribe_follow_ups(&self) -> watch::Receiver<Vec<String>> {
        self.follow_ups.subscribe()
    }
}

impl std::fmt::Debug for ChatOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOrchestrator")
            .field("subject", &self.subject)
            .field("entries", &self.entries.len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citechat_core::{ChatError, LinkedFile, Role, TextSegment};
    use citechat_llm::{MockChatModel, MockEmbeddingModel};
    use citechat_retrieval::InMemoryEmbeddingStore;
    use citechat_template::AiTemplateKind;

    struct Fixture {
        library: Arc<LibraryContext>,
        chat: MockChatModel,
        embeddings: MockEmbeddingModel,
        store: InMemoryEmbeddingStore,
        templates: AiTemplates,
        preferences: PreferencesHandle,
    }

    impl Fixture {
        async fn new() -> Self {
            let embeddings = MockEmbeddingModel::new();
            let store = InMemoryEmbeddingStore::new();
            for (text, link) in [
                ("transformers use attention over tokens", "vaswani.pdf"),
                ("attention heads learn syntax", "vaswani.pdf"),
                ("convolutions share weights over pixels", "lecun.pdf"),
            ] {
                store
                    .add_segment(&embeddings, TextSegment::new(text).with_link(link))
                    .await
                    .unwrap();
            }

            let mut preferences = AiPreferences::default();
            preferences.rag_min_score = 0.1;
            preferences.follow_up.enabled = false;

            Self {
                library: Arc::new(LibraryContext::with_path("/tmp/refs.bib")),
                chat: MockChatModel::new("chat"),
                embeddings,
                store,
                templates: AiTemplates::new(),
                preferences: PreferencesHandle::new(preferences),
            }
        }

        fn orchestrator(&self, subject: ChatSubject, history: ChatHistory) -> ChatOrchestrator {
            let collaborators = ChatCollaborators::new(
                Arc::new(self.chat.clone()),
                Arc::new(self.embeddings.clone()),
                Arc::new(self.store.clone()),
            );
            ChatOrchestrator::new(
                subject,
                Arc::clone(&self.library),
                history,
                collaborators,
                self.templates.clone(),
                &self.preferences,
            )
            .unwrap()
        }

        fn vaswani(&self) -> ChatSubject {
            ChatSubject::Entry(
                self.library.add_entry(
                    BibEntry::new("article")
                        .with_citation_key("Vaswani2017")
                        .with_field("title", "Attention Is All You Need")
                        .with_file(LinkedFile::new("vaswani.pdf")),
                ),
            )
        }
    }

    #[tokio::test]
    async fn test_turn_grounds_prompt_but_keeps_raw_message() {
        let fx = Fixture::new().await;
        fx.chat.set_response("Attention weighs tokens.");
        let subject = fx.vaswani();
        let history = ChatHistory::new();
        let mut chat = fx.orchestrator(subject, history.clone());

        let reply = chat.answer("How does attention work?").await.unwrap();
        assert_eq!(reply.content, "Attention weighs tokens.");
        assert_eq!(reply.role, Role::Assistant);

        let sent = fx.chat.last_call().unwrap().messages;
        assert_eq!(sent[0].role, Role::System);
        assert!(sent[0].content.contains("Vaswani2017"));
        let prompt = &sent.last().unwrap().content;
        assert!(prompt.contains("How does attention work?"));
        assert!(prompt.contains("From Vaswani2017:"));
        assert!(!prompt.contains("convolutions"));

        assert_eq!(
            history.messages(),
            vec![
                ChatMessage::user("How does attention work?"),
                ChatMessage::assistant("Attention weighs tokens."),
            ]
        );
        let memory = chat.memory().messages();
        assert_eq!(memory.len(), 3);
        assert_eq!(memory[1].content, "How does attention work?");
    }

    #[tokio::test]
    async fn test_earlier_excerpts_do_not_reach_later_turns() {
        let fx = Fixture::new().await;
        let subject = fx.vaswani();
        let mut chat = fx.orchestrator(subject, ChatHistory::new());

        chat.answer("attention").await.unwrap();
        chat.answer("and heads?").await.unwrap();

        let sent = fx.chat.last_call().unwrap().messages;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1].content, "attention");
    }

    #[tokio::test]
    async fn test_user_message_survives_model_failure() {
        let fx = Fixture::new().await;
        fx.chat.set_error("model offline");
        let subject = fx.vaswani();
        let history = ChatHistory::new();
        let mut chat = fx.orchestrator(subject, history.clone());

        let result = chat.answer("Anyone there?").await;
        assert!(matches!(result, Err(ChatError::LLM(_))));

        let messages = history.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::user("Anyone there?"));
        assert!(messages[1].error);
        assert!(messages[1].content.contains("model offline"));
    }

    #[tokio::test]
    async fn test_user_message_survives_embedding_failure() {
        let fx = Fixture::new().await;
        fx.embeddings.set_error("no embeddings");
        let subject = fx.vaswani();
        let history = ChatHistory::new();
        let mut chat = fx.orchestrator(subject, history.clone());

        assert!(matches!(
            chat.answer("Anyone there?").await,
            Err(ChatError::Embedding(_))
        ));
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0], ChatMessage::user("Anyone there?"));
        assert_eq!(fx.chat.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_turn_window_matches_rebuild() {
        let fx = Fixture::new().await;
        let subject = fx.vaswani();
        let history = ChatHistory::new();
        let mut chat = fx.orchestrator(subject, history.clone());

        fx.chat.set_error("model offline");
        assert!(chat.answer("first question").await.is_err());
        fx.chat.clear_error();
        fx.chat.set_response("An answer.");
        chat.answer("second question").await.unwrap();

        let incremental = chat.memory().messages();
        assert_eq!(incremental.len(), 3);
        assert_eq!(incremental[1].content, "second question");
        let sent = fx.chat.last_call().unwrap().messages;
        assert!(sent.iter().all(|m| m.content != "first question"));

        fx.preferences.update(|p| p.context_window_size = 8192);
        chat.sync_settings().unwrap();
        assert_eq!(chat.memory().messages(), incremental);
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_settings_change_before_turn_keeps_question_once() {
        let fx = Fixture::new().await;
        let subject = fx.vaswani();
        let mut chat = fx.orchestrator(subject, ChatHistory::new());

        fx.preferences.update(|p| p.context_window_size = 8192);
        chat.answer("attention").await.unwrap();

        let memory = chat.memory().messages();
        assert_eq!(memory.len(), 3);
        let sent = fx.chat.last_call().unwrap().messages;
        assert_eq!(sent.len(), 2);
    }

    #[tokio::test]
    async fn test_unfiltered_search_without_files() {
        let fx = Fixture::new().await;
        let subject = ChatSubject::Entry(
            fx.library
                .add_entry(BibEntry::new("article").with_citation_key("NoFiles")),
        );
        let mut chat = fx.orchestrator(subject, ChatHistory::new());
        assert!(chat.filter().is_none());

        chat.answer("convolutions over pixels").await.unwrap();
        let prompt = fx.chat.last_call().unwrap().messages.last().unwrap().content.clone();
        assert!(prompt.contains("convolutions share weights"));
    }

    #[tokio::test]
    async fn test_follow_ups_generated_and_cleared() {
        let fx = Fixture::new().await;
        fx.preferences.update(|p| p.follow_up.enabled = true);
        fx.chat.set_script(vec![
            Ok("First answer.".into()),
            Ok("1. What about positional encodings?\n2. How many layers?".into()),
            Ok("Second answer.".into()),
            Err("follow-up model broke".into()),
        ]);
        let subject = fx.vaswani();
        let mut chat = fx.orchestrator(subject, ChatHistory::new());

        chat.answer("attention").await.unwrap();
        assert_eq!(
            chat.follow_up_questions(),
            vec!["What about positional encodings?", "How many layers?"]
        );

        let reply = chat.answer("more").await.unwrap();
        assert_eq!(reply.content, "Second answer.");
        assert!(chat.follow_up_questions().is_empty());
        assert_eq!(fx.chat.call_count(), 4);
    }

    #[tokio::test]
    async fn test_context_window_change_rebuilds_memory() {
        let fx = Fixture::new().await;
        let subject = fx.vaswani();
        let history = ChatHistory::new();
        for i in 0..20 {
            history.push(ChatMessage::user(format!("question number {} {}", i, "x".repeat(80))));
            history.push(ChatMessage::assistant(format!("answer number {} {}", i, "y".repeat(80))));
        }
        let mut chat = fx.orchestrator(subject, history);
        let before = chat.memory().window().len();
        assert_eq!(before, 40);

        fx.preferences.update(|p| p.context_window_size = 400);
        chat.sync_settings().unwrap();

        let window = chat.memory().window();
        assert!(window.len() < before);
        assert!(window.used_tokens() <= 400);
        assert_eq!(chat.memory().budget(), 400);
    }

    #[tokio::test]
    async fn test_template_change_replaces_system_message() {
        let fx = Fixture::new().await;
        let subject = fx.vaswani();
        let mut chat = fx.orchestrator(subject, ChatHistory::new());
        chat.answer("attention").await.unwrap();

        for text in ["Be terse.", "Be verbose about {{ entries | length }} entries."] {
            fx.templates.set(AiTemplateKind::SystemMessage, text).unwrap();
            chat.sync_settings().unwrap();
        }

        let memory = chat.memory().messages();
        assert_eq!(memory.iter().filter(|m| m.is_system()).count(), 1);
        assert_eq!(memory[0].content, "Be verbose about 1 entries.");
        assert_eq!(memory.len(), 3);
    }

    #[tokio::test]
    async fn test_subject_changes_rebuild_filter_and_name() {
        let fx = Fixture::new().await;
        let entry = fx
            .library
            .add_entry(BibEntry::new("article").with_citation_key("LeCun1998"));
        let mut chat = fx.orchestrator(ChatSubject::Entry(entry), ChatHistory::new());
        assert!(chat.filter().is_none());
        let mut names = chat.subscribe_name();

        fx.library.add_file(entry, LinkedFile::new("lecun.pdf")).unwrap();
        assert!(
            chat.handle_library_event(&LibraryEvent::EntryFilesChanged { entry })
                .unwrap()
        );
        assert!(chat.filter().is_some());

        fx.library
            .set_citation_key(entry, Some("LeCun1999".into()))
            .unwrap();
        chat.handle_library_event(&LibraryEvent::CitationKeyChanged {
            entry,
            old: Some("LeCun1998".into()),
            new: Some("LeCun1999".into()),
        })
        .unwrap();
        assert_eq!(chat.name(), "LeCun1999");
        assert!(names.has_changed().unwrap());

        let other = fx.library.add_entry(BibEntry::new("misc"));
        assert!(
            !chat
                .handle_library_event(&LibraryEvent::EntryFilesChanged { entry: other })
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_group_chat_scopes_to_members() {
        let fx = Fixture::new().await;
        let group = fx.library.add_group("Vision");
        let lecun = fx.library.add_entry(
            BibEntry::new("article")
                .with_citation_key("LeCun1998")
                .with_file(LinkedFile::new("lecun.pdf")),
        );
        fx.library.assign_to_group(group, lecun).unwrap();

        let mut chat = fx.orchestrator(ChatSubject::Group(group), ChatHistory::new());
        assert_eq!(chat.name(), "Vision");

        chat.answer("attention and convolutions").await.unwrap();
        let prompt = fx.chat.last_call().unwrap().messages.last().unwrap().content.clone();
        assert!(prompt.contains("From LeCun1998:"));
        assert!(!prompt.contains("attention heads"));
    }
}
