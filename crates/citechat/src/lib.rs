//! Retrieval-augmented conversations about bibliographic entries

mod config;

pub use config::CiteChatConfig;

pub mod error {
    pub use citechat_core::{ChatError, LLMError, Result};
}

pub mod library {
    pub use citechat_core::{
        BibEntry, CitationKeyGenerator, EntryId, EntryIdentity, Group, GroupId, GroupIdentity,
        HistoryKey, LibraryContext, LibraryEvent, LibraryId, LinkedFile, NonPersistableReason,
        Persistence,
    };
}

pub mod llm {
    pub use citechat_core::{
        ChatMessage, ChatModel, EmbeddingModel, FinishReason, LLMError, LLMResponse, Role,
        TokenUsage,
    };
    pub use citechat_llm::{MockCall, MockChatModel, MockEmbeddingModel};
}

pub mod memory {
    pub use citechat_core::ChatHistory;
    pub use citechat_memory::{
        ChatMemoryWindow, HeuristicTokenEstimator, TokenEstimator, WindowedMemory,
        estimate_message_tokens, estimate_tokens,
    };
}

pub mod retrieval {
    pub use citechat_core::{
        EmbeddingMatch, EmbeddingSearchRequest, EmbeddingStore, LINK_METADATA_KEY, MetadataFilter,
        TextSegment,
    };
    pub use citechat_retrieval::{
        Excerpt, InMemoryEmbeddingStore, RetrievalFilterBuilder, resolve_excerpts,
    };
}

pub mod template {
    pub use citechat_template::{
        AiTemplateKind, AiTemplates, TemplateLoader, TemplateRenderer, TemplatesConfig,
    };
}

pub mod persistence {
    pub use citechat_core::ChatHistoryBackend;
    pub use citechat_history::ChatHistoryStore;
    #[cfg(feature = "sqlite")]
    pub use citechat_storage::SqliteHistoryBackend;
    pub use citechat_storage::{
        FileHistoryBackend, InMemoryHistoryBackend, StorageConfig, create_backend,
    };
}

pub mod chat {
    pub use citechat_runtime::{
        AiPreferences, AiService, ChatCollaborators, ChatOrchestrator, ChatSession, ChatSubject,
        FollowUpConfig, FollowUpGenerator, PreferencesHandle, parse_follow_up_questions,
    };
}

pub use chat::{
    AiPreferences, AiService, ChatCollaborators, ChatSession, ChatSubject, FollowUpConfig,
    PreferencesHandle,
};
pub use error::{ChatError, Result};
pub use library::{BibEntry, EntryId, GroupId, LibraryContext, LinkedFile};
pub use llm::{ChatMessage, ChatModel, EmbeddingModel, Role};
pub use memory::ChatHistory;
pub use persistence::{ChatHistoryStore, StorageConfig, create_backend};
pub use retrieval::{EmbeddingStore, InMemoryEmbeddingStore};
pub use template::{AiTemplates, TemplatesConfig};
